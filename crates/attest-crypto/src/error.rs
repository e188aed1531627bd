use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The shared secret was empty.
    #[error("signing secret must not be empty")]
    EmptySecret,

    /// The MAC implementation rejected the key.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// The signature header was not `sha256=<hex>`.
    #[error("malformed signature: {0}")]
    Malformed(String),
}

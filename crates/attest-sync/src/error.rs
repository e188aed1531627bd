use attest_core::ErrorClass;
use thiserror::Error;

/// Why a submission did not succeed, as the reconciler needs to know it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Network failure, timeout, or an overloaded server. Retry with backoff.
    #[error("transient submission failure: {0}")]
    Transient(String),

    /// Business or validation rejection. Retrying cannot succeed.
    #[error("submission rejected: {0}")]
    Fatal(String),

    /// The engine refuses all transitions pending an audit investigation.
    /// The operation is put back without spending an attempt.
    #[error("engine halted: {0}")]
    Halted(String),

    /// The submitter could not be built or is misconfigured. No operation
    /// is at fault; the pass stops without spending an attempt.
    #[error("submitter could not be built: {0}")]
    Client(String),
}

impl SubmitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) => ErrorClass::Transient,
            Self::Fatal(_) => ErrorClass::Conflict,
            Self::Halted(_) => ErrorClass::Integrity,
            Self::Client(_) => ErrorClass::Validation,
        }
    }
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook endpoint returned {status}")]
    Status { status: u16 },

    #[error("webhook transport error: {0}")]
    Transport(String),

    #[error("webhook signing failed: {0}")]
    Signing(#[from] attest_crypto::SignatureError),

    #[error("webhook payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("webhook client could not be built: {0}")]
    Client(String),

    #[error("webhook outbox storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for WebhookError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl WebhookError {
    /// 408, 429, 5xx and transport errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status } => is_retryable_status(*status),
            Self::Transport(_) => true,
            Self::Signing(_) | Self::Encoding(_) | Self::Client(_) | Self::Storage(_) => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

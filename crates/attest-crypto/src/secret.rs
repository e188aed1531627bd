use zeroize::Zeroizing;

use crate::error::SignatureError;

/// Shared HMAC key. Wiped from memory on drop; never printed.
#[derive(Clone)]
pub struct SigningSecret(Zeroizing<Vec<u8>>);

impl SigningSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, SignatureError> {
        let bytes = secret.into();
        if bytes.is_empty() {
            return Err(SignatureError::EmptySecret);
        }
        Ok(Self(Zeroizing::new(bytes)))
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let secret = SigningSecret::new("hunter2").unwrap();
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn empty_secret_rejected() {
        assert_eq!(SigningSecret::new("").unwrap_err(), SignatureError::EmptySecret);
    }
}

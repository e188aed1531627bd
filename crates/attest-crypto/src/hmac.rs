//! HMAC-SHA256 signing and constant-time verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::SignatureError;
use crate::secret::SigningSecret;

type HmacSha256 = Hmac<Sha256>;

/// Prefix naming the MAC algorithm in the signature header.
pub const SIGNATURE_PREFIX: &str = "sha256=";

fn mac(secret: &SigningSecret, payload: &[u8]) -> Result<[u8; 32], SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(payload);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Lowercase hex HMAC-SHA256 of `payload`.
pub fn sign_payload(secret: &SigningSecret, payload: &[u8]) -> Result<String, SignatureError> {
    Ok(hex::encode(mac(secret, payload)?))
}

/// Signature header value: `sha256=<hex>`.
pub fn signature_header(secret: &SigningSecret, payload: &[u8]) -> Result<String, SignatureError> {
    Ok(format!("{SIGNATURE_PREFIX}{}", sign_payload(secret, payload)?))
}

/// Verify a signature header (with or without the `sha256=` prefix) against
/// `payload`. Returns `Ok(false)` on mismatch and `Err` only when the header
/// cannot be decoded.
pub fn verify_signature(
    secret: &SigningSecret,
    payload: &[u8],
    header: &str,
) -> Result<bool, SignatureError> {
    let hex_part = header.strip_prefix(SIGNATURE_PREFIX).unwrap_or(header);
    let provided =
        hex::decode(hex_part).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    if provided.len() != 32 {
        return Err(SignatureError::Malformed(format!(
            "expected 32 bytes, got {}",
            provided.len()
        )));
    }
    let expected = mac(secret, payload)?;
    Ok(expected.ct_eq(provided.as_slice()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SigningSecret {
        SigningSecret::new("key").unwrap()
    }

    #[test]
    fn rfc_style_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let sig = sign_payload(&secret(), b"The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn header_verifies() {
        let body = br#"{"event_type":"check_in","sequence":3}"#;
        let header = signature_header(&secret(), body).unwrap();
        assert!(header.starts_with(SIGNATURE_PREFIX));
        assert!(verify_signature(&secret(), body, &header).unwrap());
    }

    #[test]
    fn tampered_body_fails() {
        let header = signature_header(&secret(), b"{\"flag\":\"denied\"}").unwrap();
        assert!(!verify_signature(&secret(), b"{\"flag\":\"granted\"}", &header).unwrap());
    }

    #[test]
    fn wrong_secret_fails() {
        let header = signature_header(&secret(), b"body").unwrap();
        let other = SigningSecret::new("other").unwrap();
        assert!(!verify_signature(&other, b"body", &header).unwrap());
    }

    #[test]
    fn malformed_header_is_an_error() {
        assert!(verify_signature(&secret(), b"body", "sha256=zz").is_err());
        assert!(verify_signature(&secret(), b"body", "sha256=abcd").is_err());
    }
}

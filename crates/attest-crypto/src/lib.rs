//! # attest-crypto: Payload Signatures
//!
//! Outbound webhook deliveries carry an HMAC-SHA256 over the exact request
//! body bytes, keyed by a secret shared with the receiver. Receivers verify
//! with [`verify_signature`], which compares in constant time.
//!
//! ## Header Format
//!
//! `sha256=<64 lowercase hex characters>`

pub mod error;
pub mod hmac;
pub mod secret;

pub use error::SignatureError;
pub use hmac::{sign_payload, signature_header, verify_signature, SIGNATURE_PREFIX};
pub use secret::SigningSecret;

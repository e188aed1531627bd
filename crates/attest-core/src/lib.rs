//! # attest-core: Foundational Types for the Attestation Engine
//!
//! Every other crate in the workspace depends on `attest-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `SessionId`, `EventId`,
//!    `OperationId`, `OwnerId` are validated newtypes. No bare strings or
//!    bare UUIDs cross crate boundaries.
//!
//! 2. **`CanonicalBytes` newtype.** ALL digest computation flows through
//!    `CanonicalBytes::new()`. Floats are rejected, so hashed structures
//!    carry coordinates as fixed-precision strings.
//!
//! 3. **UTC-only timestamps.** `Timestamp` is UTC with Z suffix and seconds
//!    precision, which keeps audit hashes reproducible after a round trip
//!    through storage.
//!
//! 4. **Injected time and identity.** Components receive a [`Clock`] and an
//!    [`IdGenerator`] instead of reaching for process-wide state, so tests can
//!    drive time forward deterministically.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `attest-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod clock;
pub mod digest;
pub mod error;
pub mod identity;
pub mod operation;
pub mod temporal;

pub use canonical::CanonicalBytes;
pub use clock::{Clock, IdGenerator, ManualClock, RandomIds, SystemClock};
pub use digest::{sha256_digest, ContentDigest, GENESIS_HASH};
pub use error::{CanonicalizationError, ErrorClass, ValidationError};
pub use identity::{EventId, OperationId, OwnerId, SessionId};
pub use operation::{OperationKind, Payload, Submission};
pub use temporal::Timestamp;

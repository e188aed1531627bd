//! # attest-geo: Location Verification
//!
//! Classifies a device location sample against a session's destination.
//!
//! ## Security Invariant
//!
//! The distance threshold is fixed when a [`LocationVerifier`] is
//! constructed from configuration. `verify` takes no threshold argument and
//! no caller identity, so there is no path by which one caller can be held to
//! a looser standard than another. `granted` is produced in exactly one
//! place, by comparing the computed haversine distance against that
//! threshold.
//!
//! ## Fail Closed
//!
//! Out-of-range or non-finite coordinates and accuracies are rejected with
//! [`GeoError`]. Nothing is clamped or rounded into range.

pub mod acquire;
pub mod coordinate;
pub mod error;
pub mod verifier;

pub use acquire::{acquire_sample, DEFAULT_SAMPLE_TIMEOUT};
pub use coordinate::{Coordinate, MAX_ACCURACY_METERS};
pub use error::GeoError;
pub use verifier::{
    accuracy_confidence, haversine_distance, LocationFix, LocationFlag, LocationSample,
    LocationVerifier, Verification, VerifierConfig, DEFAULT_THRESHOLD_METERS,
    EARTH_RADIUS_METERS,
};

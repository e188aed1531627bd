use attest_core::ErrorClass;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A location input that cannot be verified.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GeoError {
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("accuracy {0} m outside [0, 1000]")]
    AccuracyOutOfRange(f64),

    /// Threshold configuration must be a positive finite distance.
    #[error("invalid verification threshold: {0} m")]
    InvalidThreshold(f64),
}

impl GeoError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

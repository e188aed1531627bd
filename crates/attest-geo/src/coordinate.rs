use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GeoError;

/// Largest accepted horizontal accuracy radius. Fixes reported worse than
/// this are not usable for attendance.
pub const MAX_ACCURACY_METERS: f64 = 1000.0;

/// A validated WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    lat: f64,
    lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::LatitudeOutOfRange(lat));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(GeoError::LongitudeOutOfRange(lng));
        }
        Ok(Self { lat, lng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// Fixed seven-decimal rendering (about 1 cm) for hashed views, where
    /// floats are not admitted.
    pub fn lat_fixed(&self) -> String {
        format!("{:.7}", self.lat)
    }

    pub fn lng_fixed(&self) -> String {
        format!("{:.7}", self.lng)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.7}, {:.7})", self.lat, self.lng)
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            lat: f64,
            lng: f64,
        }
        let raw = Raw::deserialize(d)?;
        Self::new(raw.lat, raw.lng).map_err(serde::de::Error::custom)
    }
}

/// Validate a reported accuracy radius in meters.
pub(crate) fn validate_accuracy(accuracy: f64) -> Result<f64, GeoError> {
    if !accuracy.is_finite() || !(0.0..=MAX_ACCURACY_METERS).contains(&accuracy) {
        return Err(GeoError::AccuracyOutOfRange(accuracy));
    }
    Ok(accuracy)
}

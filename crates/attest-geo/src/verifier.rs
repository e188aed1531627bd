//! # Location Verifier
//!
//! Great-circle distance on a spherical Earth and threshold classification.
//! Pure computation: no I/O, no interior mutability.

use serde::{Deserialize, Serialize};

use crate::coordinate::{validate_accuracy, Coordinate, MAX_ACCURACY_METERS};
use crate::error::GeoError;

/// Mean Earth radius of the spherical model, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Maximum distance from the destination at which attendance is granted.
pub const DEFAULT_THRESHOLD_METERS: f64 = 200.0;

/// Classification of a location sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationFlag {
    /// Within threshold of the destination.
    Granted,
    /// Outside the threshold.
    Denied,
    /// No sample arrived before the acquisition deadline.
    Timeout,
    /// The device reported location services disabled.
    Unavailable,
}

impl LocationFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl std::fmt::Display for LocationFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated position fix reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationFix {
    pub coordinate: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

impl<'de> Deserialize<'de> for LocationFix {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            coordinate: Coordinate,
            #[serde(default)]
            accuracy_meters: Option<f64>,
        }
        let raw = Raw::deserialize(d)?;
        Self::new(raw.coordinate, raw.accuracy_meters).map_err(serde::de::Error::custom)
    }
}

impl LocationFix {
    pub fn new(coordinate: Coordinate, accuracy_meters: Option<f64>) -> Result<Self, GeoError> {
        let accuracy_meters = accuracy_meters.map(validate_accuracy).transpose()?;
        Ok(Self {
            coordinate,
            accuracy_meters,
        })
    }
}

/// What the caller obtained when asking the device for its location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationSample {
    Fix(LocationFix),
    /// Acquisition exceeded its deadline.
    Absent,
    /// Location services are switched off on the device.
    ServicesDisabled,
}

impl LocationSample {
    pub fn fix(&self) -> Option<&LocationFix> {
        match self {
            Self::Fix(fix) => Some(fix),
            Self::Absent | Self::ServicesDisabled => None,
        }
    }
}

/// Result of verifying one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verification {
    pub flag: LocationFlag,
    /// Present whenever a fix was available, granted or not.
    pub distance_meters: Option<f64>,
    /// Informational score in [0, 1]; never consulted for the flag.
    pub confidence: Option<f64>,
}

/// Verifier configuration, loaded once at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifierConfig {
    pub threshold_meters: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            threshold_meters: DEFAULT_THRESHOLD_METERS,
        }
    }
}

/// Classifies location samples against a destination using a single,
/// configuration-fixed threshold.
#[derive(Debug, Clone)]
pub struct LocationVerifier {
    threshold_meters: f64,
}

impl LocationVerifier {
    pub fn new(config: VerifierConfig) -> Result<Self, GeoError> {
        let t = config.threshold_meters;
        if !t.is_finite() || t <= 0.0 {
            return Err(GeoError::InvalidThreshold(t));
        }
        Ok(Self { threshold_meters: t })
    }

    pub fn threshold_meters(&self) -> f64 {
        self.threshold_meters
    }

    /// Verify a sample against `target`.
    pub fn verify(&self, sample: &LocationSample, target: Coordinate) -> Verification {
        match sample {
            LocationSample::Absent => Verification {
                flag: LocationFlag::Timeout,
                distance_meters: None,
                confidence: None,
            },
            LocationSample::ServicesDisabled => Verification {
                flag: LocationFlag::Unavailable,
                distance_meters: None,
                confidence: None,
            },
            LocationSample::Fix(fix) => {
                let distance = haversine_distance(fix.coordinate, target);
                Verification {
                    flag: self.classify(distance),
                    distance_meters: Some(distance),
                    confidence: fix
                        .accuracy_meters
                        .map(|acc| accuracy_confidence(distance, self.threshold_meters, acc)),
                }
            }
        }
    }

    /// `granted` iff `distance <= threshold`. NaN compares false and is denied.
    pub fn classify(&self, distance_meters: f64) -> LocationFlag {
        if distance_meters <= self.threshold_meters {
            LocationFlag::Granted
        } else {
            LocationFlag::Denied
        }
    }
}

/// Haversine great-circle distance in meters.
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.lat().to_radians();
    let phi2 = b.lat().to_radians();
    let d_phi = (b.lat() - a.lat()).to_radians();
    let d_lambda = (b.lng() - a.lng()).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// How strongly a fix supports presence at the destination.
///
/// `(1 − min(d/threshold, 1)) × max(0, 1 − accuracy/1000)`, clamped to [0, 1].
pub fn accuracy_confidence(distance_meters: f64, threshold_meters: f64, accuracy_meters: f64) -> f64 {
    let distance_factor = 1.0 - (distance_meters / threshold_meters).min(1.0);
    let accuracy_factor = (1.0 - accuracy_meters / MAX_ACCURACY_METERS).max(0.0);
    (distance_factor * accuracy_factor).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> LocationVerifier {
        LocationVerifier::new(VerifierConfig::default()).unwrap()
    }

    fn coord(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng).unwrap()
    }

    fn fix(lat: f64, lng: f64, acc: Option<f64>) -> LocationSample {
        LocationSample::Fix(LocationFix::new(coord(lat, lng), acc).unwrap())
    }

    /// Point `meters` due north of `origin` along its meridian.
    fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
        let d_lat = (meters / EARTH_RADIUS_METERS).to_degrees();
        coord(origin.lat() + d_lat, origin.lng())
    }

    #[test]
    fn same_point_is_granted_with_zero_distance() {
        let target = coord(38.5816, -121.4944);
        let v = verifier().verify(&fix(38.5816, -121.4944, Some(10.0)), target);
        assert_eq!(v.flag, LocationFlag::Granted);
        assert_eq!(v.distance_meters, Some(0.0));
        let confidence = v.confidence.unwrap();
        assert!((confidence - 0.99).abs() < 1e-9);
    }

    #[test]
    fn sixty_kilometers_away_is_denied() {
        let target = coord(38.5816, -121.4944);
        let v = verifier().verify(&fix(39.0, -122.0, Some(10.0)), target);
        assert_eq!(v.flag, LocationFlag::Denied);
        let d = v.distance_meters.unwrap();
        assert!(d > 55_000.0 && d < 70_000.0, "distance was {d}");
        assert_eq!(v.confidence, Some(0.0));
    }

    #[test]
    fn known_city_pair_distance() {
        // San Francisco to Los Angeles, ~559 km on the spherical model.
        let sf = coord(37.7749, -122.4194);
        let la = coord(34.0522, -118.2437);
        let d = haversine_distance(sf, la);
        assert!((d - 559_120.0).abs() < 1_000.0, "distance was {d}");
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let v = verifier();
        assert_eq!(v.classify(DEFAULT_THRESHOLD_METERS), LocationFlag::Granted);
        assert_eq!(v.classify(DEFAULT_THRESHOLD_METERS + 1.0), LocationFlag::Denied);
    }

    #[test]
    fn sample_exactly_at_configured_distance_is_granted() {
        let target = coord(38.5816, -121.4944);
        let sample = north_of(target, 150.0);
        let exact = haversine_distance(sample, target);
        let v = LocationVerifier::new(VerifierConfig {
            threshold_meters: exact,
        })
        .unwrap();
        let sample = LocationSample::Fix(LocationFix::new(sample, None).unwrap());
        assert_eq!(v.verify(&sample, target).flag, LocationFlag::Granted);
    }

    #[test]
    fn one_meter_beyond_threshold_is_denied() {
        let target = coord(38.5816, -121.4944);
        let sample = north_of(target, DEFAULT_THRESHOLD_METERS + 1.0);
        let d = haversine_distance(sample, target);
        assert!((d - 201.0).abs() < 1e-3);
        let sample = LocationSample::Fix(LocationFix::new(sample, None).unwrap());
        assert_eq!(verifier().verify(&sample, target).flag, LocationFlag::Denied);
    }

    #[test]
    fn absent_and_disabled_samples() {
        let target = coord(0.0, 0.0);
        let v = verifier();
        let timeout = v.verify(&LocationSample::Absent, target);
        assert_eq!(timeout.flag, LocationFlag::Timeout);
        assert_eq!(timeout.distance_meters, None);
        let off = v.verify(&LocationSample::ServicesDisabled, target);
        assert_eq!(off.flag, LocationFlag::Unavailable);
    }

    #[test]
    fn invalid_threshold_rejected() {
        for t in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(LocationVerifier::new(VerifierConfig { threshold_meters: t }).is_err());
        }
    }

    #[test]
    fn nan_distance_is_never_granted() {
        assert_eq!(verifier().classify(f64::NAN), LocationFlag::Denied);
    }

    #[test]
    fn fix_rejects_bad_accuracy() {
        assert!(LocationFix::new(coord(0.0, 0.0), Some(-3.0)).is_err());
        assert!(LocationFix::new(coord(0.0, 0.0), Some(5000.0)).is_err());
    }

    #[test]
    fn stored_fix_is_revalidated_on_read() {
        let fix = LocationFix::new(coord(38.5816, -121.4944), Some(12.0)).unwrap();
        let json = serde_json::to_string(&fix).unwrap();
        assert_eq!(serde_json::from_str::<LocationFix>(&json).unwrap(), fix);

        let bad = r#"{"coordinate":{"lat":38.5,"lng":-121.5},"accuracy_meters":-1.0}"#;
        assert!(serde_json::from_str::<LocationFix>(bad).is_err());
    }

    #[test]
    fn confidence_formula() {
        assert_eq!(accuracy_confidence(0.0, 200.0, 0.0), 1.0);
        assert_eq!(accuracy_confidence(100.0, 200.0, 500.0), 0.25);
        assert_eq!(accuracy_confidence(400.0, 200.0, 0.0), 0.0);
        assert_eq!(accuracy_confidence(0.0, 200.0, 1000.0), 0.0);
    }

    #[test]
    fn flag_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&LocationFlag::Unavailable).unwrap(),
            "\"unavailable\""
        );
        assert_eq!(LocationFlag::Granted.to_string(), "granted");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_coordinate() -> impl Strategy<Value = Coordinate> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lng)| Coordinate::new(lat, lng).unwrap())
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(a in any_coordinate(), b in any_coordinate()) {
            let ab = haversine_distance(a, b);
            let ba = haversine_distance(b, a);
            prop_assert!((ab - ba).abs() < 1e-6, "{ab} vs {ba}");
        }

        #[test]
        fn distance_is_non_negative_and_bounded(a in any_coordinate(), b in any_coordinate()) {
            let d = haversine_distance(a, b);
            prop_assert!(d >= 0.0);
            prop_assert!(d <= std::f64::consts::PI * EARTH_RADIUS_METERS + 1e-6);
        }

        #[test]
        fn identical_points_have_zero_distance(a in any_coordinate()) {
            prop_assert_eq!(haversine_distance(a, a), 0.0);
        }

        #[test]
        fn granted_implies_within_threshold(
            a in any_coordinate(),
            b in any_coordinate(),
            acc in proptest::option::of(0.0f64..=1000.0),
            threshold in 1.0f64..100_000.0,
        ) {
            let v = LocationVerifier::new(VerifierConfig { threshold_meters: threshold }).unwrap();
            let sample = LocationSample::Fix(LocationFix::new(a, acc).unwrap());
            let out = v.verify(&sample, b);
            let d = out.distance_meters.unwrap();
            prop_assert_eq!(out.flag.is_granted(), d <= threshold);
        }
    }
}

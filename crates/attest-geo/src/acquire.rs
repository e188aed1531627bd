//! Bounded wait for a location fix.
//!
//! Runs where the position is read, on the device side of a check-in: the
//! engine only ever sees the resulting [`LocationSample`]. A source that
//! stalls past the deadline is reported as [`LocationSample::Absent`]
//! instead of holding the attempt open.

use std::future::Future;
use std::time::Duration;

use crate::verifier::LocationSample;

/// How long a check-in or check-out waits for the device to produce a fix.
pub const DEFAULT_SAMPLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Await `source` for at most `timeout`. An expired deadline becomes
/// [`LocationSample::Absent`], which the verifier classifies as `timeout`.
pub async fn acquire_sample<F>(source: F, timeout: Duration) -> LocationSample
where
    F: Future<Output = LocationSample>,
{
    match tokio::time::timeout(timeout, source).await {
        Ok(sample) => sample,
        Err(_) => {
            tracing::debug!(timeout_ms = timeout.as_millis() as u64, "location acquisition timed out");
            LocationSample::Absent
        }
    }
}

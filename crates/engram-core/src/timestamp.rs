//! Timestamp handling
//!
//! Wraps `chrono` UTC datetimes behind a single comparable type used
//! for creation, update, and expiry times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A UTC timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp for the current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create from a DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create from milliseconds since Unix epoch
    pub fn from_millis(millis: i64) -> Self {
        Self(DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now))
    }

    /// Get as DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Get as milliseconds since Unix epoch
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Timestamp shifted forward by a duration
    pub fn plus(&self, duration: Duration) -> Self {
        Self::from_millis(self.as_millis() + duration.as_millis() as i64)
    }

    /// Timestamp shifted back by a duration
    pub fn minus(&self, duration: Duration) -> Self {
        Self::from_millis(self.as_millis() - duration.as_millis() as i64)
    }

    /// Elapsed time since this timestamp, zero if in the future
    pub fn elapsed(&self) -> Duration {
        let delta = Utc::now().timestamp_millis() - self.as_millis();
        Duration::from_millis(delta.max(0) as u64)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_millis_roundtrip() {
        let millis = 1_700_000_000_000i64;
        let ts = Timestamp::from_millis(millis);
        assert_eq!(ts.as_millis(), millis);
    }

    #[test]
    fn test_ordering() {
        let earlier = Timestamp::from_millis(1_000);
        let later = Timestamp::from_millis(2_000);
        assert!(earlier < later);
    }

    #[test]
    fn test_plus_minus() {
        let ts = Timestamp::from_millis(10_000);
        assert_eq!(ts.plus(Duration::from_secs(5)).as_millis(), 15_000);
        assert_eq!(ts.minus(Duration::from_secs(5)).as_millis(), 5_000);
    }

    #[test]
    fn test_elapsed_never_negative() {
        let future = Timestamp::now().plus(Duration::from_secs(3600));
        assert_eq!(future.elapsed(), Duration::ZERO);
    }
}

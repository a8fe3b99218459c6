//! TTL validation and wall-clock deadlines.
//!
//! Every TTL-taking operation validates through [`Ttl::from_secs`] before
//! touching its backend, so a non-positive TTL never produces a write.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// A validated, strictly positive time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ttl(u64);

impl Ttl {
    /// Validate a TTL in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidatedTtl`] if `secs <= 0`.
    pub fn from_secs(secs: i64) -> Result<Self> {
        if secs <= 0 {
            return Err(Error::InvalidatedTtl { ttl_secs: secs });
        }
        Ok(Self(secs as u64))
    }

    pub const fn as_secs(self) -> u64 {
        self.0
    }

    pub const fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Unix deadline in milliseconds, measured from `now_millis`.
    pub fn deadline_from(self, now_millis: u64) -> u64 {
        now_millis.saturating_add(self.0.saturating_mul(1_000))
    }
}

/// Current wall-clock time as Unix milliseconds.
///
/// A clock set before the epoch reads as zero rather than failing; expiry
/// checks then treat every deadline as still in the future.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

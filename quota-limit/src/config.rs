use std::time::Duration;

use chrono::TimeDelta;
use chrono::Utc;
use serde::Deserialize;

use crate::LimitError;

/// Slack added on top of two full refill cycles when a bucket is persisted
/// with an expiry.
const BUCKET_TTL_SLACK: Duration = Duration::from_secs(30);

/// Parameters of a [`FixedWindow`](crate::FixedWindow) limiter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FixedWindowConfig {
    /// The maximum number of requests allowed within a single window.
    pub max_requests: u64,
    /// The length of a window.
    #[serde(rename = "time-frame-ms", with = "millis")]
    pub time_frame: Duration,
}

impl FixedWindowConfig {
    pub fn new(max_requests: u64, time_frame: Duration) -> Self {
        Self {
            max_requests,
            time_frame,
        }
    }

    /// Rejects a zero quota, an empty window, or a window too long for its
    /// end to be a representable timestamp.
    pub fn validate(&self) -> Result<(), LimitError> {
        if self.max_requests == 0 {
            return Err(LimitError::InvalidConfig(
                "fixed window max-requests must be greater than zero".into(),
            ));
        }
        if self.time_frame.is_zero() {
            return Err(LimitError::InvalidConfig(
                "fixed window time frame must be greater than zero".into(),
            ));
        }
        let representable = TimeDelta::from_std(self.time_frame)
            .ok()
            .and_then(|length| Utc::now().checked_add_signed(length))
            .is_some();
        if !representable {
            return Err(LimitError::InvalidConfig(format!(
                "fixed window time frame {:?} is out of range",
                self.time_frame
            )));
        }
        Ok(())
    }
}

/// Parameters of a [`TokenBucket`](crate::TokenBucket) limiter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenBucketConfig {
    /// Bucket capacity, and the balance of a fresh identity.
    pub max_tokens: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
}

impl TokenBucketConfig {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
        }
    }

    /// Rejects non-positive or non-finite capacity and refill rate.
    pub fn validate(&self) -> Result<(), LimitError> {
        if !(self.max_tokens.is_finite() && self.max_tokens > 0.0) {
            return Err(LimitError::InvalidConfig(format!(
                "token bucket max-tokens must be a positive number, got {}",
                self.max_tokens
            )));
        }
        if !(self.refill_rate.is_finite() && self.refill_rate > 0.0) {
            return Err(LimitError::InvalidConfig(format!(
                "token bucket refill-rate must be a positive number, got {}",
                self.refill_rate
            )));
        }
        Ok(())
    }

    /// Expiry for a persisted bucket: two full refill cycles plus slack.
    ///
    /// By then an idle bucket would be full again, so dropping it loses
    /// nothing.
    pub fn idle_ttl(&self) -> Duration {
        let refill = Duration::try_from_secs_f64(self.max_tokens / self.refill_rate)
            .unwrap_or(Duration::MAX);
        refill
            .saturating_mul(2)
            .saturating_add(BUCKET_TTL_SLACK)
    }
}

mod millis {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

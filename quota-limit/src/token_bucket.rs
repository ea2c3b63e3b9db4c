use std::fmt;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use tracing::debug;
use tracing::warn;

use super::Reason;
use super::Strategy;
use crate::Bucket;
use crate::Clock;
use crate::LimitError;
use crate::StateStore;
use crate::StripedLock;
use crate::SystemClock;
use crate::TokenBucketConfig;

/// A continuously refilling token balance per identity.
///
/// A fresh identity starts with a full bucket. Tokens accrue at
/// `refill_rate` per second up to `max_tokens`, and each admitted request
/// spends one.
pub struct TokenBucket<S> {
    store: Arc<S>,
    max_tokens: f64,
    refill_rate: f64,
    locks: StripedLock,
    clock: Arc<dyn Clock>,
}

impl<S> fmt::Debug for TokenBucket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("max_tokens", &self.max_tokens)
            .field("refill_rate", &self.refill_rate)
            .field("stripes", &self.locks.stripes())
            .finish_non_exhaustive()
    }
}

impl<S> TokenBucket<S>
where
    S: StateStore<Bucket>,
{
    /// Creates a new `TokenBucket` strategy over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidConfig`] unless both the capacity and the
    /// refill rate are finite and positive.
    pub fn new(store: Arc<S>, config: TokenBucketConfig) -> Result<Self, LimitError> {
        config.validate()?;
        Ok(Self {
            store,
            max_tokens: config.max_tokens,
            refill_rate: config.refill_rate,
            locks: StripedLock::default(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use a lock table with `stripes` entries instead of the default.
    pub fn with_stripes(mut self, stripes: NonZeroUsize) -> Self {
        self.locks = StripedLock::new(stripes);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Brings `bucket` up to date at `now`.
    fn refill(&self, bucket: &mut Bucket, now: DateTime<Utc>) {
        let last = match bucket.last_refill {
            Some(last) => last,
            None => {
                bucket.tokens = self.max_tokens;
                now
            }
        };

        let elapsed = now - last;
        if elapsed > TimeDelta::zero() {
            let secs = elapsed
                .num_nanoseconds()
                .map_or(f64::MAX, |nanos| nanos as f64 / 1e9);
            bucket.tokens = (bucket.tokens + secs * self.refill_rate).min(self.max_tokens);
            bucket.last_refill = Some(now);
        } else {
            bucket.last_refill = Some(last);
        }
        bucket.tokens = bucket.tokens.clamp(0.0, self.max_tokens);
    }

    fn retry_after(&self, tokens: f64) -> Duration {
        Duration::try_from_secs_f64((1.0 - tokens) / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

#[async_trait]
impl<S> Strategy for TokenBucket<S>
where
    S: StateStore<Bucket> + 'static,
{
    async fn allow(&self, identity: &str) -> Result<ControlFlow<Reason>, LimitError> {
        let _guard = self.locks.lock(identity).await;

        let mut bucket = self
            .store
            .get(identity)
            .await
            .inspect_err(|err| warn!(identity, %err, "failed to read token bucket"))?;
        self.refill(&mut bucket, self.clock.now());

        let decision = if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(Reason::Exhausted {
                retry_after: self.retry_after(bucket.tokens),
            })
        };
        debug!(
            identity,
            tokens = bucket.tokens,
            allowed = decision.is_continue(),
            "token bucket decision"
        );

        // Denials persist too, so the next request refills from here.
        self.store
            .save(identity, bucket)
            .await
            .inspect_err(|err| warn!(identity, %err, "failed to save token bucket"))?;
        Ok(decision)
    }
}

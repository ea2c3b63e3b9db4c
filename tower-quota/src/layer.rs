use std::sync::Arc;
use std::time::Duration;

use quota_limit::Strategy;
use tower::Layer;

use crate::service::RateLimitService;

/// Applies a per-identity quota to requests.
///
/// Every service produced by this layer shares the same limiter, so quota
/// consumed through one clone is visible to all of them.
#[derive(Debug)]
pub struct RateLimitLayer<L, K>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    identify: K,
    timeout: Option<Duration>,
}

impl<L, K> Clone for RateLimitLayer<L, K>
where
    L: ?Sized,
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            identify: self.identify.clone(),
            timeout: self.timeout,
        }
    }
}

impl<L, K> RateLimitLayer<L, K>
where
    L: Strategy + ?Sized,
{
    /// Create a RateLimitLayer that accounts requests against the identity
    /// returned by `identify`.
    pub fn new(limiter: Arc<L>, identify: K) -> Self {
        RateLimitLayer {
            limiter,
            identify,
            timeout: None,
        }
    }

    /// Set a unified timeout for both the limiter decision and request
    /// execution.
    ///
    /// If the total time exceeds this duration, the service
    /// will return `QuotaError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<L, K, S> Layer<S> for RateLimitLayer<L, K>
where
    L: ?Sized,
    K: Clone,
{
    type Service = RateLimitService<L, S, K>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = RateLimitService::new(service, self.limiter.clone(), self.identify.clone());
        if let Some(timeout) = self.timeout {
            svc = svc.with_timeout(timeout);
        }
        svc
    }
}

use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tokio::time::Timeout;
use tokio::time::timeout;
use tower::BoxError;
use tower::Service;
use tracing::debug;
use tracing::warn;

use quota_limit::Reason;
use quota_limit::Strategy;

use crate::error::QuotaError;
use crate::identify::Identify;

// Effective infinity when no deadline is configured.
const NO_DEADLINE: Duration = Duration::from_secs(3600 * 24 * 365);

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>;

#[derive(Clone, Debug)]
struct RateLimitServiceMetrics {
    decisions: Counter<u64>,
}

impl RateLimitServiceMetrics {
    fn new() -> Self {
        let meter = global::meter("rate_limit_service");
        Self {
            decisions: meter.u64_counter("rate_limit_decisions").build(),
        }
    }

    fn record(&self, outcome: &'static str) {
        self.decisions.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

/// Asks a [`Strategy`] about every request's identity before calling the
/// inner service.
#[derive(Debug)]
pub struct RateLimitService<L, S, K>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    identify: K,
    timeout: Option<Duration>,
    instruments: RateLimitServiceMetrics,
}

pin_project! {
    /// The decision followed by the inner call, under the configured deadline.
    pub struct ResponseFuture<T> {
        #[pin]
        inner: Timeout<BoxFuture<T>>,
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BoxError::from(QuotaError::Timeout))),
            Poll::Pending => Poll::Pending,
        }
    }
}

// Manually implement Clone because L may be unsized
impl<L, S, K> Clone for RateLimitService<L, S, K>
where
    L: ?Sized,
    S: Clone,
    K: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            identify: self.identify.clone(),
            timeout: self.timeout,
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, S, K, Req> Service<Req> for RateLimitService<L, S, K>
where
    L: Strategy + ?Sized + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    K: Identify<Req>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let identity = self.identify.identify(&req).filter(|key| !key.is_empty());
        let limiter = Arc::clone(&self.limiter);
        let instruments = self.instruments.clone();

        // The ready service goes with this request; keep the fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let decide: BoxFuture<S::Response> = Box::pin(async move {
            let Some(identity) = identity else {
                instruments.record("missing_key");
                return Err(BoxError::from(QuotaError::MissingKey));
            };

            match limiter.allow(&identity).await {
                Ok(ControlFlow::Continue(())) => {
                    instruments.record("allowed");
                    inner.call(req).await
                }
                Ok(ControlFlow::Break(Reason::Exhausted { retry_after })) => {
                    instruments.record("denied");
                    debug!(%identity, ?retry_after, "request rate limited");
                    Err(BoxError::from(QuotaError::RateLimited { retry_after }))
                }
                Err(err) => {
                    instruments.record("error");
                    warn!(%identity, %err, "rate limiter failed to decide");
                    Err(BoxError::from(QuotaError::Unavailable(err.to_string())))
                }
            }
        });

        ResponseFuture {
            inner: timeout(self.timeout.unwrap_or(NO_DEADLINE), decide),
        }
    }
}

impl<L, S, K> RateLimitService<L, S, K>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>, identify: K) -> Self {
        Self {
            inner,
            limiter,
            identify,
            timeout: None,
            instruments: RateLimitServiceMetrics::new(),
        }
    }

    /// Set a unified deadline for both the decision and request execution.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

//! # Tower Quota
//!
//! `tower-quota` enforces a per-identity request quota in front of any
//! [Tower](https://github.com/tower-rs/tower) service, using a
//! [`quota_limit::Strategy`] to make each decision.
//!
//! ## How a request flows
//!
//! 1. **Identification**: An [`Identify`] implementation pulls the identity
//!    (an API key, a client IP) out of the request. Requests without one fail
//!    with [`QuotaError::MissingKey`] and never touch the limiter.
//! 2. **Decision**: The limiter is asked once per request. An exhausted quota
//!    fails with [`QuotaError::RateLimited`], carrying the retry hint. A
//!    limiter failure fails with [`QuotaError::Unavailable`] so callers can
//!    tell an outage from a denial.
//! 3. **Execution**: Allowed requests go to the inner service, and its
//!    response or error is returned untouched.
//!
//! An optional deadline covers steps 2 and 3 together and fails with
//! [`QuotaError::Timeout`].
//!
//! Readiness is never used for throttling: `poll_ready` only reflects the
//! inner service, because the answer depends on who is asking.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`QuotaError`] (400, 429 with
//!   `Retry-After`, 500, 408) and the HTTP extractors [`HeaderKey`] and
//!   [`PeerIp`].

mod error;
mod identify;
mod layer;
mod service;


pub use error::QuotaError;
#[cfg(feature = "axum")]
pub use identify::HeaderKey;
pub use identify::Identify;
#[cfg(feature = "axum")]
pub use identify::PeerIp;
pub use layer::RateLimitLayer;
pub use service::RateLimitService;
pub use service::ResponseFuture;

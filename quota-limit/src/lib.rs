//! # quota-limit
//!
//! `quota-limit` enforces a per-identity request quota whose state lives in a
//! pluggable store, so that decisions survive restarts and can be shared by
//! several server instances pointing at the same Redis.
//!
//! ## Core Philosophy
//!
//! Each decision is a read-modify-write cycle over a small state record
//! (a window counter or a token balance). The cycle for one identity is
//! serialised by a [`StripedLock`]: a fixed table of async mutexes selected by
//! hashing the identity. Unrelated identities proceed in parallel, and the
//! key space never grows the lock table.
//!
//! ## Key Concepts
//!
//! * **Strategy Trait**: A unified, async admission interface for both
//!   algorithms.
//! * **State Stores**: [`MemoryStore`] for a single process, [`RemoteStore`]
//!   for Redis with per-entry expiry.
//! * **Lazy Evaluation**: Windows and token balances are recalculated at the
//!   moment of the request. Nothing runs in the background; expiry of idle
//!   identities is left to the store.
//!
//! ## Known gap
//!
//! The stripe lock is process-local. Two processes sharing a [`RemoteStore`]
//! can both read the same record before either writes it back, and the later
//! write wins. Deployments that need exact multi-instance accounting need an
//! atomic primitive at the store, which this crate does not provide.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use quota_limit::FixedWindow;
//! use quota_limit::FixedWindowConfig;
//! use quota_limit::MemoryStore;
//! use quota_limit::Strategy;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), quota_limit::LimitError> {
//! let config = FixedWindowConfig::new(100, Duration::from_secs(60));
//! let limiter = FixedWindow::new(Arc::new(MemoryStore::new()), config)?;
//!
//! if limiter.allow("api-key-1").await?.is_continue() {
//!     // Request allowed
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;

mod clock;
mod config;
mod error;
mod fixed_window;
mod state;
mod store;
mod striped;
mod token_bucket;

pub use clock::Clock;
pub use clock::SystemClock;
pub use config::FixedWindowConfig;
pub use config::TokenBucketConfig;
pub use error::BoxError;
pub use error::LimitError;
pub use fixed_window::FixedWindow;
pub use state::Bucket;
pub use state::Record;
pub use state::Window;
pub use store::Connection;
pub use store::MemoryStore;
pub use store::RemoteStore;
pub use store::StateStore;
pub use store::Ttl;
pub use striped::DEFAULT_STRIPES;
pub use striped::StripedLock;
pub use token_bucket::TokenBucket;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    /// The identity has used up its quota for now.
    Exhausted { retry_after: Duration },
}

/// The admission interface shared by every limiting algorithm.
///
/// Strategies must be `Send` and `Sync` so a single limiter can be shared
/// across tasks via `Arc`.
#[async_trait]
pub trait Strategy: Debug + Send + Sync {
    /// Decides whether one more request from `identity` may proceed.
    ///
    /// Returns `ControlFlow::Continue(())` when allowed and
    /// `ControlFlow::Break(reason)` when the quota is exhausted.
    ///
    /// # Errors
    ///
    /// Any failure of the underlying store aborts the decision and is returned
    /// as is. Callers must treat it as "decision unknown".
    async fn allow(&self, identity: &str) -> Result<ControlFlow<Reason>, LimitError>;
}

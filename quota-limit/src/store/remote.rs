use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::trace;

use super::StateStore;
use crate::Bucket;
use crate::Clock;
use crate::LimitError;
use crate::SystemClock;
use crate::TokenBucketConfig;
use crate::Window;
use crate::state::Record;

/// Shortest expiry ever handed to the remote store.
const MIN_TTL: Duration = Duration::from_millis(1);

/// A keyed remote store with per-entry expiry.
///
/// Implemented for Redis's [`ConnectionManager`]; tests and other backends
/// can supply their own.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Fetches the raw value under `key`, `None` if there is none.
    async fn fetch(&self, key: &str) -> Result<Option<String>, LimitError>;

    /// Stores `value` under `key`, to be dropped by the store after `ttl`.
    async fn store(&self, key: &str, value: String, ttl: Duration) -> Result<(), LimitError>;
}

#[async_trait]
impl Connection for ConnectionManager {
    async fn fetch(&self, key: &str) -> Result<Option<String>, LimitError> {
        let mut conn = self.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(LimitError::unavailable)
    }

    async fn store(&self, key: &str, value: String, ttl: Duration) -> Result<(), LimitError> {
        let mut conn = self.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = conn
            .pset_ex(key, value, millis)
            .await
            .map_err(LimitError::unavailable)?;
        Ok(())
    }
}

/// How long a saved record is kept by the remote store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ttl {
    /// Until the instant the record reports through `Record::expires_at`,
    /// never less than one millisecond.
    UntilExpiry,
    /// The same duration after every save, whatever the record holds.
    Fixed(Duration),
}

/// State store backed by a networked key-value store, Redis in production.
///
/// Records are kept as JSON. The store is shared between processes but the
/// limiters' stripe locks are not: two instances deciding for the same
/// identity at the same moment can overwrite each other's update.
pub struct RemoteStore<S, C> {
    conn: C,
    ttl: Ttl,
    namespace: Option<String>,
    timeout: Option<Duration>,
    clock: Arc<dyn Clock>,
    _state: PhantomData<fn() -> S>,
}

impl<S, C> fmt::Debug for RemoteStore<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore")
            .field("ttl", &self.ttl)
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<S, C> RemoteStore<S, C> {
    pub fn new(conn: C, ttl: Ttl) -> Self {
        Self {
            conn,
            ttl,
            namespace: None,
            timeout: None,
            clock: Arc::new(SystemClock),
            _state: PhantomData,
        }
    }

    /// Prefix every key, so several limiters can share one database.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Bound every round trip to the store.
    ///
    /// When the deadline passes the operation fails with
    /// [`LimitError::Timeout`] instead of completing later.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.namespace {
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
            None => Cow::Borrowed(key),
        }
    }

    async fn deadline<T, F>(&self, op: F) -> Result<T, LimitError>
    where
        F: Future<Output = Result<T, LimitError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| LimitError::Timeout(limit))?,
            None => op.await,
        }
    }
}

impl<S: Record, C> RemoteStore<S, C> {
    fn ttl_for(&self, state: &S) -> Duration {
        match self.ttl {
            Ttl::Fixed(ttl) => ttl,
            Ttl::UntilExpiry => state
                .expires_at()
                .and_then(|end| (end - self.clock.now()).to_std().ok())
                .map_or(MIN_TTL, |left| left.max(MIN_TTL)),
        }
    }
}

impl<C> RemoteStore<Window, C> {
    /// Windows are kept until they end.
    pub fn fixed_window(conn: C) -> Self {
        Self::new(conn, Ttl::UntilExpiry)
    }
}

impl<C> RemoteStore<Bucket, C> {
    /// Buckets are kept for two full refill cycles plus slack after their
    /// last use.
    pub fn token_bucket(conn: C, config: &TokenBucketConfig) -> Self {
        Self::new(conn, Ttl::Fixed(config.idle_ttl()))
    }
}

#[async_trait]
impl<S, C> StateStore<S> for RemoteStore<S, C>
where
    S: Record,
    C: Connection,
{
    async fn get(&self, key: &str) -> Result<S, LimitError> {
        let key = self.key(key);
        match self.deadline(self.conn.fetch(&key)).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| LimitError::Corrupt {
                key: key.into_owned(),
                source,
            }),
            None => Ok(S::default()),
        }
    }

    async fn save(&self, key: &str, state: S) -> Result<(), LimitError> {
        let key = self.key(key);
        let ttl = self.ttl_for(&state);
        let raw = serde_json::to_string(&state).map_err(|source| LimitError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        trace!(%key, ?ttl, "saving limiter state");
        self.deadline(self.conn.store(&key, raw, ttl)).await
    }
}

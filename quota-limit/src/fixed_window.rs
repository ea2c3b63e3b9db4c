use std::fmt;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::debug;
use tracing::warn;

use super::Reason;
use super::Strategy;
use crate::Clock;
use crate::FixedWindowConfig;
use crate::LimitError;
use crate::StateStore;
use crate::StripedLock;
use crate::SystemClock;
use crate::Window;

/// A window-based limiter keyed by identity.
///
/// Each identity gets a counter that resets when its window ends. Windows
/// open on the first request after the previous one ended, so boundaries are
/// per identity rather than aligned to the wall clock. Like any fixed window
/// it can let through up to twice the limit in a short span straddling two
/// windows.
pub struct FixedWindow<S> {
    store: Arc<S>,
    max_requests: u64,
    time_frame: TimeDelta,
    locks: StripedLock,
    clock: Arc<dyn Clock>,
}

impl<S> fmt::Debug for FixedWindow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedWindow")
            .field("max_requests", &self.max_requests)
            .field("time_frame", &self.time_frame)
            .field("stripes", &self.locks.stripes())
            .finish_non_exhaustive()
    }
}

impl<S> FixedWindow<S>
where
    S: StateStore<Window>,
{
    /// Creates a new `FixedWindow` strategy over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidConfig`] if the quota or the window
    /// length is zero, or if a window opened now would end out of range.
    pub fn new(store: Arc<S>, config: FixedWindowConfig) -> Result<Self, LimitError> {
        config.validate()?;
        let time_frame = TimeDelta::from_std(config.time_frame).map_err(|_| {
            LimitError::InvalidConfig(format!(
                "fixed window time frame {:?} is out of range",
                config.time_frame
            ))
        })?;

        Ok(Self {
            store,
            max_requests: config.max_requests,
            time_frame,
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
}

#[async_trait]
impl<S> Strategy for FixedWindow<S>
where
    S: StateStore<Window> + 'static,
{
    async fn allow(&self, identity: &str) -> Result<ControlFlow<Reason>, LimitError> {
        let _guard = self.locks.lock(identity).await;

        let window = self
            .store
            .get(identity)
            .await
            .inspect_err(|err| warn!(identity, %err, "failed to read fixed window"))?;
        let now = self.clock.now();

        let next = match window.end_time {
            // The instant a window ends belongs to the next one.
            Some(end) if now < end => {
                if window.count >= self.max_requests {
                    debug!(identity, count = window.count, "fixed window exhausted");
                    return Ok(ControlFlow::Break(Reason::Exhausted {
                        retry_after: (end - now).to_std().unwrap_or_default(),
                    }));
                }
                Window {
                    count: window.count + 1,
                    end_time: Some(end),
                }
            }
            _ => Window::open(now, self.time_frame).ok_or_else(|| {
                LimitError::InvalidConfig(format!(
                    "fixed window of {} starting at {now} ends out of range",
                    self.time_frame
                ))
            })?,
        };

        debug!(identity, count = next.count, "fixed window admitted");
        self.store
            .save(identity, next)
            .await
            .inspect_err(|err| warn!(identity, %err, "failed to save fixed window"))?;
        Ok(ControlFlow::Continue(()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use chrono::DateTime;
    use chrono::Utc;

    use super::*;
    use crate::MemoryStore;
    use crate::clock::manual::ManualClock;

    fn limiter(
        max_requests: u64,
        time_frame: Duration,
    ) -> (FixedWindow<MemoryStore<Window>>, ManualClock) {
        let clock = ManualClock::new();
        let rl = FixedWindow::new(
            Arc::new(MemoryStore::new()),
            FixedWindowConfig::new(max_requests, time_frame),
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
        (rl, clock)
    }

    #[tokio::test]
    async fn it_enforces_limits() {
        let (rl, _clock) = limiter(3, Duration::from_secs(1));

        for _ in 0..3 {
            assert_eq!(rl.allow("client1").await.unwrap(), ControlFlow::Continue(()));
        }
        let before = rl.store().get("client1").await.unwrap();
        assert!(matches!(rl.allow("client1").await.unwrap(), ControlFlow::Break(..)));

        // Denial leaves the stored window untouched.
        assert_eq!(rl.store().get("client1").await.unwrap(), before);
        assert_eq!(before.count, 3);
    }

    #[tokio::test]
    async fn test_window_reset() {
        let (rl, clock) = limiter(1, Duration::from_secs(1));

        assert!(rl.allow("client3").await.unwrap().is_continue());
        assert!(rl.allow("client3").await.unwrap().is_break());

        clock.advance(TimeDelta::milliseconds(999));
        assert!(rl.allow("client3").await.unwrap().is_break());

        // Exactly at the end of the window a new one opens.
        clock.advance(TimeDelta::milliseconds(1));
        assert!(rl.allow("client3").await.unwrap().is_continue());

        let window = rl.store().get("client3").await.unwrap();
        assert_eq!(window.count, 1);
        assert_eq!(window.end_time, Some(clock.now() + TimeDelta::seconds(1)));
    }

    #[tokio::test]
    async fn test_idle_reset() {
        let (rl, clock) = limiter(2, Duration::from_millis(10));

        assert!(rl.allow("idle").await.unwrap().is_continue());
        assert!(rl.allow("idle").await.unwrap().is_continue());

        clock.advance(TimeDelta::milliseconds(50));
        assert!(rl.allow("idle").await.unwrap().is_continue());

        let window = rl.store().get("idle").await.unwrap();
        assert!(window.end_time.unwrap() > clock.now(), "window should end in the future");
    }

    #[tokio::test]
    async fn test_retry_after_is_time_left_in_window() {
        let (rl, clock) = limiter(1, Duration::from_secs(10));

        let _ = rl.allow("client").await.unwrap();
        clock.advance(TimeDelta::seconds(4));

        assert_eq!(
            rl.allow("client").await.unwrap(),
            ControlFlow::Break(Reason::Exhausted {
                retry_after: Duration::from_secs(6)
            })
        );
    }

    #[tokio::test]
    async fn test_zero_state_is_fresh() {
        let (rl, _clock) = limiter(1, Duration::from_secs(1));
        rl.store().save("client", Window::default()).await.unwrap();

        assert!(rl.allow("client").await.unwrap().is_continue());
        assert_eq!(rl.store().get("client").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (rl, _clock) = limiter(1, Duration::from_secs(60));

        assert!(rl.allow("a").await.unwrap().is_continue());
        assert!(rl.allow("a").await.unwrap().is_break());
        assert!(rl.allow("b").await.unwrap().is_continue());
        assert_eq!(rl.store().get("b").await.unwrap().count, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let store = Arc::new(MemoryStore::<Window>::new());
        assert!(matches!(
            FixedWindow::new(store.clone(), FixedWindowConfig::new(0, Duration::from_secs(1))),
            Err(LimitError::InvalidConfig(_))
        ));
        assert!(matches!(
            FixedWindow::new(store, FixedWindowConfig::new(1, Duration::ZERO)),
            Err(LimitError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_window_ending_out_of_range_rejected() {
        let store = Arc::new(MemoryStore::<Window>::new());
        let config = FixedWindowConfig::new(1, Duration::from_secs(10_000_000_000_000));
        assert!(matches!(
            FixedWindow::new(store, config),
            Err(LimitError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_overflowing_window_end_is_an_error() {
        // Accepted today, but a clock far enough in the future cannot open
        // a window of this length.
        let (rl, clock) = limiter(1, Duration::from_secs(100 * 365 * 24 * 3600));
        clock.advance(DateTime::<Utc>::MAX_UTC - clock.now() - TimeDelta::days(1));

        assert!(matches!(
            rl.allow("far-future").await,
            Err(LimitError::InvalidConfig(_))
        ));
        assert!(rl.store().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_actual_concurrency() {
        let capacity = 100;
        let rl = Arc::new(
            FixedWindow::new(
                Arc::new(MemoryStore::new()),
                FixedWindowConfig::new(capacity, Duration::from_secs(60)),
            )
            .unwrap(),
        );

        let handles = (0..capacity + 10).map(|_| {
            let rl = Arc::clone(&rl);
            tokio::spawn(async move { rl.allow("shared").await })
        });
        let results = futures::future::join_all(handles).await;
        let allowed = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(ControlFlow::Continue(())))))
            .count() as u64;

        // Even with multiple tasks, exactly 'capacity' should pass
        assert_eq!(allowed, capacity);
        assert_eq!(rl.store().get("shared").await.unwrap().count, allowed);
    }

    /// Fails the first read, then behaves like a memory store.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryStore<Window>,
        failed: AtomicBool,
    }

    #[async_trait]
    impl StateStore<Window> for FlakyStore {
        async fn get(&self, key: &str) -> Result<Window, LimitError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(LimitError::Unavailable("connection reset".into()));
            }
            self.inner.get(key).await
        }

        async fn save(&self, key: &str, state: Window) -> Result<(), LimitError> {
            self.inner.save(key, state).await
        }
    }

    #[tokio::test]
    async fn test_store_error_propagates_and_releases_lock() {
        let rl = FixedWindow::new(
            Arc::new(FlakyStore::default()),
            FixedWindowConfig::new(1, Duration::from_secs(1)),
        )
        .unwrap()
        .with_stripes(NonZeroUsize::new(1).unwrap());

        assert!(matches!(
            rl.allow("client").await,
            Err(LimitError::Unavailable(_))
        ));
        let next = tokio::time::timeout(Duration::from_millis(100), rl.allow("client"))
            .await
            .expect("stripe lock should have been released");
        assert!(next.unwrap().is_continue());
    }
}

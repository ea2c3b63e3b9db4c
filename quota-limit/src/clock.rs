use std::fmt::Debug;

use chrono::DateTime;
use chrono::Utc;

/// Wall-clock source for limiters.
///
/// Persisted state carries absolute timestamps, so this is wall time rather
/// than a monotonic instant. Tests substitute a manual clock.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system's UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) mod manual {
    use std::sync::Arc;

    use chrono::DateTime;
    use chrono::TimeDelta;
    use chrono::Utc;
    use parking_lot::Mutex;

    use super::Clock;

    /// A clock that only moves when told to.
    #[derive(Debug, Clone)]
    pub(crate) struct ManualClock {
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self {
                now: Arc::new(Mutex::new(Utc::now())),
            }
        }

        pub(crate) fn advance(&self, by: TimeDelta) {
            *self.now.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }
}

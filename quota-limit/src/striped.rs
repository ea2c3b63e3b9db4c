use std::num::NonZeroUsize;

use ahash::RandomState;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;

/// Stripe count used by limiters unless told otherwise.
pub const DEFAULT_STRIPES: NonZeroUsize = NonZeroUsize::new(256).unwrap();

// Fixed seeds: the key to stripe mapping must not change for the life of a table.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// A fixed table of async mutexes, one of which guards any given key.
///
/// Two keys that hash to the same stripe contend with each other even though
/// they are unrelated; the probability of that shrinks with the stripe count.
/// Keys on different stripes never block each other.
///
/// Guards are held across `.await` points (the store round trip), hence the
/// `tokio` mutex.
#[derive(Debug)]
pub struct StripedLock {
    stripes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl Default for StripedLock {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl StripedLock {
    pub fn new(stripes: NonZeroUsize) -> Self {
        Self {
            stripes: (0..stripes.get()).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]),
        }
    }

    /// Number of stripes in the table.
    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    /// The stripe index guarding `key`.
    pub fn stripe(&self, key: &str) -> usize {
        (self.hasher.hash_one(key.as_bytes()) % self.stripes.len() as u64) as usize
    }

    /// Waits for the stripe guarding `key`.
    ///
    /// The stripe is released when the returned guard is dropped, which also
    /// happens when the awaiting future is cancelled.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(key)].lock().await
    }
}

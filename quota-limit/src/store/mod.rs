//! Persistence of per-identity limiter state.
//!
//! Limiters only ever `get` a record, compute a new one and `save` it back
//! while holding the identity's stripe lock, so stores need no
//! read-modify-write primitive of their own.

use async_trait::async_trait;

use crate::LimitError;
use crate::state::Record;

mod memory;
mod remote;

pub use memory::MemoryStore;
pub use remote::Connection;
pub use remote::RemoteStore;
pub use remote::Ttl;

/// Storage contract for one kind of limiter state.
#[async_trait]
pub trait StateStore<S: Record>: Send + Sync {
    /// Returns the state stored under `key`, or `S::default()` if there is
    /// none. An unknown key is never an error.
    async fn get(&self, key: &str) -> Result<S, LimitError>;

    /// Records `state` under `key`, replacing any previous value.
    async fn save(&self, key: &str, state: S) -> Result<(), LimitError>;
}

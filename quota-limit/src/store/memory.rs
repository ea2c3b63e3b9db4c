use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::StateStore;
use crate::LimitError;
use crate::state::Record;

/// Process-local state store.
///
/// Entries are never evicted; they live as long as the store.
#[derive(Debug)]
pub struct MemoryStore<S> {
    data: RwLock<HashMap<String, S>>,
}

impl<S> Default for MemoryStore<S> {
    fn default() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl<S> MemoryStore<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities with stored state.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl<S: Record> StateStore<S> for MemoryStore<S> {
    async fn get(&self, key: &str) -> Result<S, LimitError> {
        Ok(self.data.read().get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &str, state: S) -> Result<(), LimitError> {
        self.data.write().insert(key.to_owned(), state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use chrono::Utc;

    use super::*;
    use crate::Bucket;
    use crate::Window;

    #[tokio::test]
    async fn test_unknown_key_is_default() {
        let windows = MemoryStore::<Window>::new();
        let got = windows.get("nonexistent").await.unwrap();
        assert_eq!(got.count, 0);
        assert!(got.end_time.is_none());

        let buckets = MemoryStore::<Bucket>::new();
        let got = buckets.get("nonexistent").await.unwrap();
        assert_eq!(got.tokens, 0.0);
        assert!(got.last_refill.is_none());
        assert!(buckets.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_get() {
        let store = MemoryStore::new();
        let window = Window {
            count: 3,
            end_time: Some(Utc::now() + TimeDelta::minutes(1)),
        };

        store.save("client1", window.clone()).await.unwrap();
        assert_eq!(store.get("client1").await.unwrap(), window);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_existing() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .save(
                "client3",
                Bucket {
                    tokens: 1.0,
                    last_refill: Some(now),
                },
            )
            .await
            .unwrap();

        let later = now + TimeDelta::minutes(1);
        store
            .save(
                "client3",
                Bucket {
                    tokens: 5.5,
                    last_refill: Some(later),
                },
            )
            .await
            .unwrap();

        let got = store.get("client3").await.unwrap();
        assert_eq!(got.tokens, 5.5);
        assert_eq!(got.last_refill, Some(later));
        assert_eq!(store.len(), 1);
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StateStore, StoreError};
use crate::conversation::Conversation;

/// A non-durable store, mostly for tests.
///
/// States are kept serialized, so the stored bytes can be compared to
/// check that a thread was left untouched.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, String>>,
}

impl MemoryStateStore {
    /// Returns the serialized state of a thread.
    pub async fn raw(&self, thread_id: &str) -> Option<String> {
        self.states.read().await.get(thread_id).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let states = self.states.read().await;
        let Some(raw) = states.get(thread_id) else {
            return Ok(None);
        };
        serde_json::from_str(raw).map(Some).map_err(|source| {
            StoreError::Malformed {
                thread_id: thread_id.to_owned(),
                source,
            }
        })
    }

    async fn put(
        &self,
        thread_id: &str,
        conversation: &Conversation,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(conversation).map_err(|source| {
            StoreError::Malformed {
                thread_id: thread_id.to_owned(),
                source,
            }
        })?;
        self.states.write().await.insert(thread_id.to_owned(), raw);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), StoreError> {
        self.states.write().await.remove(thread_id);
        Ok(())
    }
}

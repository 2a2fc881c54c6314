use std::collections::HashMap;

use tokio::sync::RwLock;

use hrflow_core::capabilities::{ContextEntry, MemoryStore, PatternUpdate, UserPatterns};
use hrflow_core::errors::CapabilityError;

/// Process-local memory store. Entries are kept per user in insertion order.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    contexts: RwLock<HashMap<String, Vec<ContextEntry>>>,
    patterns: RwLock<HashMap<String, UserPatterns>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn context_count(&self, user_id: &str) -> usize {
        self.contexts.read().await.get(user_id).map(Vec::len).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get_recent_context(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextEntry>, CapabilityError> {
        let contexts = self.contexts.read().await;
        Ok(contexts
            .get(user_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_learned_patterns(&self, user_id: &str) -> Result<UserPatterns, CapabilityError> {
        let patterns = self.patterns.read().await;
        Ok(patterns.get(user_id).cloned().unwrap_or_default())
    }

    async fn store_context(
        &self,
        user_id: &str,
        _session_id: &str,
        entry: ContextEntry,
    ) -> Result<(), CapabilityError> {
        let mut contexts = self.contexts.write().await;
        contexts.entry(user_id.to_string()).or_default().push(entry);
        Ok(())
    }

    async fn update_user_patterns(
        &self,
        user_id: &str,
        update: PatternUpdate,
    ) -> Result<(), CapabilityError> {
        // The write guard spans read-modify-write, so concurrent increments accumulate.
        let mut patterns = self.patterns.write().await;
        let user = patterns.entry(user_id.to_string()).or_default();
        user.intents
            .entry(update.intent)
            .or_default()
            .accumulate(update.confidence, update.observed_at);
        user.preferred_agent = Some(update.agent);
        Ok(())
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hrflow_core::capabilities::{ContextEntry, MemoryStore, PatternUpdate};
use hrflow_core::config::LearningMode;
use hrflow_core::domain::response::LearningResults;
use hrflow_core::errors::CapabilityError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What one finished interaction teaches the memory store.
#[derive(Clone, Debug, PartialEq)]
pub struct InteractionSummary {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
    pub intent: String,
    pub confidence: f64,
    pub agent: String,
    pub success: bool,
    pub tools_used: Vec<String>,
}

impl InteractionSummary {
    fn context_entry(&self) -> ContextEntry {
        ContextEntry {
            session_id: self.session_id.clone(),
            message: self.message.clone(),
            intent: self.intent.clone(),
            confidence: self.confidence,
            agent: self.agent.clone(),
            success: self.success,
            tools_used: self.tools_used.clone(),
            recorded_at: Utc::now(),
        }
    }

    fn pattern_update(&self) -> PatternUpdate {
        PatternUpdate {
            intent: self.intent.clone(),
            confidence: self.confidence,
            agent: self.agent.clone(),
            observed_at: Utc::now(),
        }
    }
}

async fn persist(
    memory: &dyn MemoryStore,
    summary: &InteractionSummary,
) -> Result<(), CapabilityError> {
    memory.store_context(&summary.user_id, &summary.session_id, summary.context_entry()).await?;
    memory.update_user_patterns(&summary.user_id, summary.pattern_update()).await
}

/// Records interactions into long-term memory without ever failing the reply.
#[derive(Clone)]
pub struct MemoryLearner {
    memory: Arc<dyn MemoryStore>,
    mode: LearningMode,
    timeout: Duration,
}

impl MemoryLearner {
    pub fn new(memory: Arc<dyn MemoryStore>, mode: LearningMode, timeout: Duration) -> Self {
        Self { memory, mode, timeout }
    }

    pub async fn record(&self, summary: InteractionSummary) -> LearningResults {
        match self.mode {
            LearningMode::Detached => {
                self.spawn_detached(summary);
                LearningResults {
                    learning_available: true,
                    mode: Some("detached".to_string()),
                    patterns_updated: None,
                }
            }
            LearningMode::Inline => self.record_inline(summary).await,
        }
    }

    async fn record_inline(&self, summary: InteractionSummary) -> LearningResults {
        let outcome =
            tokio::time::timeout(self.timeout, persist(self.memory.as_ref(), &summary)).await;
        let error = match outcome {
            Ok(Ok(())) => {
                return LearningResults {
                    learning_available: true,
                    mode: Some("inline".to_string()),
                    patterns_updated: Some(true),
                };
            }
            Ok(Err(error)) => error,
            Err(_elapsed) => CapabilityError::Timeout(self.timeout.as_secs()),
        };
        warn!(
            event_name = "learning.inline.failed",
            session_id = %summary.session_id,
            error = %error,
            "memory learning failed; reply unaffected"
        );
        LearningResults::unavailable()
    }

    /// Spawns the write plus a supervisor that logs a failed or panicked task.
    /// The returned handle resolves once the supervisor has observed the outcome.
    pub(crate) fn spawn_detached(&self, summary: InteractionSummary) -> JoinHandle<()> {
        let memory = Arc::clone(&self.memory);
        let timeout = self.timeout;
        let session_id = summary.session_id.clone();

        let task = tokio::spawn(async move {
            match tokio::time::timeout(timeout, persist(memory.as_ref(), &summary)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(CapabilityError::Timeout(timeout.as_secs())),
            }
        });

        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => debug!(
                    event_name = "learning.detached.recorded",
                    session_id = %session_id,
                    "interaction recorded"
                ),
                Ok(Err(error)) => warn!(
                    event_name = "learning.detached.failed",
                    session_id = %session_id,
                    error = %error,
                    "background memory learning failed"
                ),
                Err(join_error) => warn!(
                    event_name = "learning.detached.aborted",
                    session_id = %session_id,
                    error = %join_error,
                    "background memory learning task did not complete"
                ),
            }
        })
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hrflow_core::capabilities::{ContextEntry, MemoryStore, UserPatterns};
use hrflow_core::domain::intent::{EnhancedIntent, Entities, Intent};
use hrflow_core::domain::session::UserContext;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{CacheScope, LlmError, TextService};
use crate::tools::json_object;

const ENRICHMENT_FORMAT: &str = "Reply with JSON only: {\"intent\": \"..\", \
     \"enhanced_entities\": {}, \"personalization\": {}, \"emotional_context\": null, \
     \"confidence_adjustment\": 0.0}";

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error(transparent)]
    Capability(#[from] LlmError),
    #[error("enrichment reply was not a JSON object")]
    NotJson,
    #[error("enrichment reply did not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnrichmentReply {
    intent: Option<String>,
    #[serde(alias = "enhancedEntities")]
    enhanced_entities: Entities,
    personalization: BTreeMap<String, Value>,
    #[serde(alias = "emotionalContext")]
    emotional_context: Option<String>,
    #[serde(alias = "confidenceAdjustment")]
    confidence_adjustment: f64,
}

/// Result of one enrichment attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct Enrichment {
    pub enhanced: EnhancedIntent,
    /// Whether any recent context or learned pattern existed for the user.
    pub memory_found: bool,
}

/// Adds user memory and capability hints to a classified intent.
///
/// Never fails: every read, call or parse error collapses into
/// [`EnhancedIntent::passthrough`]. Memory reads share one `memory_timeout`;
/// a store that does not answer in time counts as empty.
#[derive(Clone)]
pub struct ContextEnricher {
    memory: Arc<dyn MemoryStore>,
    text: TextService,
    recent_limit: usize,
    memory_timeout: Duration,
}

impl ContextEnricher {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        text: TextService,
        recent_limit: usize,
        memory_timeout: Duration,
    ) -> Self {
        Self { memory, text, recent_limit, memory_timeout }
    }

    pub async fn enrich(&self, intent: &Intent, message: &str, user: &UserContext) -> Enrichment {
        let (recent, patterns) = self.read_memory(user).await;
        let memory_found = !recent.is_empty() || !patterns.is_empty();

        let enhanced = match self.ask(intent, message, user, &recent, &patterns).await {
            Ok(enhanced) => enhanced,
            Err(error) => {
                warn!(
                    event_name = "enrichment.degraded",
                    session_id = %user.session_id,
                    error = %error,
                    "enrichment skipped; keeping classified intent"
                );
                EnhancedIntent::passthrough(intent.clone())
            }
        };

        Enrichment { enhanced, memory_found }
    }

    async fn read_memory(&self, user: &UserContext) -> (Vec<ContextEntry>, UserPatterns) {
        let reads = async {
            tokio::join!(
                self.memory.get_recent_context(&user.user_id, self.recent_limit),
                self.memory.get_learned_patterns(&user.user_id),
            )
        };
        let Ok((recent, patterns)) = tokio::time::timeout(self.memory_timeout, reads).await
        else {
            warn!(
                event_name = "enrichment.memory.timed_out",
                session_id = %user.session_id,
                timeout_secs = self.memory_timeout.as_secs(),
                "memory reads timed out; enriching without history"
            );
            return (Vec::new(), UserPatterns::default());
        };

        let recent = recent.unwrap_or_else(|error| {
            debug!(
                event_name = "enrichment.memory.recent_unavailable",
                session_id = %user.session_id,
                error = %error,
                "recent context unavailable"
            );
            Vec::new()
        });
        let patterns = patterns.unwrap_or_else(|error| {
            debug!(
                event_name = "enrichment.memory.patterns_unavailable",
                session_id = %user.session_id,
                error = %error,
                "learned patterns unavailable"
            );
            UserPatterns::default()
        });
        (recent, patterns)
    }

    async fn ask(
        &self,
        intent: &Intent,
        message: &str,
        user: &UserContext,
        recent: &[ContextEntry],
        patterns: &UserPatterns,
    ) -> Result<EnhancedIntent, EnrichmentError> {
        let prompt = enrichment_prompt(intent, message, user, recent, patterns);
        let scope = CacheScope::User(user.user_id.clone());
        let reply = self.text.ask(scope, &prompt, ENRICHMENT_FORMAT).await?;
        parse_reply(intent, &reply)
    }
}

fn enrichment_prompt(
    intent: &Intent,
    message: &str,
    user: &UserContext,
    recent: &[ContextEntry],
    patterns: &UserPatterns,
) -> String {
    let history = recent
        .iter()
        .map(|entry| format!("- [{}] {}", entry.intent, entry.message))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Refine the classification of an HR assistant request.\n\
         User role: {role}; department: {department}\n\
         Past interactions: {past}; most frequent intent: {dominant}\n\
         Recent requests:\n{history}\n\
         Classified intent: {intent}\nMessage: {message}",
        role = user.role,
        department = user.department,
        past = patterns.total_interactions(),
        dominant = patterns.dominant_intent().unwrap_or("none"),
    )
}

fn parse_reply(classified: &Intent, reply: &str) -> Result<EnhancedIntent, EnrichmentError> {
    let object = json_object(reply).ok_or(EnrichmentError::NotJson)?;
    let parsed = serde_json::from_str::<EnrichmentReply>(object)?;

    let intent = parsed
        .intent
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(Intent::parse)
        .filter(|intent| *intent != Intent::Error)
        .unwrap_or_else(|| classified.clone());

    Ok(EnhancedIntent {
        intent,
        enhanced_entities: parsed.enhanced_entities,
        personalization: parsed.personalization,
        emotional_context: parsed.emotional_context.filter(|context| !context.trim().is_empty()),
        confidence_adjustment: if parsed.confidence_adjustment.is_finite() {
            parsed.confidence_adjustment.clamp(0.0, 1.0)
        } else {
            0.0
        },
    })
}

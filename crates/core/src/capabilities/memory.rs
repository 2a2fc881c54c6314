use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CapabilityError;

/// One remembered interaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub session_id: String,
    pub message: String,
    pub intent: String,
    pub confidence: f64,
    pub agent: String,
    pub success: bool,
    pub tools_used: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Accumulated statistics for one intent of one user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentPattern {
    pub interaction_count: u64,
    pub average_confidence: f64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl IntentPattern {
    /// Folds one more observation in: increments the counter and keeps a
    /// count-weighted running average of the confidence.
    pub fn accumulate(&mut self, confidence: f64, seen_at: DateTime<Utc>) {
        let previous = self.interaction_count as f64;
        self.average_confidence =
            (self.average_confidence * previous + confidence) / (previous + 1.0);
        self.interaction_count += 1;
        self.last_seen = Some(seen_at);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatterns {
    pub intents: BTreeMap<String, IntentPattern>,
    pub preferred_agent: Option<String>,
}

impl UserPatterns {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn total_interactions(&self) -> u64 {
        self.intents.values().map(|pattern| pattern.interaction_count).sum()
    }

    /// The intent seen most often; ties resolve to the alphabetically first label.
    pub fn dominant_intent(&self) -> Option<&str> {
        self.intents
            .iter()
            .max_by(|(left_label, left), (right_label, right)| {
                left.interaction_count
                    .cmp(&right.interaction_count)
                    .then_with(|| right_label.cmp(left_label))
            })
            .map(|(label, _)| label.as_str())
    }
}

/// Increment applied to a user's long-term patterns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternUpdate {
    pub intent: String,
    pub confidence: f64,
    pub agent: String,
    pub observed_at: DateTime<Utc>,
}

/// Long-term memory capability.
///
/// Every call is independently failable. `update_user_patterns` must apply its
/// increment atomically per (user, intent) so that concurrent sessions of the
/// same user accumulate instead of overwriting each other.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get_recent_context(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextEntry>, CapabilityError>;

    async fn get_learned_patterns(&self, user_id: &str) -> Result<UserPatterns, CapabilityError>;

    async fn store_context(
        &self,
        user_id: &str,
        session_id: &str,
        entry: ContextEntry,
    ) -> Result<(), CapabilityError>;

    async fn update_user_patterns(
        &self,
        user_id: &str,
        update: PatternUpdate,
    ) -> Result<(), CapabilityError>;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{IntentPattern, UserPatterns};

    #[test]
    fn accumulate_keeps_weighted_average() {
        let mut pattern = IntentPattern::default();
        pattern.accumulate(0.9, Utc::now());
        pattern.accumulate(0.3, Utc::now());
        pattern.accumulate(0.6, Utc::now());

        assert_eq!(pattern.interaction_count, 3);
        assert!((pattern.average_confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn dominant_intent_prefers_highest_count() {
        let mut patterns = UserPatterns::default();
        for _ in 0..3 {
            let pattern = patterns.intents.entry("leave_status".to_string()).or_default();
            pattern.accumulate(0.9, Utc::now());
        }
        let pattern = patterns.intents.entry("candidate_search".to_string()).or_default();
        pattern.accumulate(0.9, Utc::now());

        assert_eq!(patterns.dominant_intent(), Some("leave_status"));
        assert_eq!(patterns.total_interactions(), 4);
    }
}

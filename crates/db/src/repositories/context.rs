use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use hrflow_core::capabilities::{
    ContextEntry, IntentPattern, MemoryStore, PatternUpdate, UserPatterns,
};
use hrflow_core::errors::CapabilityError;

use super::RepositoryError;
use crate::DbPool;

const UPSERT_PATTERN: &str = "
    INSERT INTO user_intent_patterns
        (user_id, intent, interaction_count, average_confidence, last_seen)
    VALUES (?1, ?2, 1, ?3, ?4)
    ON CONFLICT (user_id, intent) DO UPDATE SET
        average_confidence = (average_confidence * interaction_count
            + excluded.average_confidence) / (interaction_count + 1),
        interaction_count = interaction_count + 1,
        last_seen = excluded.last_seen";

const UPSERT_PREFERENCE: &str = "
    INSERT INTO user_preferences (user_id, preferred_agent, updated_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT (user_id) DO UPDATE SET
        preferred_agent = excluded.preferred_agent,
        updated_at = excluded.updated_at";

/// SQLite-backed long-term memory.
///
/// Pattern increments are a single upsert per (user, intent), so concurrent
/// sessions of one user accumulate instead of overwriting each other.
pub struct SqlMemoryStore {
    pool: DbPool,
}

impl SqlMemoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT session_id, message, intent, confidence, agent, success, tools_used,
                    recorded_at
             FROM context_entries
             WHERE user_id = ?1
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(context_from_row).collect()
    }

    async fn patterns(&self, user_id: &str) -> Result<UserPatterns, RepositoryError> {
        let rows = sqlx::query(
            "SELECT intent, interaction_count, average_confidence, last_seen
             FROM user_intent_patterns
             WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut patterns = UserPatterns::default();
        for row in &rows {
            let intent: String = row.try_get("intent")?;
            let count: i64 = row.try_get("interaction_count")?;
            patterns.intents.insert(
                intent,
                IntentPattern {
                    interaction_count: u64::try_from(count).unwrap_or_default(),
                    average_confidence: row.try_get("average_confidence")?,
                    last_seen: row.try_get::<Option<DateTime<Utc>>, _>("last_seen")?,
                },
            );
        }

        patterns.preferred_agent = sqlx::query_scalar::<_, Option<String>>(
            "SELECT preferred_agent FROM user_preferences WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        Ok(patterns)
    }

    async fn insert_context(
        &self,
        user_id: &str,
        session_id: &str,
        entry: &ContextEntry,
    ) -> Result<(), RepositoryError> {
        let tools_used = serde_json::to_string(&entry.tools_used)
            .map_err(|error| RepositoryError::Decode(format!("tools_used: {error}")))?;

        sqlx::query(
            "INSERT INTO context_entries
                (user_id, session_id, message, intent, confidence, agent, success, tools_used,
                 recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(&entry.message)
        .bind(&entry.intent)
        .bind(entry.confidence.clamp(0.0, 1.0))
        .bind(&entry.agent)
        .bind(entry.success)
        .bind(tools_used)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn accumulate(
        &self,
        user_id: &str,
        update: &PatternUpdate,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_PATTERN)
            .bind(user_id)
            .bind(&update.intent)
            .bind(update.confidence.clamp(0.0, 1.0))
            .bind(update.observed_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query(UPSERT_PREFERENCE)
            .bind(user_id)
            .bind(&update.agent)
            .bind(update.observed_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn context_from_row(row: &SqliteRow) -> Result<ContextEntry, RepositoryError> {
    let tools_used: String = row.try_get("tools_used")?;
    let tools_used = serde_json::from_str::<Vec<String>>(&tools_used)
        .map_err(|error| RepositoryError::Decode(format!("tools_used: {error}")))?;

    Ok(ContextEntry {
        session_id: row.try_get("session_id")?,
        message: row.try_get("message")?,
        intent: row.try_get("intent")?,
        confidence: row.try_get("confidence")?,
        agent: row.try_get("agent")?,
        success: row.try_get("success")?,
        tools_used,
        recorded_at: row.try_get("recorded_at")?,
    })
}

#[async_trait::async_trait]
impl MemoryStore for SqlMemoryStore {
    async fn get_recent_context(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextEntry>, CapabilityError> {
        Ok(self.recent(user_id, limit).await?)
    }

    async fn get_learned_patterns(&self, user_id: &str) -> Result<UserPatterns, CapabilityError> {
        Ok(self.patterns(user_id).await?)
    }

    async fn store_context(
        &self,
        user_id: &str,
        session_id: &str,
        entry: ContextEntry,
    ) -> Result<(), CapabilityError> {
        Ok(self.insert_context(user_id, session_id, &entry).await?)
    }

    async fn update_user_patterns(
        &self,
        user_id: &str,
        update: PatternUpdate,
    ) -> Result<(), CapabilityError> {
        Ok(self.accumulate(user_id, &update).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use hrflow_core::capabilities::{ContextEntry, MemoryStore, PatternUpdate};
    use hrflow_core::errors::CapabilityError;

    use super::SqlMemoryStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlMemoryStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlMemoryStore::new(pool)
    }

    fn entry(message: &str, minutes: i64) -> ContextEntry {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("timestamp");
        ContextEntry {
            session_id: "sess-sql".to_string(),
            message: message.to_string(),
            intent: "candidate_search".to_string(),
            confidence: 0.8,
            agent: "ats_agent".to_string(),
            success: true,
            tools_used: vec!["search_candidates".to_string(), "rank_candidates".to_string()],
            recorded_at: base + Duration::minutes(minutes),
        }
    }

    fn update(intent: &str, confidence: f64, agent: &str) -> PatternUpdate {
        PatternUpdate {
            intent: intent.to_string(),
            confidence,
            agent: agent.to_string(),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stored_context_reads_back_newest_first() {
        let store = store().await;
        store.store_context("EMP002", "sess-sql", entry("find java devs", 0)).await.expect("first");
        store.store_context("EMP002", "sess-sql", entry("rank them", 5)).await.expect("second");
        store.store_context("EMP003", "sess-other", entry("unrelated", 9)).await.expect("other");

        let recent = store.get_recent_context("EMP002", 10).await.expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "rank them");
        assert_eq!(recent[0].tools_used, vec!["search_candidates", "rank_candidates"]);
        assert!(recent[0].success);

        let limited = store.get_recent_context("EMP002", 1).await.expect("limited");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn pattern_upserts_accumulate_weighted_average() {
        let store = store().await;
        let updates = [
            update("leave_status", 0.9, "leave_agent"),
            update("leave_status", 0.3, "leave_agent"),
            update("leave_status", 0.6, "leave_agent"),
            update("payroll", 0.7, "payroll_agent"),
        ];
        for increment in updates {
            store.update_user_patterns("EMP001", increment).await.expect("update");
        }

        let patterns = store.get_learned_patterns("EMP001").await.expect("patterns");
        let leave = &patterns.intents["leave_status"];
        assert_eq!(leave.interaction_count, 3);
        assert!((leave.average_confidence - 0.6).abs() < 1e-9);
        assert!(leave.last_seen.is_some());
        assert_eq!(patterns.intents["payroll"].interaction_count, 1);
        assert_eq!(patterns.preferred_agent.as_deref(), Some("payroll_agent"));
        assert_eq!(patterns.dominant_intent(), Some("leave_status"));
    }

    #[tokio::test]
    async fn concurrent_upserts_do_not_lose_increments() {
        let store = std::sync::Arc::new(store().await);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.update_user_patterns("EMP004", update("help", 1.0, "router_agent")).await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("update");
        }

        let patterns = store.get_learned_patterns("EMP004").await.expect("patterns");
        assert_eq!(patterns.intents["help"].interaction_count, 8);
    }

    #[tokio::test]
    async fn unknown_user_has_no_patterns() {
        let store = store().await;
        let patterns = store.get_learned_patterns("nobody").await.expect("patterns");
        assert!(patterns.is_empty());
        assert_eq!(patterns.preferred_agent, None);
    }

    #[tokio::test]
    async fn closed_pool_surfaces_as_unavailable() {
        let store = store().await;
        store.pool.close().await;

        let error = store.get_recent_context("EMP001", 5).await.expect_err("pool closed");
        assert!(matches!(error, CapabilityError::Unavailable(_)));
    }
}

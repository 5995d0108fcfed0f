use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use riskgate_core::ContentType;
use riskgate_core::error::StoreError;
use riskgate_core::store::{
    AccountRecord, EngagementCounts, InteractionCounters, MAX_VIOLATION_HISTORY, TrustStore,
};
use riskgate_core::trust::{ViolationKind, ViolationRecord, ViolationSeverity};

/// Postgres-backed [`TrustStore`] over the `rl_*` tables.
#[derive(Clone)]
pub struct PgTrustStore {
    pool: PgPool,
}

impl PgTrustStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn clamp_spam_score(raw: i16) -> u8 {
    u8::try_from(raw.clamp(0, 100)).unwrap_or(100)
}

fn clamp_count(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    created_at: DateTime<Utc>,
    spam_score: Option<i16>,
    is_verified: bool,
}

#[derive(sqlx::FromRow)]
struct EngagementRow {
    posts: i64,
    comments: i64,
    likes: i64,
}

#[derive(sqlx::FromRow)]
struct ViolationRow {
    id: Uuid,
    kind: String,
    severity: String,
    occurred_at: DateTime<Utc>,
    details: serde_json::Value,
    resolved: bool,
}

impl From<ViolationRow> for ViolationRecord {
    fn from(row: ViolationRow) -> Self {
        ViolationRecord {
            id: row.id,
            kind: ViolationKind::from_db_value(&row.kind),
            severity: ViolationSeverity::from_db_value(&row.severity),
            timestamp: row.occurred_at,
            details: row.details,
            resolved: row.resolved,
        }
    }
}

/// The query reads newest first so `LIMIT` keeps the latest rows; callers
/// expect oldest first.
fn oldest_first(newest_first: Vec<ViolationRow>) -> Vec<ViolationRecord> {
    newest_first
        .into_iter()
        .rev()
        .map(ViolationRecord::from)
        .collect()
}

#[derive(sqlx::FromRow)]
struct CountersRow {
    rate_limit_violations: i64,
    successful_interactions: i64,
}

#[async_trait]
impl TrustStore for PgTrustStore {
    async fn account(&self, user_id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT created_at, spam_score, is_verified FROM rl_accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row.map(|row| AccountRecord {
            created_at: row.created_at,
            spam_score: row.spam_score.map(clamp_spam_score),
            is_verified: row.is_verified,
        }))
    }

    async fn upsert_account(
        &self,
        user_id: Uuid,
        account: AccountRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rl_accounts (user_id, created_at, spam_score, is_verified)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET created_at = EXCLUDED.created_at,
                spam_score = EXCLUDED.spam_score,
                is_verified = EXCLUDED.is_verified
            "#,
        )
        .bind(user_id)
        .bind(account.created_at)
        .bind(account.spam_score.map(|score| i16::from(score.min(100))))
        .bind(account.is_verified)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn engagement_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<EngagementCounts, StoreError> {
        let row = sqlx::query_as::<_, EngagementRow>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE content_type = 'post') AS posts,
                COUNT(*) FILTER (WHERE content_type = 'comment') AS comments,
                COUNT(*) FILTER (WHERE content_type = 'like') AS likes
            FROM rl_engagement_events
            WHERE user_id = $1 AND occurred_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(EngagementCounts {
            posts: clamp_count(row.posts),
            comments: clamp_count(row.comments),
            likes: clamp_count(row.likes),
        })
    }

    async fn violations(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ViolationRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ViolationRow>(
            r#"
            SELECT id, kind, severity, occurred_at, details, resolved
            FROM rl_violations
            WHERE user_id = $1 AND occurred_at >= $2
            ORDER BY occurred_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(MAX_VIOLATION_HISTORY as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(oldest_first(rows))
    }

    async fn interaction_counters(
        &self,
        user_id: Uuid,
    ) -> Result<InteractionCounters, StoreError> {
        let row = sqlx::query_as::<_, CountersRow>(
            r#"
            SELECT rate_limit_violations, successful_interactions
            FROM rl_interaction_counters
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(row
            .map(|row| InteractionCounters {
                rate_limit_violations: row.rate_limit_violations.max(0) as u64,
                successful_interactions: row.successful_interactions.max(0) as u64,
            })
            .unwrap_or_default())
    }

    async fn append_violation(
        &self,
        user_id: Uuid,
        record: ViolationRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        sqlx::query(
            r#"
            INSERT INTO rl_violations (id, user_id, kind, severity, occurred_at, details, resolved)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(user_id)
        .bind(record.kind.as_str())
        .bind(record.severity.as_str())
        .bind(record.timestamp)
        .bind(&record.details)
        .bind(record.resolved)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        if record.kind == ViolationKind::RateLimit {
            sqlx::query(
                r#"
                INSERT INTO rl_interaction_counters (user_id, rate_limit_violations)
                VALUES ($1, 1)
                ON CONFLICT (user_id) DO UPDATE
                SET rate_limit_violations = rl_interaction_counters.rate_limit_violations + 1,
                    updated_at = NOW()
                "#,
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)
    }

    async fn record_success(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        sqlx::query(
            r#"
            INSERT INTO rl_interaction_counters (user_id, successful_interactions)
            VALUES ($1, 1)
            ON CONFLICT (user_id) DO UPDATE
            SET successful_interactions = rl_interaction_counters.successful_interactions + 1,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        if matches!(
            content_type,
            ContentType::Post | ContentType::Comment | ContentType::Like
        ) {
            sqlx::query(
                "INSERT INTO rl_engagement_events (user_id, content_type, occurred_at) VALUES ($1, $2, $3)",
            )
            .bind(user_id)
            .bind(content_type.as_str())
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::{ViolationRow, clamp_count, clamp_spam_score, oldest_first, store_error};
    use chrono::{Duration, Utc};
    use riskgate_core::error::StoreError;
    use riskgate_core::trust::{ViolationKind, ViolationSeverity};
    use uuid::Uuid;

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert_eq!(clamp_spam_score(-3), 0);
        assert_eq!(clamp_spam_score(42), 42);
        assert_eq!(clamp_spam_score(250), 100);
        assert_eq!(clamp_count(-1), 0);
        assert_eq!(clamp_count(i64::MAX), u32::MAX);
    }

    #[test]
    fn pool_timeouts_count_as_unavailable() {
        assert!(matches!(
            store_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            store_error(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }

    #[test]
    fn newest_first_rows_are_returned_oldest_first() {
        let now = Utc::now();
        let row = |minutes_ago: i64, kind: &str| ViolationRow {
            id: Uuid::now_v7(),
            kind: kind.to_string(),
            severity: "high".to_string(),
            occurred_at: now - Duration::minutes(minutes_ago),
            details: serde_json::json!({}),
            resolved: false,
        };

        let records = oldest_first(vec![row(1, "rate_limit"), row(5, "spam"), row(9, "abuse")]);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind, ViolationKind::Abuse);
        assert_eq!(records[2].kind, ViolationKind::RateLimit);
        assert_eq!(records[2].severity, ViolationSeverity::High);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}

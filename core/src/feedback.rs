//! Feedback Recorder.
//!
//! Rate-limit outcomes flow back into the trust store. The `record_*` calls
//! spawn and return immediately; persistence failures are logged and dropped,
//! never surfaced to the request that produced them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::content::ContentType;
use crate::trust::{TrustProfileBuilder, ViolationKind, ViolationRecord, ViolationSeverity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ViolationDetails {
    pub endpoint: String,
    /// Adapted quota that was exceeded.
    pub limit: u64,
    /// Requests seen in the window, including the rejected one.
    pub actual: u64,
    pub window_ms: u64,
}

impl ViolationDetails {
    /// By overshoot ratio `actual / limit`: `>= 3` high, `>= 1.5` medium.
    pub fn severity(&self) -> ViolationSeverity {
        if self.limit == 0 {
            return ViolationSeverity::High;
        }
        let ratio = self.actual as f64 / self.limit as f64;
        if ratio >= 3.0 {
            ViolationSeverity::High
        } else if ratio >= 1.5 {
            ViolationSeverity::Medium
        } else {
            ViolationSeverity::Low
        }
    }
}

#[derive(Clone)]
pub struct FeedbackRecorder {
    trust: Arc<TrustProfileBuilder>,
}

impl FeedbackRecorder {
    pub fn new(trust: Arc<TrustProfileBuilder>) -> Self {
        Self { trust }
    }

    /// Fire-and-forget.
    pub fn record_violation(&self, user_id: Uuid, details: ViolationDetails) {
        let recorder = self.clone();
        tokio::spawn(async move {
            recorder.persist_violation(user_id, details, Utc::now()).await;
        });
    }

    /// Fire-and-forget.
    pub fn record_successful_interaction(&self, user_id: Uuid, content_type: ContentType) {
        let recorder = self.clone();
        tokio::spawn(async move {
            recorder
                .persist_success(user_id, content_type, Utc::now())
                .await;
        });
    }

    /// Returns whether the store accepted the write.
    pub async fn persist_violation(
        &self,
        user_id: Uuid,
        details: ViolationDetails,
        at: DateTime<Utc>,
    ) -> bool {
        let severity = details.severity();
        let payload = serde_json::to_value(&details).unwrap_or_default();
        let record = ViolationRecord::new(ViolationKind::RateLimit, severity, at, payload);

        let persisted = match self.trust.store().append_violation(user_id, record).await {
            Ok(()) => {
                tracing::info!(
                    user_id = %user_id,
                    endpoint = %details.endpoint,
                    limit = details.limit,
                    actual = details.actual,
                    severity = severity.as_str(),
                    "rate limit violation recorded"
                );
                true
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    user_id = %user_id,
                    endpoint = %details.endpoint,
                    "failed to record rate limit violation"
                );
                false
            }
        };
        self.trust.invalidate(user_id).await;
        persisted
    }

    pub async fn persist_success(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        at: DateTime<Utc>,
    ) -> bool {
        let persisted = match self
            .trust
            .store()
            .record_success(user_id, content_type, at)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    user_id = %user_id,
                    content_type = %content_type,
                    "failed to record successful interaction"
                );
                false
            }
        };
        self.trust.invalidate(user_id).await;
        persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{
        AccountRecord, EngagementCounts, InteractionCounters, MemoryTrustStore, TrustStore,
    };
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn details(limit: u64, actual: u64) -> ViolationDetails {
        ViolationDetails {
            endpoint: "/v1/posts".to_string(),
            limit,
            actual,
            window_ms: 60_000,
        }
    }

    #[test]
    fn severity_follows_overshoot() {
        assert_eq!(details(10, 11).severity(), ViolationSeverity::Low);
        assert_eq!(details(10, 15).severity(), ViolationSeverity::Medium);
        assert_eq!(details(10, 29).severity(), ViolationSeverity::Medium);
        assert_eq!(details(10, 30).severity(), ViolationSeverity::High);
        assert_eq!(details(0, 1).severity(), ViolationSeverity::High);
    }

    #[tokio::test]
    async fn violation_is_stored_and_refreshes_trust() {
        let store = Arc::new(MemoryTrustStore::new());
        let user_id = Uuid::now_v7();
        let now = Utc::now();
        store
            .upsert_account(
                user_id,
                AccountRecord {
                    created_at: now - ChronoDuration::days(60),
                    spam_score: Some(5),
                    is_verified: false,
                },
            )
            .await
            .unwrap();
        for _ in 0..12 {
            store.add_engagement(user_id, ContentType::Post, now).await;
        }

        let trust = Arc::new(TrustProfileBuilder::new(
            store.clone(),
            Duration::from_secs(3600),
        ));
        let recorder = FeedbackRecorder::new(trust.clone());
        assert_eq!(
            trust.profile_at(user_id, now).await.trust_level,
            crate::trust::TrustLevel::Trusted
        );

        assert!(recorder.persist_violation(user_id, details(5, 20), now).await);

        let stored = store
            .violations(user_id, now - ChronoDuration::days(1))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, ViolationKind::RateLimit);
        assert_eq!(stored[0].severity, ViolationSeverity::High);
        assert_eq!(stored[0].details["endpoint"], "/v1/posts");

        let refreshed = trust.profile_at(user_id, now).await;
        assert_eq!(refreshed.trust_level, crate::trust::TrustLevel::Untrusted);
        assert_eq!(refreshed.rate_limit_violations, 1);
    }

    #[tokio::test]
    async fn success_bumps_counter() {
        let store = Arc::new(MemoryTrustStore::new());
        let trust = Arc::new(TrustProfileBuilder::new(
            store.clone(),
            Duration::from_secs(3600),
        ));
        let recorder = FeedbackRecorder::new(trust);
        let user_id = Uuid::now_v7();

        assert!(
            recorder
                .persist_success(user_id, ContentType::Like, Utc::now())
                .await
        );
        assert_eq!(
            store.interaction_counters(user_id).await.unwrap(),
            InteractionCounters {
                rate_limit_violations: 0,
                successful_interactions: 1
            }
        );
    }

    struct DownStore;

    #[async_trait]
    impl TrustStore for DownStore {
        async fn account(&self, _: Uuid) -> Result<Option<AccountRecord>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn upsert_account(&self, _: Uuid, _: AccountRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn engagement_since(
            &self,
            _: Uuid,
            _: DateTime<Utc>,
        ) -> Result<EngagementCounts, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn violations(
            &self,
            _: Uuid,
            _: DateTime<Utc>,
        ) -> Result<Vec<ViolationRecord>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn interaction_counters(&self, _: Uuid) -> Result<InteractionCounters, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn append_violation(&self, _: Uuid, _: ViolationRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn record_success(
            &self,
            _: Uuid,
            _: ContentType,
            _: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let trust = Arc::new(TrustProfileBuilder::new(
            Arc::new(DownStore),
            Duration::from_secs(60),
        ));
        let recorder = FeedbackRecorder::new(trust);
        let user_id = Uuid::now_v7();

        assert!(
            !recorder
                .persist_violation(user_id, details(1, 2), Utc::now())
                .await
        );
        assert!(
            !recorder
                .persist_success(user_id, ContentType::Post, Utc::now())
                .await
        );
        // the spawned variants must not panic either
        recorder.record_violation(user_id, details(1, 2));
        recorder.record_successful_interaction(user_id, ContentType::Post);
        tokio::task::yield_now().await;
    }
}

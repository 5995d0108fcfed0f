//! Trust data source.
//!
//! The engine reads account facts, engagement and violation history through
//! [`TrustStore`] and writes feedback back through it. The API ships a Postgres
//! implementation; [`MemoryTrustStore`] backs tests and database-less runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::content::ContentType;
use crate::error::StoreError;
use crate::trust::{TRUST_WINDOW_DAYS, ViolationKind, ViolationRecord};

/// Most violations a store returns for one profile, and the most the memory
/// store keeps per user.
pub const MAX_VIOLATION_HISTORY: usize = 200;

/// Account facts owned by the user service.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub created_at: DateTime<Utc>,
    /// Latest score from the external spam classifier, if it has scored this user.
    pub spam_score: Option<u8>,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementCounts {
    pub posts: u32,
    pub comments: u32,
    pub likes: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionCounters {
    pub rate_limit_violations: u64,
    pub successful_interactions: u64,
}

#[async_trait]
pub trait TrustStore: Send + Sync {
    /// `Ok(None)` for an unknown user.
    async fn account(&self, user_id: Uuid) -> Result<Option<AccountRecord>, StoreError>;

    /// Creates or replaces the account facts for `user_id`.
    async fn upsert_account(
        &self,
        user_id: Uuid,
        account: AccountRecord,
    ) -> Result<(), StoreError>;

    async fn engagement_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<EngagementCounts, StoreError>;

    /// Violations at or after `since`, oldest first. At most
    /// [`MAX_VIOLATION_HISTORY`] records: the newest ones win.
    async fn violations(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ViolationRecord>, StoreError>;

    async fn interaction_counters(&self, user_id: Uuid)
    -> Result<InteractionCounters, StoreError>;

    /// Appends to the history; rate-limit violations also bump
    /// `rate_limit_violations`.
    async fn append_violation(
        &self,
        user_id: Uuid,
        record: ViolationRecord,
    ) -> Result<(), StoreError>;

    /// Bumps `successful_interactions`; posts, comments and likes also count
    /// towards engagement.
    async fn record_success(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryUser {
    account: Option<AccountRecord>,
    engagement: Vec<(ContentType, DateTime<Utc>)>,
    violations: Vec<ViolationRecord>,
    counters: InteractionCounters,
}

#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    users: RwLock<HashMap<Uuid, MemoryUser>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_engagement(&self, user_id: Uuid, content_type: ContentType, at: DateTime<Utc>) {
        let mut users = self.users.write().await;
        users.entry(user_id).or_default().push_engagement(content_type, at);
    }
}

impl MemoryUser {
    /// Entries older than the trust window relative to `at` can never be read
    /// again, so they are dropped on write.
    fn push_engagement(&mut self, content_type: ContentType, at: DateTime<Utc>) {
        let cutoff = at - ChronoDuration::days(TRUST_WINDOW_DAYS);
        self.engagement.retain(|(_, seen)| *seen >= cutoff);
        self.engagement.push((content_type, at));
    }

    fn push_violation(&mut self, record: ViolationRecord) {
        let cutoff = record.timestamp - ChronoDuration::days(TRUST_WINDOW_DAYS);
        self.violations.retain(|violation| violation.timestamp >= cutoff);
        self.violations.push(record);
        if self.violations.len() > MAX_VIOLATION_HISTORY {
            let excess = self.violations.len() - MAX_VIOLATION_HISTORY;
            self.violations.drain(..excess);
        }
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    async fn account(&self, user_id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(&user_id).and_then(|user| user.account.clone()))
    }

    async fn upsert_account(
        &self,
        user_id: Uuid,
        account: AccountRecord,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        users.entry(user_id).or_default().account = Some(account);
        Ok(())
    }

    async fn engagement_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<EngagementCounts, StoreError> {
        let users = self.users.read().await;
        let mut counts = EngagementCounts::default();
        let Some(user) = users.get(&user_id) else {
            return Ok(counts);
        };
        for (content_type, at) in &user.engagement {
            if *at < since {
                continue;
            }
            match content_type {
                ContentType::Post => counts.posts += 1,
                ContentType::Comment => counts.comments += 1,
                ContentType::Like => counts.likes += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn violations(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<ViolationRecord>, StoreError> {
        let users = self.users.read().await;
        let Some(user) = users.get(&user_id) else {
            return Ok(Vec::new());
        };
        let recent: Vec<ViolationRecord> = user
            .violations
            .iter()
            .filter(|violation| violation.timestamp >= since)
            .cloned()
            .collect();
        let skip = recent.len().saturating_sub(MAX_VIOLATION_HISTORY);
        Ok(recent.into_iter().skip(skip).collect())
    }

    async fn interaction_counters(
        &self,
        user_id: Uuid,
    ) -> Result<InteractionCounters, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(&user_id)
            .map(|user| user.counters)
            .unwrap_or_default())
    }

    async fn append_violation(
        &self,
        user_id: Uuid,
        record: ViolationRecord,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users.entry(user_id).or_default();
        if record.kind == ViolationKind::RateLimit {
            user.counters.rate_limit_violations += 1;
        }
        user.push_violation(record);
        Ok(())
    }

    async fn record_success(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users.entry(user_id).or_default();
        user.counters.successful_interactions += 1;
        if matches!(
            content_type,
            ContentType::Post | ContentType::Comment | ContentType::Like
        ) {
            user.push_engagement(content_type, at);
        }
        Ok(())
    }
}

//! Trust Profile Builder.
//!
//! Derives a per-user [`TrustProfile`] from account age, 30-day engagement and
//! violation history. Lookups never fail: an unknown user or any data-access
//! error yields [`TrustProfile::fallback`], so rate limiting degrades to the
//! strictest sensible setting instead of blocking on data errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{EngagementCounts, TrustStore};

/// Lookback for both engagement and "recent violation".
pub const TRUST_WINDOW_DAYS: i64 = 30;
pub const NEW_ACCOUNT_DAYS: i64 = 7;
pub const TRUSTED_MIN_ACCOUNT_DAYS: i64 = 30;
pub const TRUSTED_MIN_ENGAGEMENT: u8 = 50;
pub const UNTRUSTED_MAX_ENGAGEMENT: u8 = 20;
/// Spam score for users the classifier knows nothing about.
pub const NEUTRAL_SPAM_SCORE: u8 = 50;

const MAX_CACHED_PROFILES: usize = 10_000;
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(250);

/// Ordered by leniency: `New < Untrusted < Trusted < Verified`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    New,
    Untrusted,
    Trusted,
    Verified,
}

impl TrustLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustLevel::New => "new",
            TrustLevel::Untrusted => "untrusted",
            TrustLevel::Trusted => "trusted",
            TrustLevel::Verified => "verified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    RateLimit,
    Spam,
    Abuse,
    Manual,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::RateLimit => "rate_limit",
            ViolationKind::Spam => "spam",
            ViolationKind::Abuse => "abuse",
            ViolationKind::Manual => "manual",
        }
    }

    pub fn from_db_value(value: &str) -> Self {
        match value {
            "rate_limit" => ViolationKind::RateLimit,
            "spam" => ViolationKind::Spam,
            "abuse" => ViolationKind::Abuse,
            _ => ViolationKind::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ViolationSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationSeverity::Low => "low",
            ViolationSeverity::Medium => "medium",
            ViolationSeverity::High => "high",
            ViolationSeverity::Critical => "critical",
        }
    }

    pub fn from_db_value(value: &str) -> Self {
        match value {
            "medium" => ViolationSeverity::Medium,
            "high" => ViolationSeverity::High,
            "critical" => ViolationSeverity::Critical,
            _ => ViolationSeverity::Low,
        }
    }
}

/// Append-only moderation fact. Only `resolved` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ViolationRecord {
    pub id: Uuid,
    pub kind: ViolationKind,
    pub severity: ViolationSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    pub resolved: bool,
}

impl ViolationRecord {
    pub fn new(
        kind: ViolationKind,
        severity: ViolationSeverity,
        timestamp: DateTime<Utc>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            severity,
            timestamp,
            details,
            resolved: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    Store,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrustProfile {
    pub user_id: Uuid,
    pub trust_level: TrustLevel,
    pub account_age_days: i64,
    /// 0–100
    pub engagement_score: u8,
    /// 0–100, from the external classifier
    pub spam_score: u8,
    /// Violations inside the trust window, newest
    /// [`MAX_VIOLATION_HISTORY`](crate::store::MAX_VIOLATION_HISTORY) at most.
    pub violation_history: Vec<ViolationRecord>,
    pub rate_limit_violations: u64,
    pub successful_interactions: u64,
    pub source: ProfileSource,
    pub computed_at: DateTime<Utc>,
}

impl TrustProfile {
    /// Conservative profile used for unknown users and failed lookups.
    pub fn fallback(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            trust_level: TrustLevel::New,
            account_age_days: 0,
            engagement_score: 0,
            spam_score: NEUTRAL_SPAM_SCORE,
            violation_history: Vec::new(),
            rate_limit_violations: 0,
            successful_interactions: 0,
            source: ProfileSource::Fallback,
            computed_at: now,
        }
    }
}

/// `min(100, posts*5 + comments*3 + likes)`.
pub fn engagement_score(counts: EngagementCounts) -> u8 {
    let raw = u64::from(counts.posts) * 5 + u64::from(counts.comments) * 3 + u64::from(counts.likes);
    u8::try_from(raw.min(100)).unwrap_or(100)
}

pub fn has_recent_violation(violations: &[ViolationRecord], now: DateTime<Utc>) -> bool {
    let cutoff = now - ChronoDuration::days(TRUST_WINDOW_DAYS);
    violations.iter().any(|violation| violation.timestamp >= cutoff)
}

/// First match wins: verified, new account, recent violation or low engagement,
/// established and engaged, then untrusted.
pub fn classify_trust_level(
    is_verified: bool,
    account_age_days: i64,
    engagement_score: u8,
    recent_violation: bool,
) -> TrustLevel {
    if is_verified {
        TrustLevel::Verified
    } else if account_age_days < NEW_ACCOUNT_DAYS {
        TrustLevel::New
    } else if recent_violation || engagement_score < UNTRUSTED_MAX_ENGAGEMENT {
        TrustLevel::Untrusted
    } else if account_age_days >= TRUSTED_MIN_ACCOUNT_DAYS
        && engagement_score >= TRUSTED_MIN_ENGAGEMENT
    {
        TrustLevel::Trusted
    } else {
        TrustLevel::Untrusted
    }
}

#[derive(Debug, Clone)]
struct CachedProfile {
    profile: TrustProfile,
    fetched_at: Instant,
}

pub struct TrustProfileBuilder {
    store: Arc<dyn TrustStore>,
    cache: RwLock<HashMap<Uuid, CachedProfile>>,
    ttl: Duration,
    lookup_timeout: Duration,
    cache_capacity: usize,
}

impl TrustProfileBuilder {
    pub fn new(store: Arc<dyn TrustStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            ttl,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            cache_capacity: MAX_CACHED_PROFILES,
        }
    }

    /// A lookup that outlives `timeout` is abandoned in favour of the fallback.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Once `capacity` fresh profiles are cached, new ones are served uncached.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn store(&self) -> &Arc<dyn TrustStore> {
        &self.store
    }

    pub async fn profile(&self, user_id: Uuid) -> TrustProfile {
        self.profile_at(user_id, Utc::now()).await
    }

    /// Cached profile if still fresh, otherwise a recomputation against `now`.
    /// Fallback profiles are never cached so a transient store outage does not
    /// pin users to the default for a full TTL.
    pub async fn profile_at(&self, user_id: Uuid, now: DateTime<Utc>) -> TrustProfile {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&user_id)
                && entry.fetched_at.elapsed() < self.ttl
            {
                return entry.profile.clone();
            }
        }

        let lookup = tokio::time::timeout(self.lookup_timeout, self.compute(user_id, now)).await;
        match lookup {
            Ok(Ok(Some(profile))) => {
                self.remember(user_id, &profile).await;
                profile
            }
            Ok(Ok(None)) => {
                tracing::debug!(user_id = %user_id, "unknown user; using fallback trust profile");
                TrustProfile::fallback(user_id, now)
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    error = %err,
                    user_id = %user_id,
                    "trust profile lookup failed; falling back to default profile"
                );
                TrustProfile::fallback(user_id, now)
            }
            Err(_) => {
                tracing::warn!(
                    user_id = %user_id,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "trust profile lookup timed out; falling back to default profile"
                );
                TrustProfile::fallback(user_id, now)
            }
        }
    }

    async fn remember(&self, user_id: Uuid, profile: &TrustProfile) {
        let mut cache = self.cache.write().await;
        if cache.len() >= self.cache_capacity && !cache.contains_key(&user_id) {
            let ttl = self.ttl;
            cache.retain(|_, entry| entry.fetched_at.elapsed() < ttl);
            if cache.len() >= self.cache_capacity {
                tracing::debug!(
                    user_id = %user_id,
                    cached = cache.len(),
                    "trust profile cache full; serving uncached"
                );
                return;
            }
        }
        cache.insert(
            user_id,
            CachedProfile {
                profile: profile.clone(),
                fetched_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Drop the cached profile so the next lookup recomputes it.
    pub async fn invalidate(&self, user_id: Uuid) {
        self.cache.write().await.remove(&user_id);
    }

    async fn compute(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<TrustProfile>, StoreError> {
        let Some(account) = self.store.account(user_id).await? else {
            return Ok(None);
        };

        let since = now - ChronoDuration::days(TRUST_WINDOW_DAYS);
        let engagement = engagement_score(self.store.engagement_since(user_id, since).await?);
        let violation_history = self.store.violations(user_id, since).await?;
        let counters = self.store.interaction_counters(user_id).await?;

        let account_age_days = (now - account.created_at).num_days().max(0);
        let trust_level = classify_trust_level(
            account.is_verified,
            account_age_days,
            engagement,
            has_recent_violation(&violation_history, now),
        );

        Ok(Some(TrustProfile {
            user_id,
            trust_level,
            account_age_days,
            engagement_score: engagement,
            // Not yet scored by the classifier: no evidence of spam.
            spam_score: account.spam_score.unwrap_or(0).min(100),
            violation_history,
            rate_limit_violations: counters.rate_limit_violations,
            successful_interactions: counters.successful_interactions,
            source: ProfileSource::Store,
            computed_at: now,
        }))
    }
}

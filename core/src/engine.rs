use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{AdaptiveRateLimitConfig, BaselineQuota, EngineSettings, SharedConfig};
use crate::content::ContentType;
use crate::emergency::{EmergencyController, EmergencyModeState};
use crate::error::{ConfigError, StoreError};
use crate::feedback::{FeedbackRecorder, ViolationDetails};
use crate::load::{MetricsSampler, SystemLoadMonitor, SystemLoadSnapshot, TrafficCounters};
use crate::scorer::{AdaptiveResult, AdaptiveScorer};
use crate::store::{AccountRecord, TrustStore};
use crate::trust::{TrustProfile, TrustProfileBuilder};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SystemStatus {
    pub metrics: SystemLoadSnapshot,
    pub emergency_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_mode_duration_ms: Option<i64>,
}

/// Owns every engine component. Built once by the host process, shared behind
/// an `Arc`. Background tasks only run between [`start`](Self::start) and
/// [`stop`](Self::stop).
pub struct RateLimitEngine {
    config: SharedConfig,
    trust: Arc<TrustProfileBuilder>,
    monitor: Arc<SystemLoadMonitor>,
    emergency: Arc<EmergencyController>,
    scorer: AdaptiveScorer,
    feedback: FeedbackRecorder,
}

impl RateLimitEngine {
    pub fn new(
        store: Arc<dyn TrustStore>,
        sampler: Arc<dyn MetricsSampler>,
        traffic: Arc<TrafficCounters>,
        config: AdaptiveRateLimitConfig,
        settings: EngineSettings,
    ) -> Self {
        let config = SharedConfig::new(config);
        let trust = Arc::new(
            TrustProfileBuilder::new(store, settings.trust_cache_ttl)
                .with_lookup_timeout(settings.trust_lookup_timeout),
        );
        let monitor = Arc::new(SystemLoadMonitor::new(
            sampler,
            traffic,
            settings.sample_interval,
        ));
        let emergency = Arc::new(EmergencyController::new(
            monitor.clone(),
            config.clone(),
            settings.emergency_check_interval,
        ));
        let scorer = AdaptiveScorer::new(
            trust.clone(),
            monitor.clone(),
            emergency.clone(),
            config.clone(),
        );
        let feedback = FeedbackRecorder::new(trust.clone());

        Self {
            config,
            trust,
            monitor,
            emergency,
            scorer,
            feedback,
        }
    }

    pub async fn calculate_adaptive_rate_limit(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        baseline: BaselineQuota,
    ) -> AdaptiveResult {
        self.scorer.calculate(user_id, content_type, baseline).await
    }

    pub fn record_violation(&self, user_id: Uuid, details: ViolationDetails) {
        self.feedback.record_violation(user_id, details);
    }

    pub fn record_successful_interaction(&self, user_id: Uuid, content_type: ContentType) {
        self.feedback
            .record_successful_interaction(user_id, content_type);
    }

    pub fn system_status(&self) -> SystemStatus {
        let now = Utc::now();
        let state = self.emergency.state();
        SystemStatus {
            metrics: (*self.monitor.snapshot()).clone(),
            emergency_mode: state.active,
            emergency_mode_duration_ms: state.duration_at(now).map(|d| d.num_milliseconds()),
        }
    }

    /// Merge a partial config into the live one. Rejected patches leave the
    /// current config untouched.
    pub fn update_config(
        &self,
        patch: &serde_json::Value,
    ) -> Result<Arc<AdaptiveRateLimitConfig>, ConfigError> {
        match self.config.update(patch) {
            Ok(config) => {
                tracing::info!(patch = %patch, "rate limit config updated");
                Ok(config)
            }
            Err(err) => {
                tracing::warn!(error = %err, patch = %patch, "rejected rate limit config update");
                Err(err)
            }
        }
    }

    pub fn config(&self) -> Arc<AdaptiveRateLimitConfig> {
        self.config.current()
    }

    pub async fn trust_profile(&self, user_id: Uuid) -> TrustProfile {
        self.trust.profile(user_id).await
    }

    /// Write account facts and return the profile recomputed from them.
    pub async fn upsert_account(
        &self,
        user_id: Uuid,
        account: AccountRecord,
    ) -> Result<TrustProfile, StoreError> {
        self.trust.store().upsert_account(user_id, account).await?;
        self.trust.invalidate(user_id).await;
        Ok(self.trust.profile(user_id).await)
    }

    pub fn emergency_state(&self) -> EmergencyModeState {
        self.emergency.state()
    }

    pub fn traffic(&self) -> &Arc<TrafficCounters> {
        self.monitor.traffic()
    }

    pub fn monitor(&self) -> &Arc<SystemLoadMonitor> {
        &self.monitor
    }

    pub fn emergency(&self) -> &Arc<EmergencyController> {
        &self.emergency
    }

    /// Start the load sampler and the emergency check. Idempotent.
    pub async fn start(&self) {
        self.monitor.start().await;
        self.emergency.start().await;
    }

    /// Idempotent.
    pub async fn stop(&self) {
        self.emergency.stop().await;
        self.monitor.stop().await;
    }
}

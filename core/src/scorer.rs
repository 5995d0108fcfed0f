//! Adaptive Scorer.
//!
//! `total = spam × trust × load × content`, then `× emergency_multiplier`
//! while emergency mode is active. The derived quota keeps the caller's
//! window and allows `max(1, floor(baseline.max × total))` requests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{AdaptiveRateLimitConfig, BaselineQuota, SharedConfig};
use crate::content::ContentType;
use crate::emergency::EmergencyController;
use crate::load::{SystemLoadMonitor, SystemLoadSnapshot};
use crate::trust::{TrustProfile, TrustProfileBuilder};

/// Absorbs float noise so e.g. `100 × 0.07` lands on 7, not 6.
const FLOOR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SpamBand {
    Low,
    Medium,
    High,
    Critical,
}

impl SpamBand {
    /// `0..=25` low, `26..=50` medium, `51..=75` high, `76..` critical.
    pub fn classify(spam_score: u8) -> Self {
        match spam_score {
            0..=25 => SpamBand::Low,
            26..=50 => SpamBand::Medium,
            51..=75 => SpamBand::High,
            _ => SpamBand::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpamBand::Low => "low",
            SpamBand::Medium => "medium",
            SpamBand::High => "high",
            SpamBand::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    Spam,
    Trust,
    SystemLoad,
    ContentType,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AppliedMultiplier {
    pub factor: RiskFactor,
    /// Bucket the input fell into (`high`, `trusted`, `upload`, ...)
    pub bucket: String,
    pub multiplier: f64,
}

/// Quota the caller should enforce for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct AdaptiveQuota {
    pub window_ms: u64,
    /// Always at least 1.
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AdaptiveResult {
    pub config: AdaptiveQuota,
    /// Human-readable, in application order.
    pub reasoning: Vec<String>,
    pub applied_multiplier: f64,
    pub factors: Vec<AppliedMultiplier>,
    pub trust_profile: TrustProfile,
}

/// Pure scoring step. Identical inputs give identical results.
pub fn compute_adaptive_limit(
    profile: TrustProfile,
    content_type: ContentType,
    baseline: BaselineQuota,
    snapshot: &SystemLoadSnapshot,
    emergency_active: bool,
    config: &AdaptiveRateLimitConfig,
) -> AdaptiveResult {
    let spam_band = SpamBand::classify(profile.spam_score);
    let load_band = snapshot.band();

    let mut factors = vec![
        AppliedMultiplier {
            factor: RiskFactor::Spam,
            bucket: spam_band.as_str().to_string(),
            multiplier: config.spam.get(spam_band),
        },
        AppliedMultiplier {
            factor: RiskFactor::Trust,
            bucket: profile.trust_level.as_str().to_string(),
            multiplier: config.trust.get(profile.trust_level),
        },
        AppliedMultiplier {
            factor: RiskFactor::SystemLoad,
            bucket: load_band.as_str().to_string(),
            multiplier: config.load.get(load_band),
        },
        AppliedMultiplier {
            factor: RiskFactor::ContentType,
            bucket: content_type.as_str().to_string(),
            multiplier: config.content.get(content_type),
        },
    ];
    if emergency_active && config.emergency.enabled {
        factors.push(AppliedMultiplier {
            factor: RiskFactor::Emergency,
            bucket: "active".to_string(),
            multiplier: config.emergency.emergency_multiplier,
        });
    }

    let total: f64 = factors.iter().map(|f| f.multiplier).product();

    let reasoning = factors
        .iter()
        .map(|f| match f.factor {
            RiskFactor::Spam => format!(
                "spam score {} ({}): x{:.2}",
                profile.spam_score, f.bucket, f.multiplier
            ),
            RiskFactor::Trust => format!("trust level {}: x{:.2}", f.bucket, f.multiplier),
            RiskFactor::SystemLoad => format!(
                "system load {:.0}% ({}): x{:.2}",
                snapshot.peak_utilization(),
                f.bucket,
                f.multiplier
            ),
            RiskFactor::ContentType => format!("content type {}: x{:.2}", f.bucket, f.multiplier),
            RiskFactor::Emergency => format!("emergency mode active: x{:.2}", f.multiplier),
        })
        .collect();

    AdaptiveResult {
        config: AdaptiveQuota {
            window_ms: baseline.window_ms,
            max: adapted_max(baseline.max, total),
        },
        reasoning,
        applied_multiplier: total,
        factors,
        trust_profile: profile,
    }
}

/// `max(1, floor(max × total))`; a non-positive baseline clamps to 1.
fn adapted_max(baseline_max: i64, total: f64) -> u64 {
    if baseline_max <= 0 || !total.is_finite() || total <= 0.0 {
        return 1;
    }
    let scaled = (baseline_max as f64 * total + FLOOR_EPSILON).floor();
    // float-to-int casts saturate
    (scaled as u64).max(1)
}

/// Composes the trust builder, the latest load snapshot and the emergency
/// state into a per-request quota.
pub struct AdaptiveScorer {
    trust: Arc<TrustProfileBuilder>,
    monitor: Arc<SystemLoadMonitor>,
    emergency: Arc<EmergencyController>,
    config: SharedConfig,
}

impl AdaptiveScorer {
    pub fn new(
        trust: Arc<TrustProfileBuilder>,
        monitor: Arc<SystemLoadMonitor>,
        emergency: Arc<EmergencyController>,
        config: SharedConfig,
    ) -> Self {
        Self {
            trust,
            monitor,
            emergency,
            config,
        }
    }

    pub async fn calculate(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        baseline: BaselineQuota,
    ) -> AdaptiveResult {
        let profile = self.trust.profile(user_id).await;
        let snapshot = self.monitor.snapshot();
        let emergency = self.emergency.state();
        let config = self.config.current();

        let result = compute_adaptive_limit(
            profile,
            content_type,
            baseline,
            &snapshot,
            emergency.active,
            &config,
        );
        tracing::debug!(
            user_id = %user_id,
            content_type = %content_type,
            baseline_max = baseline.max,
            adaptive_max = result.config.max,
            applied_multiplier = result.applied_multiplier,
            "adaptive rate limit computed"
        );
        result
    }
}

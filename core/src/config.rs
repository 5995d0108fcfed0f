//! Engine configuration.
//!
//! [`AdaptiveRateLimitConfig`] is the live, admin-updatable part (baseline,
//! multiplier tables, emergency parameters). [`EngineSettings`] holds the
//! process-level knobs (task intervals, cache TTL) that are fixed at startup.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use utoipa::ToSchema;

use crate::content::ContentType;
use crate::error::ConfigError;
use crate::load::LoadBand;
use crate::scorer::SpamBand;
use crate::trust::TrustLevel;

/// Caller-supplied quota before adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct BaselineQuota {
    pub window_ms: u64,
    /// May be zero or negative when a caller misconfigures it; the derived
    /// quota is still clamped to one request per window.
    pub max: i64,
}

impl Default for BaselineQuota {
    fn default() -> Self {
        Self {
            window_ms: 15 * 60 * 1000,
            max: 100,
        }
    }
}

impl BaselineQuota {
    pub fn new(max: i64, window_ms: u64) -> Self {
        Self { window_ms, max }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct SpamMultipliers {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SpamMultipliers {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 0.7,
            high: 0.4,
            critical: 0.1,
        }
    }
}

impl SpamMultipliers {
    pub fn get(&self, band: SpamBand) -> f64 {
        match band {
            SpamBand::Low => self.low,
            SpamBand::Medium => self.medium,
            SpamBand::High => self.high,
            SpamBand::Critical => self.critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct TrustMultipliers {
    pub new: f64,
    pub untrusted: f64,
    pub trusted: f64,
    pub verified: f64,
}

impl Default for TrustMultipliers {
    fn default() -> Self {
        Self {
            new: 0.5,
            untrusted: 0.7,
            trusted: 1.0,
            verified: 1.5,
        }
    }
}

impl TrustMultipliers {
    pub fn get(&self, level: TrustLevel) -> f64 {
        match level {
            TrustLevel::New => self.new,
            TrustLevel::Untrusted => self.untrusted,
            TrustLevel::Trusted => self.trusted,
            TrustLevel::Verified => self.verified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct LoadMultipliers {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for LoadMultipliers {
    fn default() -> Self {
        Self {
            low: 1.2,
            medium: 1.0,
            high: 0.7,
            critical: 0.3,
        }
    }
}

impl LoadMultipliers {
    pub fn get(&self, band: LoadBand) -> f64 {
        match band {
            LoadBand::Low => self.low,
            LoadBand::Medium => self.medium,
            LoadBand::High => self.high,
            LoadBand::Critical => self.critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ContentMultipliers {
    pub post: f64,
    pub comment: f64,
    pub like: f64,
    pub report: f64,
    pub upload: f64,
    pub message: f64,
    pub follow: f64,
}

impl Default for ContentMultipliers {
    fn default() -> Self {
        Self {
            post: 1.0,
            comment: 1.0,
            like: 1.5,
            report: 0.5,
            upload: 0.3,
            message: 0.8,
            follow: 1.2,
        }
    }
}

impl ContentMultipliers {
    pub fn get(&self, content_type: ContentType) -> f64 {
        match content_type {
            ContentType::Post => self.post,
            ContentType::Comment => self.comment,
            ContentType::Like => self.like,
            ContentType::Report => self.report,
            ContentType::Upload => self.upload,
            ContentType::Message => self.message,
            ContentType::Follow => self.follow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct EmergencyConfig {
    pub enabled: bool,
    /// Percent; compared against `max(cpu, memory)`.
    pub trigger_threshold: f64,
    pub emergency_multiplier: f64,
    pub max_duration_minutes: u64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_threshold: 90.0,
            emergency_multiplier: 0.1,
            max_duration_minutes: 30,
        }
    }
}

impl EmergencyConfig {
    pub fn max_duration(&self) -> chrono::Duration {
        i64::try_from(self.max_duration_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptiveRateLimitConfig {
    pub baseline: BaselineQuota,
    pub spam: SpamMultipliers,
    pub trust: TrustMultipliers,
    pub load: LoadMultipliers,
    pub content: ContentMultipliers,
    pub emergency: EmergencyConfig,
}

impl AdaptiveRateLimitConfig {
    /// Defaults, then `RISKGATE_CONFIG_FILE` (full or partial JSON), then the
    /// individual `RISKGATE_EMERGENCY_*` overrides. The result is validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RISKGATE_CONFIG_FILE") {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Io(format!("{path}: {e}")))?;
            let patch: serde_json::Value =
                serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(format!("{path}: {e}")))?;
            config = config.merged(&patch)?;
        }

        if let Some(enabled) = env_parse::<bool>("RISKGATE_EMERGENCY_ENABLED")? {
            config.emergency.enabled = enabled;
        }
        if let Some(threshold) = env_parse::<f64>("RISKGATE_EMERGENCY_THRESHOLD")? {
            config.emergency.trigger_threshold = threshold;
        }
        if let Some(multiplier) = env_parse::<f64>("RISKGATE_EMERGENCY_MULTIPLIER")? {
            config.emergency.emergency_multiplier = multiplier;
        }
        if let Some(minutes) = env_parse::<u64>("RISKGATE_EMERGENCY_MAX_MINUTES")? {
            config.emergency.max_duration_minutes = minutes;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply a partial JSON object on top of this config and validate the result.
    /// Nested tables merge field by field; unknown keys are rejected.
    pub fn apply_patch(&self, patch: &serde_json::Value) -> Result<Self, ConfigError> {
        let merged = self.merged(patch)?;
        merged.validate()?;
        Ok(merged)
    }

    fn merged(&self, patch: &serde_json::Value) -> Result<Self, ConfigError> {
        if !patch.is_object() {
            return Err(ConfigError::Parse(
                "config patch must be a JSON object".to_string(),
            ));
        }
        let mut current =
            serde_json::to_value(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        merge_json(&mut current, patch);
        serde_json::from_value(current).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baseline.window_ms == 0 {
            return Err(ConfigError::EmptyWindow);
        }

        let spam = [
            ("spam.low", self.spam.low),
            ("spam.medium", self.spam.medium),
            ("spam.high", self.spam.high),
            ("spam.critical", self.spam.critical),
        ];
        let trust = [
            ("trust.new", self.trust.new),
            ("trust.untrusted", self.trust.untrusted),
            ("trust.trusted", self.trust.trusted),
            ("trust.verified", self.trust.verified),
        ];
        let load = [
            ("load.low", self.load.low),
            ("load.medium", self.load.medium),
            ("load.high", self.load.high),
            ("load.critical", self.load.critical),
        ];
        let content = ContentType::ALL.map(|content_type| {
            (content_field(content_type), self.content.get(content_type))
        });

        for (field, value) in spam.iter().chain(&trust).chain(&load).chain(&content) {
            if !value.is_finite() || *value <= 0.0 {
                return Err(ConfigError::NonPositiveMultiplier {
                    field: *field,
                    value: *value,
                });
            }
        }

        for (field, value) in spam {
            if value > 1.0 {
                return Err(ConfigError::SpamMultiplierAboveOne { field, value });
            }
        }
        if !(self.spam.low > self.spam.medium
            && self.spam.medium > self.spam.high
            && self.spam.high > self.spam.critical)
        {
            return Err(ConfigError::NotMonotonic {
                table: "spam",
                expected: "low > medium > high > critical",
            });
        }

        if !(self.trust.new <= self.trust.untrusted
            && self.trust.untrusted < self.trust.trusted
            && self.trust.trusted < self.trust.verified)
        {
            return Err(ConfigError::NotMonotonic {
                table: "trust",
                expected: "new <= untrusted < trusted < verified",
            });
        }

        if !(self.load.low >= self.load.medium
            && self.load.medium >= self.load.high
            && self.load.high >= self.load.critical)
        {
            return Err(ConfigError::NotMonotonic {
                table: "load",
                expected: "low >= medium >= high >= critical",
            });
        }

        let emergency = &self.emergency;
        if !emergency.emergency_multiplier.is_finite()
            || emergency.emergency_multiplier <= 0.0
            || emergency.emergency_multiplier > 1.0
        {
            return Err(ConfigError::EmergencyMultiplierOutOfRange(
                emergency.emergency_multiplier,
            ));
        }
        if !emergency.trigger_threshold.is_finite()
            || emergency.trigger_threshold <= 0.0
            || emergency.trigger_threshold > 100.0
        {
            return Err(ConfigError::TriggerThresholdOutOfRange(
                emergency.trigger_threshold,
            ));
        }
        if emergency.max_duration_minutes == 0 {
            return Err(ConfigError::MaxDurationTooShort);
        }

        Ok(())
    }
}

fn content_field(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Post => "content.post",
        ContentType::Comment => "content.comment",
        ContentType::Like => "content.like",
        ContentType::Report => "content.report",
        ContentType::Upload => "content.upload",
        ContentType::Message => "content.message",
        ContentType::Follow => "content.follow",
    }
}

fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value);
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Live config shared by the scorer and the emergency controller.
///
/// Updates replace the whole value, so a reader never sees half of a patch.
#[derive(Clone)]
pub struct SharedConfig {
    tx: Arc<watch::Sender<Arc<AdaptiveRateLimitConfig>>>,
}

impl SharedConfig {
    pub fn new(config: AdaptiveRateLimitConfig) -> Self {
        let (tx, _) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<AdaptiveRateLimitConfig> {
        self.tx.borrow().clone()
    }

    /// On error the previous config stays in force.
    pub fn update(
        &self,
        patch: &serde_json::Value,
    ) -> Result<Arc<AdaptiveRateLimitConfig>, ConfigError> {
        let next = Arc::new(self.current().apply_patch(patch)?);
        self.tx.send_replace(next.clone());
        Ok(next)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AdaptiveRateLimitConfig>> {
        self.tx.subscribe()
    }
}

/// Process-level settings, read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub sample_interval: Duration,
    /// Coarser than sampling so a single noisy sample cannot flap the mode.
    pub emergency_check_interval: Duration,
    pub trust_cache_ttl: Duration,
    /// Upper bound on one trust store lookup before the fallback profile is used.
    pub trust_lookup_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(30),
            emergency_check_interval: Duration::from_secs(60),
            trust_cache_ttl: Duration::from_secs(30 * 60),
            trust_lookup_timeout: Duration::from_millis(250),
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let sample_secs = env_parse::<u64>("RISKGATE_SAMPLE_INTERVAL_SECS")?
            .unwrap_or(defaults.sample_interval.as_secs());
        let check_secs = env_parse::<u64>("RISKGATE_EMERGENCY_CHECK_INTERVAL_SECS")?
            .unwrap_or(sample_secs.saturating_mul(2));
        let ttl_secs = env_parse::<u64>("RISKGATE_TRUST_CACHE_TTL_SECS")?
            .unwrap_or(defaults.trust_cache_ttl.as_secs());
        let lookup_ms = env_parse::<u64>("RISKGATE_TRUST_LOOKUP_TIMEOUT_MS")?
            .unwrap_or(defaults.trust_lookup_timeout.as_millis() as u64);

        if sample_secs == 0 {
            return Err(ConfigError::IntervalTooShort("RISKGATE_SAMPLE_INTERVAL_SECS"));
        }
        if check_secs == 0 {
            return Err(ConfigError::IntervalTooShort(
                "RISKGATE_EMERGENCY_CHECK_INTERVAL_SECS",
            ));
        }
        if lookup_ms == 0 {
            return Err(ConfigError::IntervalTooShort(
                "RISKGATE_TRUST_LOOKUP_TIMEOUT_MS",
            ));
        }

        Ok(Self {
            sample_interval: Duration::from_secs(sample_secs),
            emergency_check_interval: Duration::from_secs(check_secs),
            trust_cache_ttl: Duration::from_secs(ttl_secs),
            trust_lookup_timeout: Duration::from_millis(lookup_ms),
        })
    }
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("{key}={raw} is not a valid value"))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shipped_defaults_validate() {
        assert_eq!(AdaptiveRateLimitConfig::default().validate(), Ok(()));
    }

    #[test]
    fn shipped_trust_table_orders_leniency() {
        let trust = TrustMultipliers::default();
        assert!(trust.new <= trust.untrusted);
        assert!(trust.untrusted < trust.trusted);
        assert!(trust.trusted < trust.verified);
    }

    #[test]
    fn shipped_spam_table_only_tightens() {
        let spam = SpamMultipliers::default();
        assert!(spam.low <= 1.0);
        assert!(spam.low > spam.medium && spam.medium > spam.high && spam.high > spam.critical);
    }

    #[test]
    fn shipped_load_table_rewards_headroom() {
        let load = LoadMultipliers::default();
        assert!(load.low > 1.0);
        assert_eq!(load.medium, 1.0);
        assert!(load.high < 1.0);
        assert!(load.critical < load.high);
    }

    #[test]
    fn shipped_content_weights_favor_cheap_actions() {
        let content = ContentMultipliers::default();
        assert!(content.get(ContentType::Like) > 1.0);
        assert!(content.get(ContentType::Upload) < 1.0);
    }

    #[test]
    fn patch_merges_nested_fields_and_keeps_the_rest() {
        let config = AdaptiveRateLimitConfig::default();
        let updated = config
            .apply_patch(&json!({
                "emergency": { "emergency_multiplier": 0.25 },
                "content": { "upload": 0.2 }
            }))
            .unwrap();
        assert_eq!(updated.emergency.emergency_multiplier, 0.25);
        assert_eq!(updated.emergency.trigger_threshold, 90.0);
        assert_eq!(updated.content.upload, 0.2);
        assert_eq!(updated.content.like, 1.5);
        assert_eq!(updated.trust, config.trust);
    }

    #[test]
    fn patch_rejects_inverted_trust_table() {
        let err = AdaptiveRateLimitConfig::default()
            .apply_patch(&json!({ "trust": { "verified": 0.4 } }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotMonotonic { table: "trust", .. }));
    }

    #[test]
    fn patch_rejects_spam_multiplier_that_loosens() {
        let err = AdaptiveRateLimitConfig::default()
            .apply_patch(&json!({ "spam": { "low": 1.3 } }))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::SpamMultiplierAboveOne {
                field: "spam.low",
                value: 1.3
            }
        );
    }

    #[test]
    fn patch_rejects_unknown_keys_and_non_objects() {
        let config = AdaptiveRateLimitConfig::default();
        assert!(matches!(
            config.apply_patch(&json!({ "trust": { "admin": 9.0 } })),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            config.apply_patch(&json!([1, 2])),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_multiplier_is_rejected() {
        let err = AdaptiveRateLimitConfig::default()
            .apply_patch(&json!({ "content": { "report": 0.0 } }))
            .unwrap_err();
        assert_eq!(err.field(), Some("content.report"));
    }

    #[test]
    fn emergency_ranges_are_enforced() {
        let config = AdaptiveRateLimitConfig::default();
        assert!(matches!(
            config.apply_patch(&json!({ "emergency": { "emergency_multiplier": 1.5 } })),
            Err(ConfigError::EmergencyMultiplierOutOfRange(_))
        ));
        assert!(matches!(
            config.apply_patch(&json!({ "emergency": { "trigger_threshold": 120.0 } })),
            Err(ConfigError::TriggerThresholdOutOfRange(_))
        ));
        assert_eq!(
            config.apply_patch(&json!({ "emergency": { "max_duration_minutes": 0 } })),
            Err(ConfigError::MaxDurationTooShort)
        );
    }

    #[test]
    fn shared_config_keeps_previous_value_on_rejected_update() {
        let shared = SharedConfig::new(AdaptiveRateLimitConfig::default());
        let updated = shared
            .update(&json!({ "baseline": { "max": 40 } }))
            .unwrap();
        assert_eq!(updated.baseline.max, 40);

        assert!(shared.update(&json!({ "load": { "low": -1.0 } })).is_err());
        assert_eq!(shared.current().baseline.max, 40);
        assert_eq!(shared.current().load, LoadMultipliers::default());
    }

    #[test]
    fn default_emergency_check_is_coarser_than_sampling() {
        let settings = EngineSettings::default();
        assert_eq!(
            settings.emergency_check_interval,
            settings.sample_interval * 2
        );
    }

    #[test]
    fn trust_lookup_is_bounded_by_default() {
        let settings = EngineSettings::default();
        assert_eq!(settings.trust_lookup_timeout, Duration::from_millis(250));
        assert!(settings.trust_lookup_timeout < settings.sample_interval);
    }
}

use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response shared by the API and the CLI.
/// Every error carries enough context for an operator or client to see
/// what was rejected and how to correct it.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (see [`codes`])
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INVALID_CONFIG: &str = "invalid_config";
}

/// Failure of the trust data source (account records, engagement, violations).
///
/// Reads and feedback writes never surface it: the trust builder and feedback
/// recorder map it to a safe default or a logged warning. Only explicit
/// account writes return it to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("trust store unavailable: {0}")]
    Unavailable(String),
    #[error("trust store query failed: {0}")]
    Query(String),
}

/// Rejected configuration. Returned at startup and from `update_config`;
/// the previously active configuration stays in force.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("multiplier `{field}` must be finite and greater than zero (got {value})")]
    NonPositiveMultiplier { field: &'static str, value: f64 },
    #[error("spam multiplier `{field}` must not exceed 1.0 (got {value})")]
    SpamMultiplierAboveOne { field: &'static str, value: f64 },
    #[error("{table} multipliers must be ordered {expected}")]
    NotMonotonic {
        table: &'static str,
        expected: &'static str,
    },
    #[error("emergency multiplier must be in (0, 1] (got {0})")]
    EmergencyMultiplierOutOfRange(f64),
    #[error("emergency trigger threshold must be in (0, 100] (got {0})")]
    TriggerThresholdOutOfRange(f64),
    #[error("emergency max duration must be at least one minute")]
    MaxDurationTooShort,
    #[error("baseline window must be greater than zero")]
    EmptyWindow,
    #[error("interval `{0}` must be greater than zero")]
    IntervalTooShort(&'static str),
    #[error("failed to read config file: {0}")]
    Io(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Dotted path of the offending field, for API error bodies.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::NonPositiveMultiplier { field, .. }
            | ConfigError::SpamMultiplierAboveOne { field, .. } => Some(field),
            ConfigError::NotMonotonic { table, .. } => Some(table),
            ConfigError::EmergencyMultiplierOutOfRange(_) => Some("emergency.emergency_multiplier"),
            ConfigError::TriggerThresholdOutOfRange(_) => Some("emergency.trigger_threshold"),
            ConfigError::MaxDurationTooShort => Some("emergency.max_duration_minutes"),
            ConfigError::EmptyWindow => Some("baseline.window_ms"),
            ConfigError::IntervalTooShort(field) => Some(field),
            ConfigError::Io(_) | ConfigError::Parse(_) => None,
        }
    }
}

/// Host metrics could not be sampled. The monitor keeps the previous snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SamplingError {
    #[error("failed to read {source_name}: {message}")]
    Read {
        source_name: &'static str,
        message: String,
    },
    #[error("malformed {source_name}: {message}")]
    Malformed {
        source_name: &'static str,
        message: String,
    },
}

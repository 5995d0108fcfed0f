use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use riskgate_core::error::ApiError;
use riskgate_core::scorer::AdaptiveResult;
use riskgate_core::store::AccountRecord;
use riskgate_core::trust::TrustProfile;
use riskgate_core::{AdaptiveRateLimitConfig, BaselineQuota, ContentType};

use crate::auth::AdminAccess;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/admin/rate-limit/config",
            get(get_rate_limit_config).patch(update_rate_limit_config),
        )
        .route("/v1/admin/users/{user_id}/trust", get(get_trust_profile))
        .route("/v1/admin/users/{user_id}/account", put(upsert_account))
        .route("/v1/admin/users/{user_id}/quota", get(preview_quota))
}

/// Active adaptive rate limit configuration
#[utoipa::path(
    get,
    path = "/v1/admin/rate-limit/config",
    responses(
        (status = 200, description = "Active configuration", body = AdaptiveRateLimitConfig),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn get_rate_limit_config(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> Json<AdaptiveRateLimitConfig> {
    Json(*state.engine.config())
}

/// Merge a partial configuration into the active one
///
/// Nested tables merge field by field, so `{"emergency": {"enabled": false}}`
/// only flips the switch. The merged result is validated as a whole; on
/// rejection nothing changes. Takes effect on the next scoring call.
#[utoipa::path(
    patch,
    path = "/v1/admin/rate-limit/config",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Updated configuration", body = AdaptiveRateLimitConfig),
        (status = 400, description = "Rejected; previous configuration still active", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_rate_limit_config(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<AdaptiveRateLimitConfig>, AppError> {
    match state.engine.update_config(&patch) {
        Ok(config) => Ok(Json(*config)),
        Err(source) => Err(AppError::InvalidConfig {
            source,
            received: patch,
        }),
    }
}

/// Trust profile as the scorer currently sees it
#[utoipa::path(
    get,
    path = "/v1/admin/users/{user_id}/trust",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Trust profile (fallback profile for unknown users)", body = TrustProfile),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn get_trust_profile(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Path(user_id): Path<Uuid>,
) -> Json<TrustProfile> {
    Json(state.engine.trust_profile(user_id).await)
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AccountRequest {
    /// Account creation time; defaults to now
    pub created_at: Option<DateTime<Utc>>,
    /// 0–100 from the spam classifier; omit if the user is unscored
    pub spam_score: Option<u8>,
    #[serde(default)]
    pub is_verified: bool,
}

/// Register or replace the account facts the trust profile is built from
///
/// For deployments where no user service feeds `rl_accounts`, and for the
/// in-memory store. The cached profile is dropped and the recomputed one
/// returned.
#[utoipa::path(
    put,
    path = "/v1/admin/users/{user_id}/account",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = AccountRequest,
    responses(
        (status = 200, description = "Recomputed trust profile", body = TrustProfile),
        (status = 400, description = "Invalid account", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 503, description = "Trust store unavailable", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn upsert_account(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AccountRequest>,
) -> Result<Json<TrustProfile>, AppError> {
    if let Some(score) = req.spam_score
        && score > 100
    {
        return Err(AppError::Validation {
            message: "spam_score must be between 0 and 100".to_string(),
            field: Some("spam_score".to_string()),
            received: Some(serde_json::json!(score)),
            docs_hint: None,
        });
    }

    let now = Utc::now();
    let created_at = req.created_at.unwrap_or(now);
    if created_at > now {
        return Err(AppError::Validation {
            message: "created_at must not be in the future".to_string(),
            field: Some("created_at".to_string()),
            received: Some(serde_json::json!(created_at)),
            docs_hint: None,
        });
    }

    let account = AccountRecord {
        created_at,
        spam_score: req.spam_score,
        is_verified: req.is_verified,
    };
    let profile = state.engine.upsert_account(user_id, account).await?;
    tracing::info!(
        user_id = %user_id,
        trust_level = ?profile.trust_level,
        "account registered"
    );
    Ok(Json(profile))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct QuotaQuery {
    /// post, comment, like, report, upload, message or follow
    pub content_type: String,
    /// Baseline max; defaults to the configured baseline
    pub max: Option<i64>,
    /// Baseline window; defaults to the configured baseline
    pub window_ms: Option<u64>,
}

/// Preview the adaptive quota for a user without counting a request
#[utoipa::path(
    get,
    path = "/v1/admin/users/{user_id}/quota",
    params(("user_id" = Uuid, Path, description = "User ID"), QuotaQuery),
    responses(
        (status = 200, description = "Adaptive quota with reasoning", body = AdaptiveResult),
        (status = 400, description = "Invalid query", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn preview_quota(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Path(user_id): Path<Uuid>,
    Query(query): Query<QuotaQuery>,
) -> Result<Json<AdaptiveResult>, AppError> {
    let content_type: ContentType =
        query
            .content_type
            .parse()
            .map_err(|err: riskgate_core::content::UnknownContentType| AppError::Validation {
                message: err.to_string(),
                field: Some("content_type".to_string()),
                received: Some(serde_json::Value::String(query.content_type.clone())),
                docs_hint: Some(
                    "One of: post, comment, like, report, upload, message, follow".to_string(),
                ),
            })?;

    let configured = state.engine.config().baseline;
    let baseline = BaselineQuota::new(
        query.max.unwrap_or(configured.max),
        query.window_ms.unwrap_or(configured.window_ms),
    );
    if baseline.window_ms == 0 {
        return Err(AppError::Validation {
            message: "window_ms must be greater than zero".to_string(),
            field: Some("window_ms".to_string()),
            received: Some(serde_json::json!(0)),
            docs_hint: None,
        });
    }

    Ok(Json(
        state
            .engine
            .calculate_adaptive_rate_limit(user_id, content_type, baseline)
            .await,
    ))
}

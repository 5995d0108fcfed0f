use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use riskgate_core::SystemStatus;
use riskgate_core::error::ApiError;

use crate::auth::AdminAccess;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/system/status", get(get_system_status))
}

/// Current load snapshot and emergency mode
///
/// The snapshot is the last successful sample; it is never older than one
/// sampling interval unless sampling is failing.
#[utoipa::path(
    get,
    path = "/v1/system/status",
    responses(
        (status = 200, description = "Latest system status", body = SystemStatus),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Admin API disabled", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "system"
)]
pub async fn get_system_status(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> Json<SystemStatus> {
    Json(state.engine.system_status())
}

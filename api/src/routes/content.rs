use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use riskgate_core::ContentType;
use riskgate_core::error::ApiError;

use crate::auth::Caller;
use crate::error::AppError;
use crate::state::AppState;

const COLLECTIONS: [(&str, ContentType); 7] = [
    ("posts", ContentType::Post),
    ("comments", ContentType::Comment),
    ("likes", ContentType::Like),
    ("reports", ContentType::Report),
    ("uploads", ContentType::Upload),
    ("messages", ContentType::Message),
    ("follows", ContentType::Follow),
];

pub fn content_type_for_collection(collection: &str) -> Option<ContentType> {
    COLLECTIONS
        .iter()
        .find(|(name, _)| *name == collection)
        .map(|(_, content_type)| *content_type)
}

/// `/v1/posts` -> `Post`; anything else is not a content route.
pub fn content_type_for_path(path: &str) -> Option<ContentType> {
    path.strip_prefix("/v1/")
        .map(|rest| rest.trim_end_matches('/'))
        .and_then(content_type_for_collection)
}

/// Content submissions. Mounted behind the adaptive rate limit layer.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/{collection}", post(submit_content))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ContentAccepted {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content_type: ContentType,
    pub accepted_at: DateTime<Utc>,
}

/// Submit a piece of user content
///
/// The payload is not stored; the endpoint exists so the adaptive quota can be
/// exercised end to end. Responses carry `x-ratelimit-*` and
/// `x-riskgate-multiplier` headers.
#[utoipa::path(
    post,
    path = "/v1/{collection}",
    params(
        ("collection" = String, Path, description = "posts, comments, likes, reports, uploads, messages or follows"),
        ("x-user-id" = Uuid, Header, description = "Authenticated end user")
    ),
    request_body = serde_json::Value,
    responses(
        (status = 201, description = "Accepted", body = ContentAccepted),
        (status = 401, description = "Missing caller", body = ApiError),
        (status = 404, description = "Unknown collection", body = ApiError),
        (status = 429, description = "Adaptive quota exhausted", body = ApiError)
    ),
    tag = "content"
)]
pub async fn submit_content(
    caller: Caller,
    Path(collection): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<ContentAccepted>), AppError> {
    let content_type =
        content_type_for_collection(&collection).ok_or_else(|| AppError::NotFound {
            resource: format!("collection '{collection}'"),
        })?;

    if !payload.is_object() {
        return Err(AppError::Validation {
            message: "Content payload must be a JSON object".to_string(),
            field: Some("body".to_string()),
            received: Some(payload),
            docs_hint: None,
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(ContentAccepted {
            id: Uuid::now_v7(),
            user_id: caller.user_id,
            content_type,
            accepted_at: Utc::now(),
        }),
    ))
}

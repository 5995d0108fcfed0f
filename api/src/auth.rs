use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Set by the upstream gateway after it has authenticated the end user.
pub const USER_ID_HEADER: &str = "x-user-id";

/// End user on whose behalf a content request is made.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: Uuid,
}

pub fn caller_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized {
            message: format!("Missing {USER_ID_HEADER} header"),
            docs_hint: Some(format!(
                "Content routes expect the gateway to forward the caller as '{USER_ID_HEADER}: <uuid>'."
            )),
        })?;

    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Validation {
        message: format!("{USER_ID_HEADER} must be a UUID"),
        field: Some(USER_ID_HEADER.to_string()),
        received: Some(serde_json::Value::String(raw.to_string())),
        docs_hint: None,
    })
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_id(&parts.headers).map(|user_id| Caller { user_id })
    }
}

/// Operator holding the admin bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected_hash) = state.admin_token_hash.as_deref() else {
            return Err(AppError::Forbidden {
                message: "Admin API is disabled".to_string(),
                docs_hint: Some(
                    "Set RISKGATE_ADMIN_TOKEN_SHA256 on the server. \
                     Generate a token with 'riskgate admin-token'."
                        .to_string(),
                ),
            });
        };

        let token = bearer_token(&parts.headers).ok_or_else(|| AppError::Unauthorized {
            message: "Missing admin bearer token".to_string(),
            docs_hint: Some("Include 'Authorization: Bearer rg_admin_...'.".to_string()),
        })?;

        if riskgate_core::auth::verify_admin_token(token, expected_hash) {
            Ok(AdminAccess)
        } else {
            tracing::warn!(
                token_prefix = %riskgate_core::auth::token_prefix(token),
                path = %parts.uri.path(),
                "rejected admin token"
            );
            Err(AppError::Unauthorized {
                message: "Invalid admin token".to_string(),
                docs_hint: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{USER_ID_HEADER, bearer_token, caller_id};
    use crate::error::AppError;
    use axum::http::{HeaderMap, HeaderValue};
    use uuid::Uuid;

    #[test]
    fn caller_id_requires_uuid_header() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            caller_id(&headers),
            Err(AppError::Unauthorized { .. })
        ));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("bob"));
        assert!(matches!(
            caller_id(&headers),
            Err(AppError::Validation { .. })
        ));

        let user_id = Uuid::now_v7();
        headers.insert(
            USER_ID_HEADER,
            HeaderValue::from_str(&user_id.to_string()).unwrap(),
        );
        assert_eq!(caller_id(&headers).unwrap(), user_id);
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer rg_admin_x"));
        assert_eq!(bearer_token(&headers), Some("rg_admin_x"));
    }
}

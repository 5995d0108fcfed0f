use riskgate_core::ContentType;

use crate::util::{api_request, exit_error, parse_user_id};

pub async fn trust(api_url: &str, token: &str, user_id: &str, raw: bool) -> i32 {
    let user_id = parse_user_id(user_id);
    api_request(
        api_url,
        reqwest::Method::GET,
        &format!("/v1/admin/users/{user_id}/trust"),
        Some(token),
        None,
        &[],
        &[],
        raw,
        false,
    )
    .await
}

/// Register or replace a user's account facts.
pub async fn account(
    api_url: &str,
    token: &str,
    user_id: &str,
    created_at: Option<&str>,
    spam_score: Option<u8>,
    verified: bool,
    raw: bool,
) -> i32 {
    let user_id = parse_user_id(user_id);
    let body = match account_body(created_at, spam_score, verified) {
        Ok(body) => body,
        Err(message) => exit_error(&message, Some("Use RFC 3339, e.g. 2024-01-31T12:00:00Z")),
    };

    api_request(
        api_url,
        reqwest::Method::PUT,
        &format!("/v1/admin/users/{user_id}/account"),
        Some(token),
        Some(body),
        &[],
        &[],
        raw,
        false,
    )
    .await
}

fn account_body(
    created_at: Option<&str>,
    spam_score: Option<u8>,
    verified: bool,
) -> Result<serde_json::Value, String> {
    let mut body = serde_json::json!({ "is_verified": verified });
    if let Some(raw) = created_at {
        let parsed = chrono::DateTime::parse_from_rfc3339(raw)
            .map_err(|e| format!("Invalid --created-at '{raw}': {e}"))?;
        body["created_at"] = serde_json::json!(parsed.with_timezone(&chrono::Utc));
    }
    if let Some(score) = spam_score {
        body["spam_score"] = serde_json::json!(score);
    }
    Ok(body)
}

#[allow(clippy::too_many_arguments)]
pub async fn quota(
    api_url: &str,
    token: &str,
    user_id: &str,
    content_type: &str,
    max: Option<i64>,
    window_ms: Option<u64>,
    raw: bool,
) -> i32 {
    let user_id = parse_user_id(user_id);
    let content_type: ContentType = match content_type.parse() {
        Ok(ct) => ct,
        Err(e) => exit_error(
            &format!("{e}"),
            Some("One of: post, comment, like, report, upload, message, follow"),
        ),
    };

    api_request(
        api_url,
        reqwest::Method::GET,
        &format!("/v1/admin/users/{user_id}/quota"),
        Some(token),
        None,
        &quota_query(content_type, max, window_ms),
        &[],
        raw,
        false,
    )
    .await
}

fn quota_query(
    content_type: ContentType,
    max: Option<i64>,
    window_ms: Option<u64>,
) -> Vec<(String, String)> {
    let mut query = vec![("content_type".to_string(), content_type.to_string())];
    if let Some(max) = max {
        query.push(("max".to_string(), max.to_string()));
    }
    if let Some(window_ms) = window_ms {
        query.push(("window_ms".to_string(), window_ms.to_string()));
    }
    query
}

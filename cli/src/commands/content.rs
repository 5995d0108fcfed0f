use crate::util::{api_request, exit_error, parse_user_id};

const COLLECTIONS: [&str; 7] = [
    "posts", "comments", "likes", "reports", "uploads", "messages", "follows",
];

/// Submit content as a user. Always includes status and headers so the
/// `x-ratelimit-*` values are visible.
pub async fn submit(
    api_url: &str,
    user_id: &str,
    collection: &str,
    data: Option<&str>,
    raw: bool,
) -> i32 {
    let user_id = parse_user_id(user_id);
    if !COLLECTIONS.contains(&collection) {
        exit_error(
            &format!("Unknown collection '{collection}'"),
            Some("One of: posts, comments, likes, reports, uploads, messages, follows"),
        );
    }

    let body = match data {
        Some(d) => match serde_json::from_str::<serde_json::Value>(d) {
            Ok(v) if v.is_object() => v,
            Ok(_) => exit_error("--data must be a JSON object", None),
            Err(e) => exit_error(
                &format!("Invalid JSON in --data: {e}"),
                Some("Provide valid JSON string"),
            ),
        },
        None => serde_json::json!({}),
    };

    api_request(
        api_url,
        reqwest::Method::POST,
        &format!("/v1/{collection}"),
        None,
        Some(body),
        &[],
        &[("x-user-id".to_string(), user_id.to_string())],
        raw,
        true,
    )
    .await
}

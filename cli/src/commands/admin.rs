use serde_json::json;

/// Mint a new admin token. Only the hash goes into the server environment.
pub fn generate_token() -> i32 {
    let (token, hash) = riskgate_core::auth::generate_admin_token();
    let prefix = riskgate_core::auth::token_prefix(&token);

    let output = json!({
        "admin_token": token,
        "token_prefix": prefix,
        "sha256": hash,
        "server_env": format!("RISKGATE_ADMIN_TOKEN_SHA256={hash}"),
        "warning": "Store this token securely. It will NOT be shown again."
    });
    println!("{}", serde_json::to_string_pretty(&output).unwrap());
    0
}

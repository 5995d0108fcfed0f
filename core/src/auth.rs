use rand::Rng;
use sha2::{Digest, Sha256};

const ADMIN_TOKEN_PREFIX: &str = "rg_admin_";

/// Generate an admin token for the config endpoints. Returns `(full_token, sha256_hash)`.
/// Format: `rg_admin_` + 32 random bytes hex-encoded. Only the hash is configured
/// on the server (`RISKGATE_ADMIN_TOKEN_SHA256`).
pub fn generate_admin_token() -> (String, String) {
    let raw = random_hex(32);
    let full_token = format!("{ADMIN_TOKEN_PREFIX}{raw}");
    let hash = hash_token(&full_token);
    (full_token, hash)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented bearer token against the configured hash.
/// The comparison runs over the full digest regardless of where it differs.
pub fn verify_admin_token(presented: &str, expected_hash: &str) -> bool {
    let presented_hash = hash_token(presented);
    let expected = expected_hash.trim().to_lowercase();
    if presented_hash.len() != expected.len() {
        return false;
    }
    presented_hash
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// First 8 chars after the prefix, for log lines.
pub fn token_prefix(full_token: &str) -> String {
    full_token
        .strip_prefix(ADMIN_TOKEN_PREFIX)
        .map(|rest| rest.chars().take(8).collect())
        .unwrap_or_default()
}

fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}

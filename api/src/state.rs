use std::sync::Arc;

use riskgate_core::RateLimitEngine;
use sqlx::PgPool;

use crate::counter::WindowCounter;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RateLimitEngine>,
    pub counter: Arc<WindowCounter>,
    /// Present when the trust store is Postgres-backed.
    pub db: Option<PgPool>,
    /// SHA-256 of the admin bearer token. `None` disables the admin API.
    pub admin_token_hash: Option<Arc<str>>,
}

impl AppState {
    pub fn admin_token_hash_from_env() -> Option<Arc<str>> {
        std::env::var("RISKGATE_ADMIN_TOKEN_SHA256")
            .ok()
            .map(|hash| hash.trim().to_lowercase())
            .filter(|hash| !hash.is_empty())
            .map(Arc::from)
    }
}

mod app;
mod auth;
mod counter;
mod error;
mod middleware;
mod routes;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use riskgate_core::load::{ProcSampler, TrafficCounters};
use riskgate_core::store::{MemoryTrustStore, TrustStore};
use riskgate_core::{AdaptiveRateLimitConfig, EngineSettings, RateLimitEngine};

use crate::counter::WindowCounter;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Riskgate API",
        version = "0.1.0",
        description = "Adaptive rate limiting for user-generated content"
    ),
    paths(
        routes::health::health_check,
        routes::system::get_system_status,
        routes::admin::get_rate_limit_config,
        routes::admin::update_rate_limit_config,
        routes::admin::get_trust_profile,
        routes::admin::upsert_account,
        routes::admin::preview_quota,
        routes::content::submit_content,
    ),
    components(schemas(
        HealthResponse,
        riskgate_core::error::ApiError,
        riskgate_core::SystemStatus,
        riskgate_core::load::SystemLoadSnapshot,
        riskgate_core::load::LoadBand,
        riskgate_core::AdaptiveRateLimitConfig,
        riskgate_core::BaselineQuota,
        riskgate_core::config::SpamMultipliers,
        riskgate_core::config::TrustMultipliers,
        riskgate_core::config::LoadMultipliers,
        riskgate_core::config::ContentMultipliers,
        riskgate_core::config::EmergencyConfig,
        riskgate_core::ContentType,
        riskgate_core::trust::TrustProfile,
        routes::admin::AccountRequest,
        riskgate_core::trust::TrustLevel,
        riskgate_core::trust::ProfileSource,
        riskgate_core::trust::ViolationRecord,
        riskgate_core::trust::ViolationKind,
        riskgate_core::trust::ViolationSeverity,
        riskgate_core::AdaptiveResult,
        riskgate_core::scorer::AdaptiveQuota,
        riskgate_core::scorer::AppliedMultiplier,
        riskgate_core::scorer::RiskFactor,
        routes::content::ContentAccepted,
    )),
    tags(
        (name = "system", description = "Health and system load"),
        (name = "admin", description = "Rate limit configuration and per-user inspection"),
        (name = "content", description = "Rate limited content submissions")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// `postgres` or `memory`
    pub trust_store: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "riskgate_api=debug,riskgate_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match AdaptiveRateLimitConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, field = ?err.field(), "invalid rate limit configuration");
            std::process::exit(1);
        }
    };
    let settings = match EngineSettings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, field = ?err.field(), "invalid engine settings");
            std::process::exit(1);
        }
    };

    let (db, trust_store): (_, Arc<dyn TrustStore>) = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(std::time::Duration::from_secs(3))
                .connect(&database_url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            let trust_store: Arc<dyn TrustStore> =
                Arc::new(store::PgTrustStore::new(pool.clone()));
            (Some(pool), trust_store)
        }
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set; trust data is kept in memory and lost on restart. \
                 Register accounts via PUT /v1/admin/users/{{user_id}}/account, \
                 unregistered callers get the fallback profile"
            );
            let trust_store: Arc<dyn TrustStore> = Arc::new(MemoryTrustStore::new());
            (None, trust_store)
        }
    };

    let admin_token_hash = state::AppState::admin_token_hash_from_env();
    if admin_token_hash.is_none() {
        tracing::warn!("RISKGATE_ADMIN_TOKEN_SHA256 not set; admin API is disabled");
    }

    let engine = Arc::new(RateLimitEngine::new(
        trust_store,
        Arc::new(ProcSampler::new()),
        Arc::new(TrafficCounters::new()),
        config,
        settings,
    ));
    engine.start().await;

    let app_state = state::AppState {
        engine: engine.clone(),
        counter: Arc::new(WindowCounter::new()),
        db,
        admin_token_hash,
    };
    let app = app::build_router(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Riskgate API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();

    engine.stop().await;
    tracing::info!("Riskgate API stopped");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

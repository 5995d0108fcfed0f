use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware;
use crate::routes;
use crate::state::AppState;
use crate::ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let traffic = state.engine.traffic().clone();
    let content_layer =
        middleware::adaptive_rate_limit::content_layer(state.engine.clone(), state.counter.clone());

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::system::router().layer(middleware::rate_limit::admin_layer()))
        .merge(routes::admin::router().layer(middleware::rate_limit::admin_layer()))
        .merge(routes::content::router().layer(content_layer))
        .layer(axum::middleware::from_fn_with_state(
            traffic,
            middleware::traffic::track_traffic,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::build_router;
    use crate::counter::WindowCounter;
    use crate::state::AppState;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use riskgate_core::load::{ProcSampler, SystemLoadSnapshot, TrafficCounters};
    use riskgate_core::store::{InteractionCounters, MemoryTrustStore, TrustStore};
    use riskgate_core::{AdaptiveRateLimitConfig, EngineSettings, RateLimitEngine};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const ADMIN_TOKEN: &str = "rg_admin_test";

    fn test_state() -> AppState {
        test_state_with_store().0
    }

    fn test_state_with_store() -> (AppState, Arc<MemoryTrustStore>) {
        let store = Arc::new(MemoryTrustStore::new());
        let engine = Arc::new(RateLimitEngine::new(
            store.clone(),
            Arc::new(ProcSampler::new()),
            Arc::new(TrafficCounters::new()),
            AdaptiveRateLimitConfig::default(),
            EngineSettings::default(),
        ));
        engine.monitor().publish(SystemLoadSnapshot {
            cpu: 60.0,
            memory: 40.0,
            ..SystemLoadSnapshot::idle(chrono::Utc::now())
        });
        let state = AppState {
            engine,
            counter: Arc::new(WindowCounter::new()),
            db: None,
            admin_token_hash: Some(Arc::from(riskgate_core::auth::hash_token(ADMIN_TOKEN))),
        };
        (state, store)
    }

    /// Feedback is written from spawned tasks; wait until it lands.
    async fn counters_eventually(
        store: &MemoryTrustStore,
        user_id: Uuid,
        expected: InteractionCounters,
    ) -> InteractionCounters {
        let mut counters = InteractionCounters::default();
        for _ in 0..100 {
            counters = store.interaction_counters(user_id).await.unwrap();
            if counters == expected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        counters
    }

    fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "10.0.0.1")
            .header("authorization", format!("Bearer {ADMIN_TOKEN}"));
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn content_request(collection: &str, user_id: Uuid) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/v1/{collection}"))
            .header("x-user-id", user_id.to_string())
            .header("content-type", "application/json")
            .body(Body::from(json!({ "text": "hello" }).to_string()))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    #[tokio::test]
    async fn health_reports_memory_store() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, headers, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["trust_store"], "memory");
        assert!(headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn content_requires_caller() {
        let app = build_router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/v1/posts")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn adaptive_quota_is_enforced_with_429() {
        let (state, store) = test_state_with_store();
        // unknown user: new 0.5 x neutral spam 0.7 x medium load 1.0 x post 1.0
        state
            .engine
            .update_config(&json!({ "baseline": { "max": 10, "window_ms": 60000 } }))
            .unwrap();
        let app = build_router(state);
        let user_id = Uuid::now_v7();

        for remaining in ["2", "1", "0"] {
            let (status, headers, body) = send(&app, content_request("posts", user_id)).await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["content_type"], "post");
            assert_eq!(headers["x-ratelimit-limit"], "3");
            assert_eq!(headers["x-ratelimit-remaining"], remaining);
            assert_eq!(headers["x-riskgate-multiplier"], "0.3500");
        }

        let (status, headers, body) = send(&app, content_request("posts", user_id)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.contains_key("retry-after"));
        assert_eq!(body["error"], "rate_limited");
        assert_eq!(body["received"]["limit"], 3);
        assert_eq!(body["received"]["count"], 4);
        assert_eq!(body["received"]["reasoning"].as_array().unwrap().len(), 4);

        // other content types have their own window
        let (status, _, _) = send(&app, content_request("likes", user_id)).await;
        assert_eq!(status, StatusCode::CREATED);

        let expected = InteractionCounters {
            rate_limit_violations: 1,
            successful_interactions: 4,
        };
        assert_eq!(counters_eventually(&store, user_id, expected).await, expected);
        let since = chrono::Utc::now() - chrono::Duration::days(1);
        let violations = store.violations(user_id, since).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].details["endpoint"], "/v1/posts");
        assert_eq!(violations[0].details["actual"], 4);
    }

    #[tokio::test]
    async fn registered_account_lifts_quota() {
        let state = test_state();
        state
            .engine
            .update_config(&json!({ "baseline": { "max": 10, "window_ms": 60000 } }))
            .unwrap();
        let app = build_router(state);
        let user_id = Uuid::now_v7();

        let (status, _, body) = send(
            &app,
            admin_request(
                "PUT",
                &format!("/v1/admin/users/{user_id}/account"),
                Some(json!({ "created_at": "2024-01-01T00:00:00Z", "is_verified": true })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["trust_level"], "verified");
        assert_eq!(body["spam_score"], 0);
        assert_eq!(body["source"], "store");

        // verified 1.5 x clean spam 1.0 x medium load 1.0 x post 1.0
        let (status, headers, _) = send(&app, content_request("posts", user_id)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers["x-ratelimit-limit"], "15");

        let (status, _, body) = send(
            &app,
            admin_request(
                "PUT",
                &format!("/v1/admin/users/{user_id}/account"),
                Some(json!({ "spam_score": 101 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "spam_score");
    }

    #[tokio::test]
    async fn unknown_collection_is_not_found() {
        let app = build_router(test_state());
        let (status, _, body) = send(&app, content_request("polls", Uuid::now_v7())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn admin_routes_require_token() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/admin/rate-limit/config")
            .header("x-forwarded-for", "10.0.0.2")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/v1/system/status")
            .header("x-forwarded-for", "10.0.0.2")
            .header("authorization", "Bearer rg_admin_wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_api_is_disabled_without_configured_hash() {
        let mut state = test_state();
        state.admin_token_hash = None;
        let app = build_router(state);
        let (status, _, body) =
            send(&app, admin_request("GET", "/v1/system/status", None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
    }

    #[tokio::test]
    async fn config_patch_applies_and_rejects_invalid_tables() {
        let app = build_router(test_state());

        let (status, _, body) = send(
            &app,
            admin_request(
                "PATCH",
                "/v1/admin/rate-limit/config",
                Some(json!({ "emergency": { "emergency_multiplier": 0.2 } })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["emergency"]["emergency_multiplier"], 0.2);
        assert_eq!(body["emergency"]["trigger_threshold"], 90.0);

        let (status, _, body) = send(
            &app,
            admin_request(
                "PATCH",
                "/v1/admin/rate-limit/config",
                Some(json!({ "trust": { "new": 2.0 } })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_config");
        assert_eq!(body["field"], "trust");

        let (_, _, body) =
            send(&app, admin_request("GET", "/v1/admin/rate-limit/config", None)).await;
        assert_eq!(body["trust"]["new"], 0.5);
        assert_eq!(body["emergency"]["emergency_multiplier"], 0.2);
    }

    #[tokio::test]
    async fn status_trust_and_quota_preview() {
        let app = build_router(test_state());
        let user_id = Uuid::now_v7();

        let (status, _, body) =
            send(&app, admin_request("GET", "/v1/system/status", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["emergency_mode"], false);
        assert_eq!(body["metrics"]["cpu"], 60.0);
        assert!(body.get("emergency_mode_duration_ms").is_none());

        let (status, _, body) = send(
            &app,
            admin_request("GET", &format!("/v1/admin/users/{user_id}/trust"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["trust_level"], "new");
        assert_eq!(body["spam_score"], 50);

        let (status, _, body) = send(
            &app,
            admin_request(
                "GET",
                &format!("/v1/admin/users/{user_id}/quota?content_type=upload&max=100"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        // 0.5 x 0.7 x 1.0 x 0.3
        assert_eq!(body["config"]["max"], 10);
        assert_eq!(body["config"]["window_ms"], 900000);

        let (status, _, body) = send(
            &app,
            admin_request(
                "GET",
                &format!("/v1/admin/users/{user_id}/quota?content_type=poll"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "content_type");
    }
}

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Json;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use riskgate_core::feedback::ViolationDetails;
use riskgate_core::{AdaptiveResult, RateLimitEngine};
use serde_json::json;
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

use crate::auth::caller_id;
use crate::counter::{CounterDecision, WindowCounter};
use crate::routes::content::content_type_for_path;

/// Enforces the adaptive quota on content submissions and reports the outcome
/// back to the engine.
#[derive(Clone)]
pub struct AdaptiveRateLimitLayer {
    engine: Arc<RateLimitEngine>,
    counter: Arc<WindowCounter>,
}

pub fn content_layer(
    engine: Arc<RateLimitEngine>,
    counter: Arc<WindowCounter>,
) -> AdaptiveRateLimitLayer {
    AdaptiveRateLimitLayer { engine, counter }
}

impl<S> Layer<S> for AdaptiveRateLimitLayer {
    type Service = AdaptiveRateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdaptiveRateLimitService {
            inner,
            engine: self.engine.clone(),
            counter: self.counter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AdaptiveRateLimitService<S> {
    inner: S,
    engine: Arc<RateLimitEngine>,
    counter: Arc<WindowCounter>,
}

impl<S> Service<Request> for AdaptiveRateLimitService<S>
where
    S: Service<Request, Response = axum::response::Response, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = axum::response::Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let engine = self.engine.clone();
        let counter = self.counter.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();
            let content_type = match content_type_for_path(&path) {
                Some(content_type) if req.method() == Method::POST => content_type,
                _ => return Ok(ready.oneshot(req).await.into_response()),
            };

            let user_id = match caller_id(req.headers()) {
                Ok(user_id) => user_id,
                Err(err) => return Ok(err.into_response()),
            };
            let request_id = req
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::now_v7().to_string());

            let baseline = engine.config().baseline;
            let result = engine
                .calculate_adaptive_rate_limit(user_id, content_type, baseline)
                .await;
            let decision = counter
                .hit(
                    user_id,
                    content_type,
                    Duration::from_millis(result.config.window_ms),
                    result.config.max,
                )
                .await;

            if !decision.allowed {
                tracing::info!(
                    user_id = %user_id,
                    content_type = %content_type,
                    limit = decision.limit,
                    count = decision.count,
                    applied_multiplier = result.applied_multiplier,
                    "adaptive rate limit exceeded"
                );
                engine.record_violation(
                    user_id,
                    ViolationDetails {
                        endpoint: path,
                        limit: decision.limit,
                        actual: decision.count,
                        window_ms: result.config.window_ms,
                    },
                );
                return Ok(build_limited_response(&result, &decision, request_id));
            }

            let mut response = ready.oneshot(req).await.into_response();
            if response.status().is_success() {
                engine.record_successful_interaction(user_id, content_type);
            }
            annotate_response_headers(&mut response, &result, &decision);
            Ok(response)
        })
    }
}

fn retry_after_secs(decision: &CounterDecision) -> u64 {
    let secs = decision.reset_after.as_secs();
    let rounded_up = if decision.reset_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    };
    rounded_up.max(1)
}

fn build_limited_response(
    result: &AdaptiveResult,
    decision: &CounterDecision,
    request_id: String,
) -> axum::response::Response {
    let retry_after = retry_after_secs(decision);
    let body = json!({
        "error": riskgate_core::error::codes::RATE_LIMITED,
        "message": format!("Rate limit exceeded. Retry after {retry_after} seconds."),
        "field": "rate_limit",
        "received": {
            "limit": decision.limit,
            "count": decision.count,
            "window_ms": result.config.window_ms,
            "applied_multiplier": result.applied_multiplier,
            "trust_level": result.trust_profile.trust_level,
            "reasoning": result.reasoning,
        },
        "request_id": request_id,
        "docs_hint": "Quotas adapt to account trust, spam risk and current system load. Slow down and retry after the window resets."
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(retry_after));
    annotate_response_headers(&mut response, result, decision);
    response
}

fn annotate_response_headers(
    response: &mut axum::response::Response,
    result: &AdaptiveResult,
    decision: &CounterDecision,
) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(retry_after_secs(decision)),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", result.applied_multiplier)) {
        headers.insert("x-riskgate-multiplier", value);
    }
}

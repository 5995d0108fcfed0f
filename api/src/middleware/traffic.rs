use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use riskgate_core::load::TrafficCounters;

/// Feeds request, 5xx and in-flight counts into the load monitor.
pub async fn track_traffic(
    State(traffic): State<Arc<TrafficCounters>>,
    req: Request,
    next: Next,
) -> Response {
    let in_flight = traffic.begin();
    let response = next.run(req).await;
    in_flight.finish(response.status().is_server_error());
    response
}

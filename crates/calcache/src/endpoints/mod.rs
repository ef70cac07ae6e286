use axum::Router;
use axum::routing::{get, post};
use calcache_service::metric;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tower::ServiceBuilder;

use crate::service::RequestService;

mod error;
mod maintenance;
mod metrics;
mod status;

pub use error::ResponseError;
use metrics::MetricsLayer;

use maintenance::handle_maintenance_request as maintenance;
use status::cache_status as status;

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(service: RequestService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer);
    Router::new()
        .route("/maintenance", post(maintenance))
        .route("/status", get(status))
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}

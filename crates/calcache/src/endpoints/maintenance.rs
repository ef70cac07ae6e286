use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use calcache_service::maintenance::MaintenanceReport;
use serde::Deserialize;

use super::ResponseError;
use crate::service::RequestService;

/// Header carrying the maintenance key.
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceQuery {
    key: Option<String>,
}

/// Runs the due maintenance passes over both caches.
///
/// The key is taken from the `x-api-key` header, falling back to the `key` query parameter.
pub async fn handle_maintenance_request(
    State(service): State<RequestService>,
    Query(query): Query<MaintenanceQuery>,
    headers: HeaderMap,
) -> Result<Json<MaintenanceReport>, ResponseError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .or(query.key.as_deref());
    if !service.is_authorized(presented) {
        tracing::warn!("Refused maintenance request with a missing or wrong key");
        return Err((StatusCode::FORBIDDEN, "invalid maintenance key").into());
    }

    let report = service.maintenance().await??;
    Ok(Json(report))
}

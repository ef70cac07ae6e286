use axum::Json;
use axum::extract::State;

use super::ResponseError;
use crate::service::{CacheStatus, RequestService};

/// Reports driver settings and current size of both caches.
pub async fn cache_status(
    State(service): State<RequestService>,
) -> Result<Json<CacheStatus>, ResponseError> {
    let status = service.status().await??;
    Ok(Json(status))
}

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use std::time::Instant;

use crate::services::GraphPayload;
use crate::utils::logging::*;
use crate::utils::{AppError, AppResult};
use crate::AppState;

/// Repasse autorizado para a Graph API
///
/// Query e corpo (qualquer content-type) seguem sem alteração; status e corpo
/// do Graph voltam ao chamador.
pub async fn graph_proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let start = Instant::now();
    let endpoint = format!("/graph/{}", path);
    log_request_received(&endpoint, method.as_str());

    // axum e reqwest usam versões diferentes do crate `http`
    let upstream_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| AppError::ValidationError(format!("Método inválido: {}", e)))?;

    let payload = if body.is_empty() {
        None
    } else {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Some(GraphPayload::new(content_type, body.to_vec()))
    };

    let response = state
        .graph
        .request(upstream_method, &path, &query, payload)
        .await?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    log_request_processed(&endpoint, status.as_u16(), start.elapsed().as_millis() as u64);

    Ok((status, Json(response.body)).into_response())
}

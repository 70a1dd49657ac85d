use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use std::sync::Arc;
use whatsapp_oauth::TokenStatus;

use crate::utils::logging::*;
use crate::AppState;

pub async fn health_check() -> Json<Value> {
    log_health_check();

    Json(json!({
        "status": "healthy",
        "service": "whatsapp-mcp-server",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Pronto quando existe um token utilizável (renovado se preciso)
pub async fn ready_check(State(state): State<Arc<AppState>>) -> Response {
    log_readiness_check();

    match state.tokens.get_valid_token().await {
        Ok(_) => Json(json!({
            "ready": true,
            "service": "whatsapp-mcp-server",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "dependencies": {
                "whatsapp_token": { "status": "valid" },
                "business_account_id": state.settings.whatsapp.business_account_id,
                "phone_number_id": state.settings.whatsapp.phone_number_id
            }
        }))
        .into_response(),
        Err(e) => {
            log_warning(&format!("⚠️ Readiness falhou: {}", e));
            let body = json!({
                "ready": false,
                "service": "whatsapp-mcp-server",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "error": e.to_string(),
                "hint": e.operator_hint(),
                "reauthorize": e.requires_reauthorization()
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

pub async fn auth_status(State(state): State<Arc<AppState>>) -> Json<TokenStatus> {
    Json(state.tokens.status().await)
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;
use whatsapp_oauth::AuthError;

#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    GraphApi(String),
    HttpError(reqwest::Error),
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Auth(err) => write!(f, "Auth error: {}", err),
            AppError::GraphApi(msg) => write!(f, "Graph API error: {}", msg),
            AppError::HttpError(err) => write!(f, "HTTP error: {}", err),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::HttpError(err)
    }
}

fn auth_response(err: &AuthError) -> Response {
    // Erros de token carregam orientação para o operador
    let status = if err.requires_reauthorization() {
        StatusCode::UNAUTHORIZED
    } else if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let mut body = json!({
        "error": err.to_string(),
        "status": status.as_u16(),
        "hint": err.operator_hint(),
    });
    if err.requires_reauthorization() {
        body["reauthorize"] = json!(true);
    } else if err.is_transient() {
        body["retryable"] = json!(true);
    }

    (status, axum::Json(body)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Auth(err) => return auth_response(&err),
            AppError::GraphApi(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::HttpError(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = json!({
            "error": error_message,
            "status": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

// Biblioteca do servidor WhatsApp MCP
// Expõe módulos para uso em testes e no binário

pub mod config;
pub mod handlers;
pub mod services;
pub mod utils;

use axum::{
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use whatsapp_oauth::{TokenLifecycleManager, TokenProvider};

// AppState é definido aqui para ser compartilhado
#[derive(Clone)]
pub struct AppState {
    pub settings: config::Settings,
    pub tokens: Arc<TokenLifecycleManager>,
    pub graph: services::GraphClient,
}

impl AppState {
    pub fn new(settings: config::Settings, tokens: Arc<TokenLifecycleManager>) -> utils::AppResult<Self> {
        let provider: Arc<dyn TokenProvider> = tokens.clone();
        let graph = services::GraphClient::new(&settings, provider)?;
        Ok(Self { settings, tokens, graph })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::ready_check))
        // Estado do token (sem segredos)
        .route("/auth/status", get(handlers::auth_status))
        // Repasse autorizado para o Graph
        .route(
            "/graph/*path",
            get(handlers::graph_proxy)
                .post(handlers::graph_proxy)
                .delete(handlers::graph_proxy),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerSettings, Settings, WhatsAppSettings};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use whatsapp_oauth::{
        Interactivity, MemoryTokenStore, RefreshPolicy, TokenRecord, TokenStore,
        UnconfiguredExchange,
    };

    const TOKEN: &str = "EAAGm0PX4ZCpsBAtest-token-value";

    fn settings(graph_base_url: &str) -> Settings {
        Settings {
            server: ServerSettings { host: "127.0.0.1".into(), port: 0 },
            whatsapp: WhatsAppSettings {
                api_version: "v18.0".into(),
                graph_base_url: graph_base_url.into(),
                business_account_id: Some("waba-1".into()),
                phone_number_id: None,
                request_timeout_secs: 5,
            },
        }
    }

    fn manager(record: Option<TokenRecord>) -> Arc<TokenLifecycleManager> {
        let store: Arc<dyn TokenStore> = match record {
            Some(record) => Arc::new(MemoryTokenStore::with_record(record)),
            None => Arc::new(MemoryTokenStore::new()),
        };
        Arc::new(TokenLifecycleManager::new(
            store,
            Arc::new(UnconfiguredExchange::new("sem credenciais")),
            RefreshPolicy::default(),
            Interactivity::NonInteractive,
        ))
    }

    fn valid_record() -> TokenRecord {
        TokenRecord::new(TOKEN, "bearer", Utc::now(), 50 * 24 * 3600).unwrap()
    }

    fn app(graph_base_url: &str, record: Option<TokenRecord>) -> Router {
        let state = AppState::new(settings(graph_base_url), manager(record)).unwrap();
        create_router(Arc::new(state))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app("http://localhost:1", None), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["service"], json!("whatsapp-mcp-server"));
    }

    #[tokio::test]
    async fn test_ready_without_token() {
        let (status, body) = call(app("http://localhost:1", None), "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], json!(false));
        assert_eq!(body["reauthorize"], json!(true));
    }

    #[tokio::test]
    async fn test_ready_with_token() {
        let (status, body) =
            call(app("http://localhost:1", Some(valid_record())), "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], json!(true));
        assert_eq!(body["dependencies"]["business_account_id"], json!("waba-1"));
    }

    #[tokio::test]
    async fn test_auth_status_hides_secret() {
        let (status, body) =
            call(app("http://localhost:1", Some(valid_record())), "GET", "/auth/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["has_token"], json!(true));
        assert_eq!(body["state"], json!("authorized"));
        assert!(!body.to_string().contains(TOKEN));
    }

    #[tokio::test]
    async fn test_graph_get_passthrough() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v18.0/waba-1/phone_numbers")
                    .query_param("limit", "5")
                    .header("authorization", format!("Bearer {}", TOKEN));
                then.status(200).json_body(json!({"data": []}));
            })
            .await;

        let (status, body) = call(
            app(&server.base_url(), Some(valid_record())),
            "GET",
            "/graph/waba-1/phone_numbers?limit=5",
            None,
        )
        .await;

        mock.assert_async().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"data": []}));
    }

    #[tokio::test]
    async fn test_graph_post_mirrors_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v18.0/phone-1/messages")
                    .json_body(json!({"messaging_product": "whatsapp"}));
                then.status(400).json_body(json!({"error": {"message": "invalid recipient"}}));
            })
            .await;

        let (status, body) = call(
            app(&server.base_url(), Some(valid_record())),
            "POST",
            "/graph/phone-1/messages",
            Some(json!({"messaging_product": "whatsapp"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], json!("invalid recipient"));
    }

    #[tokio::test]
    async fn test_graph_forwards_non_json_body_unchanged() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v18.0/phone-1/media")
                    .header("content-type", "multipart/form-data; boundary=b1")
                    .body("--b1\r\nraw-media\r\n--b1--");
                then.status(200).json_body(json!({"id": "media-9"}));
            })
            .await;

        let request = Request::builder()
            .method("POST")
            .uri("/graph/phone-1/media")
            .header("content-type", "multipart/form-data; boundary=b1")
            .body(Body::from("--b1\r\nraw-media\r\n--b1--"))
            .unwrap();
        let response = app(&server.base_url(), Some(valid_record()))
            .oneshot(request)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_graph_without_token_returns_401() {
        let (status, body) = call(app("http://localhost:1", None), "GET", "/graph/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["reauthorize"], json!(true));
    }

    #[tokio::test]
    async fn test_graph_401_invalidates_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v18.0/me");
                then.status(401).json_body(json!({"error": {"code": 190}}));
            })
            .await;

        let state = Arc::new(
            AppState::new(settings(&server.base_url()), manager(Some(valid_record()))).unwrap(),
        );
        let router = create_router(state.clone());

        let (status, _) = call(router.clone(), "GET", "/graph/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // sem credenciais do app não há como renovar o token recusado
        assert!(state.tokens.get_valid_token().await.is_err());
        let (status, _) = call(router, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}

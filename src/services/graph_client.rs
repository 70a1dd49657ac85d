use std::sync::Arc;
use std::time::Duration;
use reqwest::{Client, Method};
use serde_json::Value;
use whatsapp_oauth::TokenProvider;

use crate::config::Settings;
use crate::utils::{AppError, AppResult};
use crate::utils::logging::*;

/// Resposta do Graph repassada sem alteração
#[derive(Debug, Clone, PartialEq)]
pub struct GraphResponse {
    pub status: u16,
    pub body: Value,
}

/// Corpo da requisição repassado byte a byte, com o content-type original
#[derive(Debug, Clone, PartialEq)]
pub struct GraphPayload {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl GraphPayload {
    pub fn new(content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self { content_type, bytes }
    }

    pub fn json(value: &Value) -> Self {
        Self::new(Some("application/json".to_string()), value.to_string().into_bytes())
    }
}

/// Cliente autorizado da Graph API.
///
/// Cada chamada pede o token ao `TokenProvider`; payloads são opacos.
#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GraphClient {
    pub fn new(settings: &Settings, tokens: Arc<dyn TokenProvider>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.whatsapp.request_timeout_secs))
            .build()?;

        Ok(Self::with_client(client, settings.whatsapp.graph_api_base(), tokens))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<GraphPayload>,
    ) -> AppResult<GraphResponse> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(AppError::ValidationError("Caminho do Graph vazio".to_string()));
        }

        let token = self.tokens.get_valid_token().await?;
        let url = format!("{}/{}", self.base_url, path);
        log_graph_call(method.as_str(), path);

        let mut request = self.client
            .request(method, &url)
            .bearer_auth(&token)
            .query(query);
        if let Some(payload) = body {
            if let Some(content_type) = payload.content_type {
                request = request.header(reqwest::header::CONTENT_TYPE, content_type);
            }
            request = request.body(payload.bytes);
        }

        let response = request.send().await.map_err(|e| {
            log_graph_api_error(path, None, &e.to_string());
            AppError::GraphApi(format!("Falha ao chamar {}: {}", path, e))
        })?;

        let status = response.status().as_u16();
        if status == 401 {
            log_graph_unauthorized(path);
            self.tokens.report_unauthorized(&token).await;
        }

        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(GraphResponse { status, body })
    }

    pub async fn get(&self, path: &str) -> AppResult<GraphResponse> {
        self.request(Method::GET, path, &[], None).await
    }
}

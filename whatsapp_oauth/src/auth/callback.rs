use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use crate::config::OAuthConfig;
use crate::error::{AuthError, AuthResult};

/// Resultado do callback OAuth2
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackResult {
    pub code: String,
    pub state: String,
}

/// Classificação de uma requisição recebida no path de callback
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Accepted(CallbackResult),
    /// O provedor redirecionou com `error=` (ex.: usuário negou o acesso)
    ProviderError(String),
    /// Falta `code` ou `state`
    Incomplete(&'static str),
    StateMismatch,
}

/// Classifica os parâmetros de query contra o estado esperado
pub fn classify_callback(params: &HashMap<String, String>, expected_state: &str) -> CallbackOutcome {
    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .or_else(|| params.get("error_reason"))
            .map(|d| format!("{}: {}", error, d))
            .unwrap_or_else(|| error.clone());
        return CallbackOutcome::ProviderError(description);
    }

    let code = match params.get("code").filter(|c| !c.is_empty()) {
        Some(code) => code,
        None => return CallbackOutcome::Incomplete("parâmetro `code` ausente"),
    };
    let state = match params.get("state").filter(|s| !s.is_empty()) {
        Some(state) => state,
        None => return CallbackOutcome::Incomplete("parâmetro `state` ausente"),
    };

    if state != expected_state {
        return CallbackOutcome::StateMismatch;
    }

    CallbackOutcome::Accepted(CallbackResult {
        code: code.clone(),
        state: state.clone(),
    })
}

/// Listener HTTP local e efêmero que captura o redirect do provedor
#[derive(Debug, Clone)]
pub struct CallbackListener {
    host: String,
    port: u16,
    path: String,
    timeout: Duration,
}

struct CallbackShared {
    expected_state: String,
    sender: Mutex<Option<oneshot::Sender<CallbackResult>>>,
    mismatch_seen: AtomicBool,
}

impl CallbackShared {
    fn is_completed(&self) -> bool {
        self.sender.lock().map(|s| s.is_none()).unwrap_or(true)
    }

    /// Entrega o resultado; falso se outra requisição já completou a espera
    fn complete(&self, result: CallbackResult) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Fecha o canal sem resultado; a espera termina com falha do listener
    fn abandon(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }
}

impl CallbackListener {
    pub fn new(port: u16, path: impl Into<String>, timeout: Duration) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') { path } else { format!("/{}", path) };
        Self {
            host: "127.0.0.1".to_string(),
            port,
            path,
            timeout,
        }
    }

    /// Endereço de bind (IP literal ou nome resolvido no bind)
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Host, porta, path e timeout derivados do redirect URI registrado
    pub fn from_config(config: &OAuthConfig) -> AuthResult<Self> {
        Ok(Self::new(
            config.callback_port()?,
            config.callback_path()?,
            config.callback_timeout,
        )
        .with_host(config.callback_host()?))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Faz o bind em `<host>:<porta>` do redirect e retorna imediatamente
    pub async fn start(&self, expected_state: impl Into<String>) -> AuthResult<PendingCallback> {
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| AuthError::PortUnavailable {
                port: self.port,
                reason: e.to_string(),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::listener(format!("endereço local indisponível: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(CallbackShared {
            expected_state: expected_state.into(),
            sender: Mutex::new(Some(tx)),
            mismatch_seen: AtomicBool::new(false),
        });

        let mut app = Router::new().route(&self.path, get(handle_callback));
        if self.path != "/" {
            app = app.route("/", get(handle_waiting));
        }
        let app = app.with_state(shared.clone());

        let server_shared = shared.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [Callback] Servidor de callback encerrado com erro: {}", e);
            }
            server_shared.abandon();
        });

        log::info!(
            "🌐 [Callback] Aguardando redirect em http://{}{}",
            local_addr,
            self.path
        );

        Ok(PendingCallback {
            local_addr,
            deadline: Instant::now() + self.timeout,
            timeout: self.timeout,
            receiver: rx,
            shared,
            server: Some(server),
        })
    }
}

/// Espera em andamento de um listener já iniciado (uso único)
pub struct PendingCallback {
    local_addr: SocketAddr,
    deadline: Instant,
    timeout: Duration,
    receiver: oneshot::Receiver<CallbackResult>,
    shared: Arc<CallbackShared>,
    server: Option<JoinHandle<()>>,
}

impl PendingCallback {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Aguarda um redirect legítimo até o prazo; o listener é encerrado em qualquer saída
    pub async fn wait(mut self) -> AuthResult<CallbackResult> {
        let received = tokio::time::timeout_at(self.deadline, &mut self.receiver).await;
        self.shutdown().await;

        match received {
            Ok(Ok(result)) => {
                log::info!("✅ [Callback] Código de autorização recebido");
                Ok(result)
            }
            Ok(Err(_)) => Err(AuthError::listener("canal do callback fechado")),
            Err(_) if self.shared.mismatch_seen.load(Ordering::SeqCst) => {
                log::warn!("⚠️ [Callback] Prazo encerrado após callback com state divergente");
                Err(AuthError::StateMismatch)
            }
            Err(_) => {
                log::warn!("⏰ [Callback] Timeout após {}s sem redirect", self.timeout.as_secs());
                Err(AuthError::Timeout(self.timeout))
            }
        }
    }

    /// Aborta o servidor e espera a task terminar, liberando a porta
    pub async fn shutdown(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
            log::debug!("🛑 [Callback] Listener em {} encerrado", self.local_addr);
        }
    }
}

impl Drop for PendingCallback {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

async fn handle_callback(
    State(shared): State<Arc<CallbackShared>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    if shared.is_completed() {
        return (
            StatusCode::OK,
            Html(render_page(
                "Autorização já concluída",
                "ℹ️",
                "Esta tentativa de autorização já foi concluída. Você pode fechar esta janela.",
                ACCENT_COLOR,
            )),
        );
    }

    match classify_callback(&params, &shared.expected_state) {
        CallbackOutcome::Accepted(result) => {
            if shared.complete(result) {
                (
                    StatusCode::OK,
                    Html(render_page(
                        "Autorização Concluída!",
                        "✅",
                        "Autorização do WhatsApp Business realizada com sucesso. \
                         Você pode fechar esta janela e retornar à aplicação.",
                        ACCENT_COLOR,
                    )),
                )
            } else {
                (
                    StatusCode::OK,
                    Html(render_page(
                        "Autorização já concluída",
                        "ℹ️",
                        "Esta tentativa de autorização já foi concluída. Você pode fechar esta janela.",
                        ACCENT_COLOR,
                    )),
                )
            }
        }
        CallbackOutcome::StateMismatch => {
            log::warn!("⚠️ [Callback] Callback com state divergente rejeitado");
            shared.mismatch_seen.store(true, Ordering::SeqCst);
            (
                StatusCode::BAD_REQUEST,
                Html(render_page(
                    "Estado inválido",
                    "❌",
                    "Este link não pertence à autorização em andamento. \
                     Use o link exibido pela aplicação.",
                    ERROR_COLOR,
                )),
            )
        }
        CallbackOutcome::ProviderError(description) => {
            log::warn!("⚠️ [Callback] Provedor retornou erro: {}", description);
            (
                StatusCode::BAD_REQUEST,
                Html(render_page(
                    "Autorização não concedida",
                    "❌",
                    &format!("O provedor retornou um erro: {}", escape_html(&description)),
                    ERROR_COLOR,
                )),
            )
        }
        CallbackOutcome::Incomplete(reason) => {
            log::warn!("⚠️ [Callback] Callback incompleto: {}", reason);
            (
                StatusCode::BAD_REQUEST,
                Html(render_page(
                    "Callback inválido",
                    "❌",
                    &format!("Requisição de callback inválida: {}", reason),
                    ERROR_COLOR,
                )),
            )
        }
    }
}

async fn handle_waiting() -> Html<String> {
    Html(render_page(
        "Aguardando autorização...",
        "🔐",
        "Complete o processo de autorização na página da Meta. \
         Esta janela pode ser fechada depois do redirecionamento.",
        ACCENT_COLOR,
    ))
}

const ACCENT_COLOR: &str = "#25D366";
const ERROR_COLOR: &str = "#dc3545";

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>WhatsApp OAuth2 - {title}</title>
    <meta charset="UTF-8">
    <style>
        body {
            font-family: Arial, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
            text-align: center;
        }
        .container {
            max-width: 600px;
            margin: 50px auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.1);
        }
        h1 { color: {color}; }
        .icon { font-size: 64px; margin: 20px 0; }
    </style>
</head>
<body>
    <div class="container">
        <div class="icon">{icon}</div>
        <h1>{title}</h1>
        <p>{message}</p>
    </div>
</body>
</html>
"#;

fn render_page(title: &str, icon: &str, message: &str, color: &str) -> String {
    PAGE_TEMPLATE
        .replace("{title}", title)
        .replace("{icon}", icon)
        .replace("{color}", color)
        .replace("{message}", message)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn listener(timeout_ms: u64) -> CallbackListener {
        // porta 0: o sistema escolhe uma porta livre
        CallbackListener::new(0, "/callback", Duration::from_millis(timeout_ms))
    }

    fn browser() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn hit(addr: SocketAddr, query: &str) -> (u16, String) {
        let response = browser()
            .get(format!("http://{}/callback?{}", addr, query))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    #[test]
    fn test_classify_callback() {
        let accepted = classify_callback(&params(&[("code", "abc"), ("state", "s1")]), "s1");
        assert_eq!(
            accepted,
            CallbackOutcome::Accepted(CallbackResult {
                code: "abc".to_string(),
                state: "s1".to_string()
            })
        );

        assert_eq!(
            classify_callback(&params(&[("code", "abc"), ("state", "other")]), "s1"),
            CallbackOutcome::StateMismatch
        );
        assert!(matches!(
            classify_callback(&params(&[("state", "s1")]), "s1"),
            CallbackOutcome::Incomplete(_)
        ));
        assert!(matches!(
            classify_callback(&params(&[("code", "abc")]), "s1"),
            CallbackOutcome::Incomplete(_)
        ));
        assert_eq!(
            classify_callback(
                &params(&[("error", "access_denied"), ("error_description", "Permissions error"), ("state", "s1")]),
                "s1"
            ),
            CallbackOutcome::ProviderError("access_denied: Permissions error".to_string())
        );
    }

    #[tokio::test]
    async fn test_successful_redirect() {
        let pending = listener(5_000).start("state-ok").await.unwrap();
        let addr = pending.local_addr();

        let (status, body) = hit(addr, "code=auth-code&state=state-ok").await;
        assert_eq!(status, 200);
        assert!(body.contains("Autorização Concluída"));

        // requisições posteriores recebem a página de concluído
        let (status, body) = hit(addr, "code=other&state=state-ok").await;
        assert_eq!(status, 200);
        assert!(body.contains("já foi concluída"));

        let result = pending.wait().await.unwrap();
        assert_eq!(result.code, "auth-code");
        assert_eq!(result.state, "state-ok");
    }

    #[tokio::test]
    async fn test_state_mismatch_keeps_waiting_for_legitimate_redirect() {
        let pending = listener(5_000).start("expected").await.unwrap();
        let addr = pending.local_addr();

        let (status, _) = hit(addr, "code=evil&state=forged").await;
        assert_eq!(status, 400);

        let (status, _) = hit(addr, "code=good&state=expected").await;
        assert_eq!(status, 200);

        let result = pending.wait().await.unwrap();
        assert_eq!(result.code, "good");
    }

    #[tokio::test]
    async fn test_state_mismatch_then_deadline_is_state_mismatch() {
        let pending = listener(300).start("expected").await.unwrap();
        let (status, _) = hit(pending.local_addr(), "code=evil&state=forged").await;
        assert_eq!(status, 400);

        assert_eq!(pending.wait().await, Err(AuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_incomplete_and_provider_error_do_not_complete() {
        let pending = listener(300).start("s").await.unwrap();
        let addr = pending.local_addr();

        let (status, body) = hit(addr, "error=access_denied&error_description=%3Cb%3Eno%3C%2Fb%3E").await;
        assert_eq!(status, 400);
        assert!(body.contains("&lt;b&gt;no"));

        let (status, _) = hit(addr, "state=s").await;
        assert_eq!(status, 400);

        assert!(matches!(pending.wait().await, Err(AuthError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_timeout_releases_port() {
        let pending = listener(100).start("s").await.unwrap();
        let port = pending.local_addr().port();
        assert!(matches!(pending.wait().await, Err(AuthError::Timeout(_))));

        let again = CallbackListener::new(port, "/callback", Duration::from_millis(100))
            .start("s2")
            .await
            .unwrap();
        assert_eq!(again.local_addr().port(), port);
    }

    #[tokio::test]
    async fn test_port_in_use_is_port_unavailable() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let result = CallbackListener::new(port, "/callback", Duration::from_secs(1))
            .start("s")
            .await;
        assert!(matches!(result, Err(AuthError::PortUnavailable { port: p, .. }) if p == port));
    }

    #[tokio::test]
    async fn test_root_serves_waiting_page() {
        let pending = listener(1_000).start("s").await.unwrap();
        let body = browser()
            .get(format!("http://{}/", pending.local_addr()))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("Aguardando autorização"));
    }

    #[test]
    fn test_from_config() {
        let mut config = OAuthConfig::new("id", "secret");
        config.redirect_uri = "http://localhost:9123/oauth/done".to_string();
        let listener = CallbackListener::from_config(&config).unwrap();
        assert_eq!(listener.port(), 9123);
        assert_eq!(listener.path, "/oauth/done");
        assert_eq!(listener.host(), "127.0.0.1");

        config.redirect_uri = "http://[::1]:9124/callback".to_string();
        let listener = CallbackListener::from_config(&config).unwrap();
        assert_eq!(listener.host(), "::1");
        assert_eq!(listener.port(), 9124);
    }

    #[tokio::test]
    async fn test_binds_to_redirect_host() {
        let mut config = OAuthConfig::new("id", "secret");
        config.redirect_uri = "http://127.0.0.1:0/callback".to_string();
        let pending = CallbackListener::from_config(&config)
            .unwrap()
            .start("state")
            .await
            .unwrap();
        assert_eq!(pending.local_addr().ip().to_string(), "127.0.0.1");
    }
}

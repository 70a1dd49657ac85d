use async_trait::async_trait;
use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope, TokenUrl};
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;
use crate::auth::callback::CallbackListener;
use crate::auth::token::{TokenRecord, LONG_LIVED_DEFAULT_SECS, SHORT_LIVED_DEFAULT_SECS};
use crate::config::{OAuthConfig, RefreshGrant};
use crate::error::{AuthError, AuthResult};

/// Trocas com o provedor usadas pelo gerenciador de ciclo de vida
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Fluxo interativo completo (navegador + callback + troca de código)
    async fn authorize(&self) -> AuthResult<TokenRecord>;

    /// Renovação não interativa a partir do registro atual
    async fn refresh(&self, current: &TokenRecord) -> AuthResult<TokenRecord>;
}

/// Uma tentativa de autorização: vive até o código chegar ou o prazo acabar
#[derive(Debug, Clone)]
pub struct AuthorizationAttempt {
    pub url: Url,
    pub state: String,
    pub redirect_uri: String,
}

/// Fluxo OAuth2 do WhatsApp Business (diálogo da Meta + endpoint de token do Graph)
#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    config: OAuthConfig,
    http: reqwest::Client,
    open_browser: bool,
}

impl AuthorizationFlow {
    pub fn new(config: OAuthConfig) -> AuthResult<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AuthError::config_error(format!("falha ao criar cliente HTTP: {}", e)))?;

        Ok(Self {
            config,
            http,
            open_browser: true,
        })
    }

    /// Define se a URL de autorização é aberta automaticamente no navegador
    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    fn oauth_client(&self) -> AuthResult<BasicClient> {
        let auth_url = AuthUrl::new(self.config.authorization_endpoint())
            .map_err(|e| AuthError::config_error(format!("URL de autorização inválida: {}", e)))?;
        let token_url = TokenUrl::new(self.config.token_endpoint())
            .map_err(|e| AuthError::config_error(format!("URL de token inválida: {}", e)))?;
        let redirect_url = RedirectUrl::new(self.config.redirect_uri.clone())
            .map_err(|e| AuthError::config_error(format!("redirect URI inválida: {}", e)))?;

        Ok(BasicClient::new(
            ClientId::new(self.config.client_id.clone()),
            Some(ClientSecret::new(self.config.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_redirect_uri(redirect_url))
    }

    /// Gera a URL do diálogo OAuth com um `state` aleatório novo
    pub fn build_authorization_url(&self) -> AuthResult<AuthorizationAttempt> {
        let client = self.oauth_client()?;

        // a Meta espera os escopos separados por vírgula em um único parâmetro
        let (url, csrf_token) = client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(self.config.scopes.join(",")))
            .url();

        log::debug!("🌐 [OAuth2] URL de autorização gerada: {}", url);

        Ok(AuthorizationAttempt {
            url,
            state: csrf_token.secret().clone(),
            redirect_uri: self.config.redirect_uri.clone(),
        })
    }

    /// Fluxo interativo: gera a URL, espera o redirect e troca o código
    pub async fn authorize(&self) -> AuthResult<TokenRecord> {
        let attempt = self.build_authorization_url()?;
        self.complete_authorization(&attempt).await
    }

    /// Conclui uma tentativa já criada (permite exibir a URL antes de começar)
    pub async fn complete_authorization(
        &self,
        attempt: &AuthorizationAttempt,
    ) -> AuthResult<TokenRecord> {
        log::info!("🔑 [OAuth2] Iniciando autorização interativa");
        log::info!("📍 [OAuth2] {}", self.config.environment_info());

        let listener = CallbackListener::from_config(&self.config)?;
        let pending = listener.start(attempt.state.clone()).await?;

        self.surface_url(&attempt.url);
        log::info!("⏳ [OAuth2] Aguardando autorização do usuário...");

        let callback = pending.wait().await?;

        if callback.state != attempt.state {
            log::error!("❌ [OAuth2] State do callback não confere com a tentativa");
            return Err(AuthError::StateMismatch);
        }

        self.exchange_code(&callback.code).await
    }

    /// Conclusão manual: o operador cola o código ou a URL de redirect completa
    pub async fn complete_manual(
        &self,
        attempt: &AuthorizationAttempt,
        input: &str,
    ) -> AuthResult<TokenRecord> {
        let (code, state) = parse_manual_input(input)?;

        if let Some(state) = state {
            if state != attempt.state {
                log::error!("❌ [OAuth2] State da URL colada não confere com a tentativa");
                return Err(AuthError::StateMismatch);
            }
        }

        self.exchange_code(&code).await
    }

    fn surface_url(&self, url: &Url) {
        if !self.open_browser {
            log::info!("🔗 [OAuth2] Abra no navegador: {}", url);
            return;
        }

        match webbrowser::open(url.as_str()) {
            Ok(()) => log::info!("🌐 [OAuth2] Navegador aberto automaticamente"),
            Err(e) => {
                log::warn!("⚠️ [OAuth2] Não foi possível abrir o navegador: {}", e);
                log::info!("🔗 [OAuth2] Abra manualmente o link: {}", url);
            }
        }
    }

    /// Troca o código de autorização por um token
    ///
    /// Com o grant `fb_exchange_token`, o token curto é trocado em seguida por um
    /// de longa duração; se essa troca falhar, o token curto é mantido.
    pub async fn exchange_code(&self, code: &str) -> AuthResult<TokenRecord> {
        log::info!("🔄 [OAuth2] Trocando código de autorização por token...");

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let record = self.token_request(&form, SHORT_LIVED_DEFAULT_SECS).await?;
        log::info!("✅ [OAuth2] Token obtido: {}", record.preview());

        if self.config.refresh_grant != RefreshGrant::FbExchangeToken {
            return Ok(record);
        }

        match self.upgrade_to_long_lived(&record).await {
            Ok(long_lived) => Ok(long_lived),
            Err(e) => {
                log::warn!(
                    "⚠️ [OAuth2] Não foi possível obter token de longa duração, mantendo o token curto: {}",
                    e
                );
                Ok(record)
            }
        }
    }

    /// `grant_type=fb_exchange_token`: troca o token atual por um de longa duração
    pub async fn upgrade_to_long_lived(&self, current: &TokenRecord) -> AuthResult<TokenRecord> {
        let form = [
            ("grant_type", "fb_exchange_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("fb_exchange_token", current.access_token.as_str()),
        ];
        let mut record = self.token_request(&form, LONG_LIVED_DEFAULT_SECS).await?;
        if record.refresh_token.is_none() {
            record.refresh_token = current.refresh_token.clone();
        }
        log::info!(
            "🔁 [OAuth2] Token de longa duração obtido, expira em {}",
            record.expires_at
        );
        Ok(record)
    }

    /// Renovação não interativa com o grant configurado
    pub async fn refresh(&self, current: &TokenRecord) -> AuthResult<TokenRecord> {
        log::info!(
            "🔄 [OAuth2] Renovando token {} (grant {})",
            current.preview(),
            self.config.refresh_grant.as_str()
        );

        match self.config.refresh_grant {
            RefreshGrant::FbExchangeToken => self.upgrade_to_long_lived(current).await,
            RefreshGrant::RefreshToken => {
                let refresh_token = current.refresh_token.as_deref().ok_or_else(|| {
                    AuthError::rejected("registro sem refresh_token para o grant refresh_token")
                })?;
                let form = [
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", self.config.client_id.as_str()),
                    ("client_secret", self.config.client_secret.as_str()),
                ];
                let mut record = self.token_request(&form, LONG_LIVED_DEFAULT_SECS).await?;
                if record.refresh_token.is_none() {
                    record.refresh_token = current.refresh_token.clone();
                }
                Ok(record)
            }
        }
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
        default_lifetime_secs: i64,
    ) -> AuthResult<TokenRecord> {
        let obtained_at = Utc::now();

        let response = self
            .http
            .post(self.config.token_endpoint())
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let error = classify_error_response(status, &body);
            log::error!("❌ [OAuth2] Endpoint de token respondeu {}: {}", status, error);
            return Err(error);
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            AuthError::rejected(format!("resposta do endpoint de token não é JSON: {}", e))
        })?;

        if value.get("error").is_some() && value.get("access_token").is_none() {
            return Err(AuthError::rejected(provider_message(&body)));
        }

        TokenRecord::from_provider_response(value, obtained_at, default_lifetime_secs)
    }
}

#[async_trait]
impl TokenExchange for AuthorizationFlow {
    async fn authorize(&self) -> AuthResult<TokenRecord> {
        AuthorizationFlow::authorize(self).await
    }

    async fn refresh(&self, current: &TokenRecord) -> AuthResult<TokenRecord> {
        AuthorizationFlow::refresh(self, current).await
    }
}

/// Troca usada quando o app não tem client id/secret configurados
///
/// O token instalado manualmente continua sendo servido; renovar ou autorizar
/// falha com `ConfigError`.
#[derive(Debug, Clone)]
pub struct UnconfiguredExchange {
    reason: String,
}

impl UnconfiguredExchange {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TokenExchange for UnconfiguredExchange {
    async fn authorize(&self) -> AuthResult<TokenRecord> {
        Err(AuthError::config_error(format!(
            "autorização indisponível: {}",
            self.reason
        )))
    }

    async fn refresh(&self, _current: &TokenRecord) -> AuthResult<TokenRecord> {
        Err(AuthError::config_error(format!(
            "renovação indisponível: {}",
            self.reason
        )))
    }
}

/// Códigos do Graph para limite de chamadas e indisponibilidade temporária
const GRAPH_TRANSIENT_CODES: [i64; 9] = [1, 2, 4, 17, 32, 341, 613, 80004, 80007];

/// 5xx, 429 e erros do Graph marcados como passageiros (limite de chamadas)
/// viram falha de rede; o resto é recusa do provedor
pub fn classify_error_response(status: StatusCode, body: &str) -> AuthError {
    let message = provider_message(body);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || is_transient_graph_error(body)
    {
        AuthError::network(format!("HTTP {}: {}", status.as_u16(), message))
    } else {
        AuthError::rejected(format!("HTTP {}: {}", status.as_u16(), message))
    }
}

/// `error.is_transient` ou código de throttling no corpo de erro do Graph
fn is_transient_graph_error(body: &str) -> bool {
    let error = match serde_json::from_str::<Value>(body) {
        Ok(value) => match value.get("error") {
            Some(error) if error.is_object() => error.clone(),
            _ => return false,
        },
        Err(_) => return false,
    };

    if error.get("is_transient").and_then(Value::as_bool) == Some(true) {
        return true;
    }

    error
        .get("code")
        .and_then(Value::as_i64)
        .map(|code| GRAPH_TRANSIENT_CODES.contains(&code))
        .unwrap_or(false)
}

/// Extrai a mensagem de erro do corpo (formato Graph ou RFC 6749)
pub fn provider_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }

        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return match value.get("error_description").and_then(Value::as_str) {
                Some(description) => format!("{}: {}", error, description),
                None => error.to_string(),
            };
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "corpo vazio".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Aceita o código puro ou a URL de redirect inteira; devolve `(code, state)`
pub fn parse_manual_input(input: &str) -> AuthResult<(String, Option<String>)> {
    let input = input.trim().trim_matches(|c| c == '"' || c == '\'');
    if input.is_empty() {
        return Err(AuthError::rejected("nenhum código de autorização informado"));
    }

    let looks_like_url = input.starts_with("http://") || input.starts_with("https://");
    if !looks_like_url && !input.contains("code=") {
        return Ok((input.to_string(), None));
    }

    let url = if looks_like_url {
        Url::parse(input)
    } else {
        Url::parse(&format!("http://localhost/?{}", input.trim_start_matches('?')))
    }
    .map_err(|e| AuthError::rejected(format!("URL de redirect inválida: {}", e)))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" | "error_description" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(AuthError::rejected(format!("provedor retornou erro: {}", error)));
    }

    match code.filter(|c| !c.is_empty()) {
        Some(code) => Ok((code, state.filter(|s| !s.is_empty()))),
        None => Err(AuthError::rejected("URL de redirect sem parâmetro `code`")),
    }
}

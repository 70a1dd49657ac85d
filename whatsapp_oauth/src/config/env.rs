use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::{Host, Url};
use crate::error::{AuthError, AuthResult};

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";
pub const DEFAULT_SCOPES: &str =
    "whatsapp_business_management,whatsapp_business_messaging,business_management";
pub const DEFAULT_API_VERSION: &str = "v18.0";
pub const DEFAULT_DIALOG_BASE_URL: &str = "https://www.facebook.com";
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_TOKEN_FILE: &str = ".oauth_token_cache.json";

/// Renova quando faltar menos de 1 dia para expirar
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 24 * 3600;
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REFRESH_RETRY_BACKOFF_SECS: u64 = 30;

/// Grant usado na renovação não interativa
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshGrant {
    /// `grant_type=fb_exchange_token`: troca o token atual por um novo de longa duração
    FbExchangeToken,
    /// `grant_type=refresh_token` padrão do RFC 6749
    RefreshToken,
}

impl RefreshGrant {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshGrant::FbExchangeToken => "fb_exchange_token",
            RefreshGrant::RefreshToken => "refresh_token",
        }
    }
}

impl FromStr for RefreshGrant {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fb_exchange_token" | "exchange" => Ok(RefreshGrant::FbExchangeToken),
            "refresh_token" | "refresh" => Ok(RefreshGrant::RefreshToken),
            other => Err(AuthError::config_error(format!(
                "WHATSAPP_OAUTH_REFRESH_GRANT desconhecido: {}",
                other
            ))),
        }
    }
}

/// Configuração OAuth2 do app WhatsApp Business (Meta)
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Redirect registrado no app; porta e path definem o listener local
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub api_version: String,
    pub dialog_base_url: String,
    pub graph_base_url: String,
    pub token_file: PathBuf,
    pub refresh_threshold: Duration,
    pub callback_timeout: Duration,
    pub http_timeout: Duration,
    pub refresh_grant: RefreshGrant,
    pub refresh_retry_backoff: Duration,
}

impl OAuthConfig {
    /// Configuração com os valores padrão para um par client id/secret
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: parse_scopes(DEFAULT_SCOPES),
            api_version: DEFAULT_API_VERSION.to_string(),
            dialog_base_url: DEFAULT_DIALOG_BASE_URL.to_string(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            refresh_threshold: Duration::from_secs(DEFAULT_REFRESH_THRESHOLD_SECS),
            callback_timeout: Duration::from_secs(DEFAULT_CALLBACK_TIMEOUT_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            refresh_grant: RefreshGrant::FbExchangeToken,
            refresh_retry_backoff: Duration::from_secs(DEFAULT_REFRESH_RETRY_BACKOFF_SECS),
        }
    }

    /// Carrega a configuração das variáveis de ambiente (o .env já deve ter sido carregado)
    pub fn from_env() -> AuthResult<Self> {
        let client_id = Self::get_env_var("WHATSAPP_CLIENT_ID")?;
        let client_secret = Self::get_env_var("WHATSAPP_CLIENT_SECRET")?;

        Self::apply_env(Self::new(client_id, client_secret))
    }

    /// Como `from_env`, mas sem exigir client id/secret (tokens instalados manualmente)
    pub fn from_env_without_credentials() -> AuthResult<Self> {
        let client_id = Self::optional_var("WHATSAPP_CLIENT_ID").unwrap_or_default();
        let client_secret = Self::optional_var("WHATSAPP_CLIENT_SECRET").unwrap_or_default();

        Self::apply_env(Self::new(client_id, client_secret))
    }

    fn apply_env(mut config: Self) -> AuthResult<Self> {
        if let Some(uri) = Self::optional_var("WHATSAPP_OAUTH_REDIRECT_URI") {
            config.redirect_uri = uri;
        }
        if let Some(scopes) = Self::optional_var("WHATSAPP_OAUTH_SCOPES") {
            config.scopes = parse_scopes(&scopes);
        }
        if let Some(version) = Self::optional_var("WHATSAPP_API_VERSION") {
            config.api_version = version;
        }
        if let Some(base) = Self::optional_var("WHATSAPP_OAUTH_DIALOG_BASE_URL") {
            config.dialog_base_url = base;
        }
        if let Some(base) = Self::optional_var("WHATSAPP_GRAPH_BASE_URL") {
            config.graph_base_url = base;
        }
        if let Some(path) = Self::optional_var("WHATSAPP_TOKEN_FILE") {
            config.token_file = PathBuf::from(path);
        }
        if let Some(grant) = Self::optional_var("WHATSAPP_OAUTH_REFRESH_GRANT") {
            config.refresh_grant = grant.parse()?;
        }

        config.refresh_threshold =
            Self::secs_var("WHATSAPP_TOKEN_REFRESH_THRESHOLD_SECS", config.refresh_threshold)?;
        config.callback_timeout =
            Self::secs_var("WHATSAPP_OAUTH_CALLBACK_TIMEOUT_SECS", config.callback_timeout)?;
        config.http_timeout = Self::secs_var("WHATSAPP_HTTP_TIMEOUT_SECS", config.http_timeout)?;
        config.refresh_retry_backoff =
            Self::secs_var("WHATSAPP_REFRESH_RETRY_BACKOFF_SECS", config.refresh_retry_backoff)?;

        Ok(config)
    }

    /// Indica se client id e secret estão definidos no ambiente
    pub fn is_configured() -> bool {
        Self::optional_var("WHATSAPP_CLIENT_ID").is_some()
            && Self::optional_var("WHATSAPP_CLIENT_SECRET").is_some()
    }

    fn get_env_var(key: &str) -> AuthResult<String> {
        Self::optional_var(key)
            .ok_or_else(|| AuthError::config_error(format!("{} não encontrado", key)))
    }

    fn optional_var(key: &str) -> Option<String> {
        env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn secs_var(key: &str, default: Duration) -> AuthResult<Duration> {
        match Self::optional_var(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| AuthError::config_error(format!("{} deve ser um inteiro em segundos: {}", key, raw))),
        }
    }

    /// Valida se todas as configurações obrigatórias estão presentes
    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.is_empty() {
            return Err(AuthError::config_error("WHATSAPP_CLIENT_ID é obrigatório"));
        }

        if self.client_secret.is_empty() {
            return Err(AuthError::config_error("WHATSAPP_CLIENT_SECRET é obrigatório"));
        }

        if self.scopes.is_empty() {
            return Err(AuthError::config_error("WHATSAPP_OAUTH_SCOPES não pode ser vazio"));
        }

        let redirect = self.redirect_url()?;
        if redirect.scheme() != "http" && redirect.scheme() != "https" {
            return Err(AuthError::config_error(
                "WHATSAPP_OAUTH_REDIRECT_URI deve usar http:// ou https://",
            ));
        }
        if redirect.port_or_known_default().is_none() {
            return Err(AuthError::config_error(
                "WHATSAPP_OAUTH_REDIRECT_URI precisa de uma porta",
            ));
        }

        Url::parse(&self.authorization_endpoint())
            .map_err(|e| AuthError::config_error(format!("URL de autorização inválida: {}", e)))?;
        Url::parse(&self.token_endpoint())
            .map_err(|e| AuthError::config_error(format!("URL de token inválida: {}", e)))?;

        Ok(())
    }

    pub fn redirect_url(&self) -> AuthResult<Url> {
        Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::config_error(format!(
                "WHATSAPP_OAUTH_REDIRECT_URI inválida ({}): {}",
                self.redirect_uri, e
            ))
        })
    }

    /// Porta local onde o listener de callback escuta
    pub fn callback_port(&self) -> AuthResult<u16> {
        self.redirect_url()?
            .port_or_known_default()
            .ok_or_else(|| AuthError::config_error("WHATSAPP_OAUTH_REDIRECT_URI sem porta"))
    }

    /// Endereço onde o listener de callback faz o bind, tirado do host do redirect
    ///
    /// `localhost` vira `127.0.0.1`; IPs literais (inclusive IPv6) são usados
    /// como estão e outros nomes são resolvidos no bind.
    pub fn callback_host(&self) -> AuthResult<String> {
        match self.redirect_url()?.host() {
            Some(Host::Ipv4(ip)) => Ok(ip.to_string()),
            Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
            Some(Host::Domain(domain)) if domain.eq_ignore_ascii_case("localhost") => {
                Ok("127.0.0.1".to_string())
            }
            Some(Host::Domain(domain)) => Ok(domain.to_string()),
            None => Err(AuthError::config_error("WHATSAPP_OAUTH_REDIRECT_URI sem host")),
        }
    }

    /// Path do redirect (ex.: `/callback`)
    pub fn callback_path(&self) -> AuthResult<String> {
        let url = self.redirect_url()?;
        let path = url.path();
        Ok(if path.is_empty() { "/".to_string() } else { path.to_string() })
    }

    /// Endpoint humano do diálogo OAuth
    pub fn authorization_endpoint(&self) -> String {
        format!(
            "{}/{}/dialog/oauth",
            self.dialog_base_url.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        )
    }

    /// Endpoint de troca de token
    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth/access_token",
            self.graph_base_url.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        )
    }

    /// Resumo seguro para logs (sem secret)
    pub fn environment_info(&self) -> String {
        format!(
            "client_id={} redirect_uri={} api_version={} token_file={} refresh_grant={}",
            self.client_id,
            self.redirect_uri,
            self.api_version,
            self.token_file.display(),
            self.refresh_grant.as_str()
        )
    }
}

fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OPTIONAL_VARS: [&str; 11] = [
        "WHATSAPP_OAUTH_REDIRECT_URI",
        "WHATSAPP_OAUTH_SCOPES",
        "WHATSAPP_API_VERSION",
        "WHATSAPP_OAUTH_DIALOG_BASE_URL",
        "WHATSAPP_GRAPH_BASE_URL",
        "WHATSAPP_TOKEN_FILE",
        "WHATSAPP_OAUTH_REFRESH_GRANT",
        "WHATSAPP_TOKEN_REFRESH_THRESHOLD_SECS",
        "WHATSAPP_OAUTH_CALLBACK_TIMEOUT_SECS",
        "WHATSAPP_HTTP_TIMEOUT_SECS",
        "WHATSAPP_REFRESH_RETRY_BACKOFF_SECS",
    ];

    #[test]
    fn test_from_env_with_defaults() {
        let mut vars: Vec<(&str, Option<&str>)> =
            OPTIONAL_VARS.iter().map(|k| (*k, None)).collect();
        vars.push(("WHATSAPP_CLIENT_ID", Some("app_123")));
        vars.push(("WHATSAPP_CLIENT_SECRET", Some("secret_456")));

        temp_env::with_vars(vars, || {
            let config = OAuthConfig::from_env().unwrap();
            assert_eq!(config.client_id, "app_123");
            assert_eq!(config.client_secret, "secret_456");
            assert_eq!(config.redirect_uri, DEFAULT_REDIRECT_URI);
            assert_eq!(
                config.scopes,
                vec![
                    "whatsapp_business_management".to_string(),
                    "whatsapp_business_messaging".to_string(),
                    "business_management".to_string(),
                ]
            );
            assert_eq!(config.refresh_threshold, Duration::from_secs(86_400));
            assert_eq!(config.callback_timeout, Duration::from_secs(300));
            assert_eq!(config.refresh_grant, RefreshGrant::FbExchangeToken);
            assert!(config.validate().is_ok());
        });
    }

    #[test]
    fn test_from_env_missing_credentials() {
        temp_env::with_vars_unset(vec!["WHATSAPP_CLIENT_ID", "WHATSAPP_CLIENT_SECRET"], || {
            let result = OAuthConfig::from_env();
            assert!(matches!(result, Err(AuthError::ConfigError(_))));
            assert!(!OAuthConfig::is_configured());
        });
    }

    #[test]
    fn test_from_env_without_credentials() {
        temp_env::with_vars(
            vec![
                ("WHATSAPP_CLIENT_ID", None),
                ("WHATSAPP_CLIENT_SECRET", None),
                ("WHATSAPP_TOKEN_FILE", Some("/tmp/whatsapp-token.json")),
            ],
            || {
                let config = OAuthConfig::from_env_without_credentials().unwrap();
                assert_eq!(config.client_id, "");
                assert_eq!(config.token_file, PathBuf::from("/tmp/whatsapp-token.json"));
                assert!(config.validate().is_err());
            },
        );
    }

    #[test]
    fn test_from_env_overrides() {
        temp_env::with_vars(
            vec![
                ("WHATSAPP_CLIENT_ID", Some("app")),
                ("WHATSAPP_CLIENT_SECRET", Some("secret")),
                ("WHATSAPP_OAUTH_REDIRECT_URI", Some("http://localhost:9191/oauth/return")),
                ("WHATSAPP_OAUTH_SCOPES", Some("a, b c")),
                ("WHATSAPP_API_VERSION", Some("v21.0")),
                ("WHATSAPP_OAUTH_REFRESH_GRANT", Some("refresh_token")),
                ("WHATSAPP_TOKEN_REFRESH_THRESHOLD_SECS", Some("7200")),
            ],
            || {
                let config = OAuthConfig::from_env().unwrap();
                assert_eq!(config.callback_port().unwrap(), 9191);
                assert_eq!(config.callback_path().unwrap(), "/oauth/return");
                assert_eq!(config.scopes, vec!["a", "b", "c"]);
                assert_eq!(config.refresh_grant, RefreshGrant::RefreshToken);
                assert_eq!(config.refresh_threshold, Duration::from_secs(7200));
                assert_eq!(
                    config.token_endpoint(),
                    "https://graph.facebook.com/v21.0/oauth/access_token"
                );
            },
        );
    }

    #[test]
    fn test_invalid_numeric_override() {
        temp_env::with_vars(
            vec![
                ("WHATSAPP_CLIENT_ID", Some("app")),
                ("WHATSAPP_CLIENT_SECRET", Some("secret")),
                ("WHATSAPP_OAUTH_CALLBACK_TIMEOUT_SECS", Some("five minutes")),
            ],
            || {
                let err = OAuthConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("WHATSAPP_OAUTH_CALLBACK_TIMEOUT_SECS"));
            },
        );
    }

    #[test]
    fn test_endpoints() {
        let config = OAuthConfig::new("id", "secret");
        assert_eq!(
            config.authorization_endpoint(),
            "https://www.facebook.com/v18.0/dialog/oauth"
        );
        assert_eq!(
            config.token_endpoint(),
            "https://graph.facebook.com/v18.0/oauth/access_token"
        );
        assert_eq!(config.callback_port().unwrap(), 8080);
        assert_eq!(config.callback_path().unwrap(), "/callback");
    }

    #[test]
    fn test_callback_host_follows_redirect() {
        let mut config = OAuthConfig::new("id", "secret");
        assert_eq!(config.callback_host().unwrap(), "127.0.0.1");

        config.redirect_uri = "http://[::1]:8765/cb".to_string();
        assert_eq!(config.callback_host().unwrap(), "::1");
        assert_eq!(config.callback_port().unwrap(), 8765);

        config.redirect_uri = "http://192.168.0.10:8080/callback".to_string();
        assert_eq!(config.callback_host().unwrap(), "192.168.0.10");

        config.redirect_uri = "http://devbox.lan:8080/callback".to_string();
        assert_eq!(config.callback_host().unwrap(), "devbox.lan");
    }

    #[test]
    fn test_validate_rejects_bad_redirect() {
        let mut config = OAuthConfig::new("id", "secret");
        config.redirect_uri = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.redirect_uri = "ftp://localhost:21/callback".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let config = OAuthConfig::new("id", "");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("WHATSAPP_CLIENT_SECRET"));
    }

    #[test]
    fn test_refresh_grant_parse() {
        assert_eq!("fb_exchange_token".parse::<RefreshGrant>().unwrap(), RefreshGrant::FbExchangeToken);
        assert_eq!("REFRESH_TOKEN".parse::<RefreshGrant>().unwrap(), RefreshGrant::RefreshToken);
        assert!("client_credentials".parse::<RefreshGrant>().is_err());
    }

    #[test]
    fn test_environment_info_hides_secret() {
        let config = OAuthConfig::new("id", "super-secret");
        assert!(!config.environment_info().contains("super-secret"));
    }
}

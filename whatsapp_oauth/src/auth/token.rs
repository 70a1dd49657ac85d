use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use crate::error::{AuthError, AuthResult};

/// Validade assumida para o token curto da troca de código quando o provedor omite `expires_in`
pub const SHORT_LIVED_DEFAULT_SECS: i64 = 3600;

/// Validade assumida para tokens de longa duração (60 dias)
pub const LONG_LIVED_DEFAULT_SECS: i64 = 60 * 24 * 3600;

/// Teto aplicado a `expires_in` para manter as datas representáveis
const MAX_LIFETIME_SECS: i64 = 10 * 365 * 24 * 3600;

/// Registro persistido e cacheado do token OAuth2
///
/// Invariantes: `access_token` não vazio e `expires_at > obtained_at`.
/// Campos secretos nunca são copiados para `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub access_token: String,
    pub token_type: String,
    pub obtained_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl TokenRecord {
    /// Cria um registro a partir de um token com validade em segundos
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        obtained_at: DateTime<Utc>,
        expires_in_secs: i64,
    ) -> AuthResult<Self> {
        if expires_in_secs <= 0 {
            return Err(AuthError::rejected(format!(
                "validade do token deve ser positiva (recebido {}s)",
                expires_in_secs
            )));
        }

        let record = Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            obtained_at,
            expires_at: obtained_at + ChronoDuration::seconds(expires_in_secs.min(MAX_LIFETIME_SECS)),
            refresh_token: None,
            raw: Map::new(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Constrói o registro a partir do JSON devolvido pelo endpoint de token
    ///
    /// `expires_at = obtained_at + expires_in`; ausente ou não positivo usa `default_lifetime_secs`.
    pub fn from_provider_response(
        body: Value,
        obtained_at: DateTime<Utc>,
        default_lifetime_secs: i64,
    ) -> AuthResult<Self> {
        let mut fields = match body {
            Value::Object(map) => map,
            other => {
                return Err(AuthError::rejected(format!(
                    "resposta de token inesperada: {}",
                    other
                )))
            }
        };

        let access_token = match fields.remove("access_token") {
            Some(Value::String(token)) if !token.trim().is_empty() => token,
            _ => return Err(AuthError::rejected("resposta do provedor sem access_token")),
        };

        let refresh_token = match fields.remove("refresh_token") {
            Some(Value::String(token)) if !token.is_empty() => Some(token),
            _ => None,
        };

        let token_type = fields
            .get("token_type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or("bearer")
            .to_string();

        let expires_in = fields
            .get("expires_in")
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            })
            .filter(|secs| *secs > 0)
            .unwrap_or(default_lifetime_secs);

        let mut record = Self::new(access_token, token_type, obtained_at, expires_in)?;
        record.refresh_token = refresh_token;
        record.raw = fields;
        Ok(record)
    }

    /// Verifica as invariantes do registro
    pub fn validate(&self) -> AuthResult<()> {
        if self.access_token.trim().is_empty() {
            return Err(AuthError::rejected("access_token vazio"));
        }
        if self.expires_at <= self.obtained_at {
            return Err(AuthError::rejected(format!(
                "expiração ({}) não é posterior à emissão ({})",
                self.expires_at, self.obtained_at
            )));
        }
        Ok(())
    }

    /// Tempo restante até a expiração (negativo se já expirou)
    pub fn remaining(&self, now: DateTime<Utc>) -> ChronoDuration {
        self.expires_at - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Verdadeiro quando o tempo restante não excede o limiar de renovação
    pub fn needs_refresh(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let threshold = ChronoDuration::from_std(threshold)
            .unwrap_or_else(|_| ChronoDuration::seconds(MAX_LIFETIME_SECS));
        self.remaining(now) <= threshold
    }

    /// Retorna o token no formato de autorização para requisições HTTP
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Prévia segura do token para logs
    pub fn preview(&self) -> String {
        token_preview(&self.access_token)
    }
}

/// Primeiros caracteres de um segredo seguidos de `...`
pub fn token_preview(secret: &str) -> String {
    let head: String = secret.chars().take(6).collect();
    format!("{}...", head)
}

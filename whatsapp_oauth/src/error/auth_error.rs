use std::time::Duration;
use thiserror::Error;

/// Tipos de erro do ciclo de vida do token OAuth2
///
/// `Clone` porque o gerenciador guarda a última falha de renovação para
/// responder aos chamadores seguintes sem voltar ao provedor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Nenhuma credencial utilizável: {0}")]
    Unauthenticated(String),

    #[error("Estado OAuth2 inválido: o callback não pertence a esta tentativa de autorização")]
    StateMismatch,

    #[error("Timeout aguardando o redirecionamento de autorização ({}s)", .0.as_secs())]
    Timeout(Duration),

    #[error("Provedor rejeitou a troca de token: {0}")]
    ExchangeRejected(String),

    #[error("Falha de rede: {0}")]
    NetworkFailure(String),

    #[error("Erro de persistência do token: {0}")]
    PersistenceError(String),

    #[error("Porta de callback {port} indisponível: {reason}")]
    PortUnavailable { port: u16, reason: String },

    #[error("Erro do servidor de callback: {0}")]
    ListenerFailure(String),

    #[error("Configuração inválida: {0}")]
    ConfigError(String),
}

impl AuthError {
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::ExchangeRejected(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkFailure(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceError(msg.into())
    }

    pub fn listener(msg: impl Into<String>) -> Self {
        Self::ListenerFailure(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// O operador precisa rodar o fluxo interativo de novo
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_) | Self::ExchangeRejected(_) | Self::StateMismatch
        )
    }

    /// Falha passageira: a chamada externa pode ser repetida mais tarde
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkFailure(_) | Self::Timeout(_))
    }

    /// Orientação exibida ao operador após uma falha do fluxo interativo
    pub fn operator_hint(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => {
                "Execute `whatsapp-mcp-server authorize` para obter um novo token."
            }
            Self::StateMismatch => {
                "O callback recebido não corresponde a esta tentativa (possível interceptação). \
                 Inicie uma nova autorização e use apenas o link exibido por ela."
            }
            Self::Timeout(_) => {
                "Nenhum redirecionamento chegou a tempo. Tente de novo ou use `authorize --manual` \
                 se o navegador não alcança este host."
            }
            Self::ExchangeRejected(_) => {
                "O provedor recusou o código/token. Verifique WHATSAPP_CLIENT_SECRET (gere um novo \
                 secret no painel do app se necessário) e reautorize."
            }
            Self::NetworkFailure(_) => "Falha transitória de rede. Tente novamente em instantes.",
            Self::PersistenceError(_) => {
                "Não foi possível gravar/ler o cache do token. Verifique permissões e espaço em \
                 disco de WHATSAPP_TOKEN_FILE."
            }
            Self::PortUnavailable { .. } => {
                "A porta do redirect está ocupada. Libere a porta, ajuste \
                 WHATSAPP_OAUTH_REDIRECT_URI (e o cadastro no app) ou use `authorize --manual`."
            }
            Self::ListenerFailure(_) => {
                "O servidor local de callback parou. Tente de novo ou use `authorize --manual`."
            }
            Self::ConfigError(_) => {
                "Revise WHATSAPP_CLIENT_ID, WHATSAPP_CLIENT_SECRET e WHATSAPP_OAUTH_REDIRECT_URI no .env."
            }
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkFailure(err.to_string())
    }
}

/// Tipo de resultado padrão para operações de autenticação
pub type AuthResult<T> = Result<T, AuthError>;

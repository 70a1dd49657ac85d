//! Fachada do ciclo de vida do token.
//!
//! Um único `tokio::sync::Mutex` guarda o cache e serializa renovações: quem
//! chega durante uma troca espera o resultado dela em vez de iniciar outra.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use crate::auth::oauth::{AuthorizationFlow, TokenExchange};
use crate::auth::store::{FileTokenStore, TokenStore};
use crate::auth::token::TokenRecord;
use crate::config::OAuthConfig;
use crate::error::{AuthError, AuthResult};

/// Interface consumida por quem só precisa de um token válido
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_valid_token(&self) -> AuthResult<String>;

    /// A API respondeu 401 para este token; a próxima chamada força renovação
    async fn report_unauthorized(&self, token: &str);
}

/// Fase do ciclo de vida, por processo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unauthenticated,
    Authorizing,
    Authorized,
    NearExpiry,
    Refreshing,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unauthenticated => "unauthenticated",
            LifecycleState::Authorizing => "authorizing",
            LifecycleState::Authorized => "authorized",
            LifecycleState::NearExpiry => "near_expiry",
            LifecycleState::Refreshing => "refreshing",
            LifecycleState::Failed => "failed",
        }
    }
}

/// Se uma recusa na renovação pode escalar para o fluxo com navegador
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interactivity {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPolicy {
    /// Renova quando o tempo restante não passa deste limiar
    pub threshold: Duration,
    /// Depois de uma falha, chamadores não voltam ao provedor durante este intervalo
    pub retry_backoff: Duration,
}

impl RefreshPolicy {
    pub fn from_config(config: &OAuthConfig) -> Self {
        Self {
            threshold: config.refresh_threshold,
            retry_backoff: config.refresh_retry_backoff,
        }
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(crate::config::env::DEFAULT_REFRESH_THRESHOLD_SECS),
            retry_backoff: Duration::from_secs(crate::config::env::DEFAULT_REFRESH_RETRY_BACKOFF_SECS),
        }
    }
}

/// Retrato do estado para `status` e `/auth/status`; nunca contém segredos
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub state: LifecycleState,
    pub has_token: bool,
    pub token_preview: Option<String>,
    pub token_type: Option<String>,
    pub obtained_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_secs: Option<i64>,
    pub needs_refresh: bool,
    pub has_refresh_token: bool,
    pub refresh_threshold_secs: u64,
    pub store_location: String,
    pub persistence_warning: Option<String>,
    pub last_error: Option<String>,
}

struct CacheState {
    record: Option<TokenRecord>,
    phase: LifecycleState,
    invalidated: bool,
    /// Token recusado pelo provedor; não é recarregado do disco
    rejected_token: Option<String>,
    last_failure: Option<(Instant, AuthError)>,
    persistence_warning: Option<String>,
}

impl CacheState {
    fn empty() -> Self {
        Self {
            record: None,
            phase: LifecycleState::Unauthenticated,
            invalidated: false,
            rejected_token: None,
            last_failure: None,
            persistence_warning: None,
        }
    }
}

/// Cópia do estado legível sem esperar uma renovação em andamento
#[derive(Clone)]
struct Observed {
    phase: LifecycleState,
    record: Option<TokenRecord>,
    persistence_warning: Option<String>,
    last_error: Option<String>,
}

pub struct TokenLifecycleManager {
    store: Arc<dyn TokenStore>,
    exchange: Arc<dyn TokenExchange>,
    policy: RefreshPolicy,
    interactivity: Interactivity,
    state: Mutex<CacheState>,
    observed: RwLock<Observed>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        exchange: Arc<dyn TokenExchange>,
        policy: RefreshPolicy,
        interactivity: Interactivity,
    ) -> Self {
        Self {
            store,
            exchange,
            policy,
            interactivity,
            state: Mutex::new(CacheState::empty()),
            observed: RwLock::new(Observed {
                phase: LifecycleState::Unauthenticated,
                record: None,
                persistence_warning: None,
                last_error: None,
            }),
        }
    }

    /// Arquivo de token e fluxo OAuth2 montados a partir da configuração
    pub fn from_config(config: OAuthConfig, interactivity: Interactivity) -> AuthResult<Self> {
        let store = Arc::new(FileTokenStore::new(config.token_file.clone()));
        let policy = RefreshPolicy::from_config(&config);
        let flow = AuthorizationFlow::new(config)?;
        Ok(Self::new(store, Arc::new(flow), policy, interactivity))
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    pub fn store_location(&self) -> String {
        self.store.location()
    }

    /// Token válido para a próxima chamada à API
    ///
    /// Sem token conhecido retorna `Unauthenticated`; nunca abre o navegador
    /// por conta própria.
    pub async fn get_valid_token(&self) -> AuthResult<String> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state)?;

        let record = match state.record.clone() {
            Some(record) => record,
            None => {
                return Err(AuthError::unauthenticated(
                    "nenhum token armazenado; execute a autorização",
                ))
            }
        };

        let now = Utc::now();
        if !state.invalidated && !record.needs_refresh(now, self.policy.threshold) {
            return Ok(record.access_token);
        }

        if let Some((failed_at, error)) = &state.last_failure {
            if failed_at.elapsed() < self.policy.retry_backoff {
                if Self::can_serve_stale(&state, &record) {
                    log::debug!("⏳ [TokenManager] Em espera após falha, usando token atual");
                    return Ok(record.access_token);
                }
                return Err(error.clone());
            }
        }

        match self.refresh_locked(&mut state, &record).await {
            Ok(fresh) => Ok(fresh.access_token),
            Err(error) if !error.requires_reauthorization() && Self::can_serve_stale(&state, &record) => {
                log::warn!(
                    "⚠️ [TokenManager] Renovação falhou ({}), usando token ainda válido até {}",
                    error,
                    record.expires_at
                );
                Ok(record.access_token)
            }
            Err(error) => Err(error),
        }
    }

    /// Fluxo interativo sob o mesmo portão das renovações
    pub async fn authorize(&self) -> AuthResult<TokenRecord> {
        let mut state = self.state.lock().await;
        self.authorize_locked(&mut state).await
    }

    /// Renova agora, ignorando limiar e espera após falha
    pub async fn force_refresh(&self) -> AuthResult<TokenRecord> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state)?;

        let record = state.record.clone().ok_or_else(|| {
            AuthError::unauthenticated("nenhum token armazenado para renovar")
        })?;

        self.refresh_locked(&mut state, &record).await
    }

    /// Instala um token obtido fora do fluxo (ex.: token de sistema do Business Manager)
    pub async fn install(&self, record: TokenRecord) -> AuthResult<TokenRecord> {
        let mut state = self.state.lock().await;
        log::info!("📥 [TokenManager] Instalando token {}", record.preview());
        self.commit(&mut state, record)
    }

    /// Esquece o token em memória e no armazenamento
    pub async fn clear(&self) -> AuthResult<()> {
        let mut state = self.state.lock().await;
        self.store.clear()?;
        *state = CacheState::empty();
        self.publish(&state);
        log::info!("🗑️ [TokenManager] Token removido");
        Ok(())
    }

    /// Marca o token como recusado pela API; só vale se ainda for o token atual
    pub async fn invalidate(&self, token: &str) {
        let mut state = self.state.lock().await;
        let is_current = state
            .record
            .as_ref()
            .map(|r| r.access_token == token)
            .unwrap_or(false);

        if is_current {
            log::warn!(
                "🚫 [TokenManager] Token {} recusado pela API, renovação forçada na próxima chamada",
                crate::auth::token::token_preview(token)
            );
            state.invalidated = true;
            state.last_failure = None;
            self.publish(&state);
        }
    }

    /// Estado atual sem acesso à rede
    pub async fn status(&self) -> TokenStatus {
        // renovação em andamento: responde com a última cópia publicada
        if let Ok(mut state) = self.state.try_lock() {
            if let Err(e) = self.ensure_loaded(&mut state) {
                if let Ok(mut observed) = self.observed.write() {
                    observed.last_error = Some(e.to_string());
                }
            }
        }

        let observed = match self.observed.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let now = Utc::now();
        let needs_refresh = observed
            .record
            .as_ref()
            .map(|r| r.needs_refresh(now, self.policy.threshold))
            .unwrap_or(false);

        let state = match observed.phase {
            LifecycleState::Authorized if needs_refresh => LifecycleState::NearExpiry,
            phase => phase,
        };

        TokenStatus {
            state,
            has_token: observed.record.is_some(),
            token_preview: observed.record.as_ref().map(TokenRecord::preview),
            token_type: observed.record.as_ref().map(|r| r.token_type.clone()),
            obtained_at: observed.record.as_ref().map(|r| r.obtained_at),
            expires_at: observed.record.as_ref().map(|r| r.expires_at),
            remaining_secs: observed.record.as_ref().map(|r| r.remaining(now).num_seconds()),
            needs_refresh,
            has_refresh_token: observed
                .record
                .as_ref()
                .map(|r| r.refresh_token.is_some())
                .unwrap_or(false),
            refresh_threshold_secs: self.policy.threshold.as_secs(),
            store_location: self.store.location(),
            persistence_warning: observed.persistence_warning,
            last_error: observed.last_error,
        }
    }

    /// Carrega do armazenamento enquanto o cache estiver vazio
    fn ensure_loaded(&self, state: &mut CacheState) -> AuthResult<()> {
        if state.record.is_some() {
            return Ok(());
        }

        match self.store.load() {
            Ok(Some(record)) => {
                if state.rejected_token.as_deref() == Some(record.access_token.as_str()) {
                    log::debug!("🔍 [TokenManager] Token armazenado já foi recusado, ignorando");
                    return Ok(());
                }

                log::info!(
                    "🔍 [TokenManager] Token carregado de {} ({}), expira em {}",
                    self.store.location(),
                    record.preview(),
                    record.expires_at
                );
                let phase = if record.needs_refresh(Utc::now(), self.policy.threshold) {
                    LifecycleState::NearExpiry
                } else {
                    LifecycleState::Authorized
                };
                state.rejected_token = None;
                state.record = Some(record);
                self.transition(state, phase);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                log::error!("❌ [TokenManager] Falha ao carregar token: {}", e);
                Err(e)
            }
        }
    }

    async fn refresh_locked(
        &self,
        state: &mut CacheState,
        current: &TokenRecord,
    ) -> AuthResult<TokenRecord> {
        log::info!(
            "🔄 [TokenManager] Renovando token {} (expira em {})",
            current.preview(),
            current.expires_at
        );
        self.transition(state, LifecycleState::Refreshing);

        match self.exchange.refresh(current).await {
            Ok(fresh) => self.commit(state, fresh),
            Err(error) if error.requires_reauthorization() => {
                log::warn!("🚫 [TokenManager] Provedor recusou a renovação: {}", error);
                state.rejected_token = Some(current.access_token.clone());
                state.record = None;
                state.invalidated = false;
                state.last_failure = None;
                self.record_error(&error);

                match self.interactivity {
                    Interactivity::Interactive => self.authorize_locked(state).await,
                    Interactivity::NonInteractive => {
                        self.transition(state, LifecycleState::Unauthenticated);
                        Err(AuthError::unauthenticated(format!(
                            "renovação recusada pelo provedor ({}); execute a autorização",
                            error
                        )))
                    }
                }
            }
            Err(error) => {
                log::error!("❌ [TokenManager] Falha na renovação: {}", error);
                state.last_failure = Some((Instant::now(), error.clone()));
                self.record_error(&error);
                self.transition(state, LifecycleState::Failed);
                Err(error)
            }
        }
    }

    async fn authorize_locked(&self, state: &mut CacheState) -> AuthResult<TokenRecord> {
        log::info!("🔑 [TokenManager] Iniciando autorização interativa");
        self.transition(state, LifecycleState::Authorizing);

        match self.exchange.authorize().await {
            Ok(record) => self.commit(state, record),
            Err(error) => {
                log::error!("❌ [TokenManager] Autorização falhou: {}", error);
                self.record_error(&error);
                let phase = if state.record.is_some() {
                    LifecycleState::Failed
                } else {
                    LifecycleState::Unauthenticated
                };
                self.transition(state, phase);
                Err(error)
            }
        }
    }

    /// Persiste e publica um registro novo; falha de gravação vira aviso
    fn commit(&self, state: &mut CacheState, record: TokenRecord) -> AuthResult<TokenRecord> {
        record.validate()?;

        match self.store.save(&record) {
            Ok(()) => state.persistence_warning = None,
            Err(e) => {
                log::error!(
                    "❌ [TokenManager] Token obtido mas não persistido ({}); mantido apenas em memória",
                    e
                );
                state.persistence_warning = Some(e.to_string());
            }
        }

        log::info!(
            "✅ [TokenManager] Token {} ativo até {}",
            record.preview(),
            record.expires_at
        );

        state.record = Some(record.clone());
        state.invalidated = false;
        state.rejected_token = None;
        state.last_failure = None;
        self.clear_error();
        self.transition(state, LifecycleState::Authorized);
        Ok(record)
    }

    fn can_serve_stale(state: &CacheState, record: &TokenRecord) -> bool {
        !state.invalidated
            && state.record.as_ref() == Some(record)
            && !record.is_expired(Utc::now())
    }

    fn transition(&self, state: &mut CacheState, phase: LifecycleState) {
        if state.phase != phase {
            log::debug!(
                "🔀 [TokenManager] {} -> {}",
                state.phase.as_str(),
                phase.as_str()
            );
        }
        state.phase = phase;
        self.publish(state);
    }

    fn publish(&self, state: &CacheState) {
        if let Ok(mut observed) = self.observed.write() {
            observed.phase = state.phase;
            observed.record = state.record.clone();
            observed.persistence_warning = state.persistence_warning.clone();
        }
    }

    fn record_error(&self, error: &AuthError) {
        if let Ok(mut observed) = self.observed.write() {
            observed.last_error = Some(error.to_string());
        }
    }

    fn clear_error(&self) {
        if let Ok(mut observed) = self.observed.write() {
            observed.last_error = None;
        }
    }
}

#[async_trait]
impl TokenProvider for TokenLifecycleManager {
    async fn get_valid_token(&self) -> AuthResult<String> {
        TokenLifecycleManager::get_valid_token(self).await
    }

    async fn report_unauthorized(&self, token: &str) {
        self.invalidate(token).await
    }
}

//! # WhatsApp OAuth
//!
//! Ciclo de vida do token OAuth2 usado pela WhatsApp Business Cloud API (Graph API da Meta).
//!
//! ## Features
//!
//! - Fluxo authorization-code com listener local de callback e fallback manual
//! - Troca por token de longa duração e renovação não interativa
//! - Cache do token em arquivo com gravação atômica
//! - Renovação single-flight: chamadas concorrentes compartilham uma única troca
//!
//! ## Exemplo
//!
//! ```no_run
//! use whatsapp_oauth::{Interactivity, OAuthConfig, TokenLifecycleManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OAuthConfig::from_env()?;
//!     let manager = TokenLifecycleManager::from_config(config, Interactivity::NonInteractive)?;
//!     let token = manager.get_valid_token().await?;
//!     println!("Token pronto: {}...", &token[..6.min(token.len())]);
//!     Ok(())
//! }
//! ```

/// Módulo de autenticação OAuth2
pub mod auth;

/// Módulo de configuração
pub mod config;

/// Módulo de tratamento de erros
pub mod error;

// Re-exportações para conveniência
pub use auth::{
    AuthorizationAttempt, AuthorizationFlow, FileTokenStore, Interactivity, LifecycleState,
    MemoryTokenStore, RefreshPolicy, TokenExchange, TokenLifecycleManager, TokenProvider,
    TokenRecord, TokenStatus, TokenStore, UnconfiguredExchange,
};
pub use config::{OAuthConfig, RefreshGrant};
pub use error::{AuthError, AuthResult};

pub mod callback;
pub mod manager;
pub mod oauth;
pub mod store;
pub mod token;

pub use callback::{CallbackListener, CallbackResult, PendingCallback};
pub use manager::{
    Interactivity, LifecycleState, RefreshPolicy, TokenLifecycleManager, TokenProvider, TokenStatus,
};
pub use oauth::{AuthorizationAttempt, AuthorizationFlow, TokenExchange, UnconfiguredExchange};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::TokenRecord;

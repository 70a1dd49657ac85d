pub mod env;

pub use env::{OAuthConfig, RefreshGrant};

//! Vigil: API token issuance and verification for the CCTV analytics
//! backend.
//!
//! The binary (`src/main.rs`) wires these modules to Postgres; the
//! integration tests in `tests/` use the in-memory store.

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod store;

use std::sync::Arc;

use auth::{TokenIssuer, TokenVerifier};
use store::{AccountDirectory, TokenStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub issuer: TokenIssuer,
    pub verifier: TokenVerifier,
    pub tokens: Arc<dyn TokenStore>,
    pub admin_key: Option<String>,
}

impl AppState {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        accounts: Arc<dyn AccountDirectory>,
        admin_key: Option<String>,
    ) -> Self {
        Self {
            issuer: TokenIssuer::new(tokens.clone(), accounts),
            verifier: TokenVerifier::new(tokens.clone()),
            tokens,
            admin_key,
        }
    }
}

//! Token verification seam.
//!
//! JWT issuance and signature checking live outside the core; the server
//! only needs something that turns a token string into a [`TokenPayload`].

use std::collections::HashMap;

use async_trait::async_trait;

use synckit_core::errors::AuthError;
use synckit_core::{SyncResult, TokenPayload};

/// Turns a presented token into a decoded payload.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> SyncResult<TokenPayload>;
}

/// A fixed token → payload table. Backs tests and single-tenant setups.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, TokenPayload>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, payload: TokenPayload) -> Self {
        self.tokens.insert(token.into(), payload);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> SyncResult<TokenPayload> {
        self.tokens.get(token).cloned().ok_or_else(|| {
            AuthError::TokenInvalid {
                reason: "unknown token".to_string(),
            }
            .into()
        })
    }
}

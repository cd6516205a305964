//! Driver credential verification

use async_trait::async_trait;
use common::DriverId;
use std::collections::HashMap;

/// Checks the token a driver presents in its `auth` frame
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, driver_id: &DriverId, token: &str) -> bool;
}

/// Accepts any non-blank token. Development only.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyToken;

#[async_trait]
impl Authenticator for AcceptAnyToken {
    async fn verify(&self, _driver_id: &DriverId, token: &str) -> bool {
        !token.trim().is_empty()
    }
}

/// Fixed per-driver tokens
#[derive(Debug, Default, Clone)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<DriverId, String>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, driver_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(DriverId::new(driver_id), token.into());
        self
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn verify(&self, driver_id: &DriverId, token: &str) -> bool {
        self.tokens.get(driver_id).is_some_and(|expected| expected == token)
    }
}

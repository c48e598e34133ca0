//! Authentication capability consumed by the transports.
//!
//! Token storage and refresh live outside this crate. Both transports only
//! need to ask "is there a session?" and "give me a currently valid token".

use crate::{Result, SyftError};
use async_trait::async_trait;
use std::sync::RwLock;

/// Source of bearer tokens.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Whether a session exists at all.
    fn is_authenticated(&self) -> bool;

    /// Return a token that is valid right now, refreshing if needed.
    ///
    /// Failures must be reported as `SyftError::Authentication`.
    async fn ensure_valid_token(&self) -> Result<String>;
}

/// Auth provider holding a fixed token that can be swapped or cleared.
#[derive(Debug, Default)]
pub struct StaticTokenAuth {
    token: RwLock<Option<String>>,
}

impl StaticTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Provider with no session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Replace the current token.
    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.into());
        }
    }

    /// Drop the current token.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }

    fn current(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    fn is_authenticated(&self) -> bool {
        self.current().is_some_and(|t| !t.is_empty())
    }

    async fn ensure_valid_token(&self) -> Result<String> {
        match self.current() {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(SyftError::Authentication {
                message: "no access token available".to_string(),
            }),
        }
    }
}

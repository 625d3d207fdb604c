use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Source of the bearer credential used for directory requests.
///
/// Token storage and refresh belong to the embedding application; the sync
/// engine only asks for the current token, asks for a refresh after a `401`, and
/// reports when the credential is unusable.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
    async fn refresh(&self) -> Result<String>;
    fn invalidate(&self);
    fn is_valid(&self) -> bool;
}

/// Fixed token with no refresh path.
pub struct StaticSession {
    token: String,
    valid: AtomicBool,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            valid: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn bearer_token(&self) -> Result<String> {
        if !self.is_valid() {
            return Err(anyhow!("session has been invalidated"));
        }
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<String> {
        Err(anyhow!("static session cannot be refreshed"))
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}

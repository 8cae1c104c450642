//! Auth provider collaborator.
//!
//! The engine needs exactly two things from auth: the credential to present when
//! opening a link, and a way to say "that credential was rejected, renew it".

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Credential presented to the service.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Long-lived API key.
    Key(String),
    /// Short-lived token.
    Token(String),
}

impl Credential {
    /// Raw secret.
    pub fn secret(&self) -> &str {
        match self {
            Credential::Key(s) | Credential::Token(s) => s,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Key(_) => f.write_str("Key(<redacted>)"),
            Credential::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
}

/// Source of credentials for the connection.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Credential to use for the next connection attempt.
    ///
    /// An error here means renewal failed; the connection fails.
    async fn current_credential(&self) -> Result<Credential>;

    /// The server rejected the current credential.
    fn invalidate(&self);
}

// ============================================================================
// API key
// ============================================================================

/// Authenticates with a fixed API key. Cannot renew once rejected.
pub struct StaticKeyAuth {
    key: String,
    rejected: AtomicBool,
}

impl StaticKeyAuth {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            rejected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticKeyAuth {
    async fn current_credential(&self) -> Result<Credential> {
        if self.rejected.load(Ordering::Acquire) {
            return Err(Error::AuthRenewal(
                "API key was rejected and cannot be renewed".to_string(),
            ));
        }
        Ok(Credential::Key(self.key.clone()))
    }

    fn invalidate(&self) {
        self.rejected.store(true, Ordering::Release);
    }
}

// ============================================================================
// Token callback
// ============================================================================

/// Future returned by a token callback.
pub type TokenFuture = Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send>>;

/// Obtains tokens from a callback and caches the latest one until invalidated.
pub struct TokenCallbackAuth<F> {
    callback: F,
    cached: Mutex<Option<String>>,
}

impl<F> TokenCallbackAuth<F>
where
    F: Fn() -> TokenFuture + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<F> AuthProvider for TokenCallbackAuth<F>
where
    F: Fn() -> TokenFuture + Send + Sync,
{
    async fn current_credential(&self) -> Result<Credential> {
        if let Some(token) = self.cached.lock().clone() {
            return Ok(Credential::Token(token));
        }
        let token = (self.callback)().await.map_err(Error::AuthRenewal)?;
        tracing::debug!("obtained new token from callback");
        *self.cached.lock() = Some(token.clone());
        Ok(Credential::Token(token))
    }

    fn invalidate(&self) {
        self.cached.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_static_key_cannot_renew() {
        let auth = StaticKeyAuth::new("app.key:secret");
        assert_eq!(
            auth.current_credential().await.unwrap(),
            Credential::Key("app.key:secret".to_string())
        );
        auth.invalidate();
        let err = auth.current_credential().await.unwrap_err();
        assert!(matches!(err, Error::AuthRenewal(_)));
    }

    #[tokio::test]
    async fn test_token_callback_caches_until_invalidated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let auth = TokenCallbackAuth::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(format!("token-{n}")) }) as TokenFuture
        });

        assert_eq!(auth.current_credential().await.unwrap().secret(), "token-0");
        assert_eq!(auth.current_credential().await.unwrap().secret(), "token-0");
        auth.invalidate();
        assert_eq!(auth.current_credential().await.unwrap().secret(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_callback_failure_is_renewal_error() {
        let auth = TokenCallbackAuth::new(|| {
            Box::pin(async { Err("token endpoint down".to_string()) }) as TokenFuture
        });
        let err = auth.current_credential().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "credential renewal failed: token endpoint down"
        );
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::Token("very-secret".to_string());
        assert_eq!(format!("{cred:?}"), "Token(<redacted>)");
    }
}

//! JWT sources and the in-memory token cache.
//!
//! A host supplies either a static token or a factory. Factories receive a
//! `refresh` flag and must mint a new token when it is set; they are called
//! again after the server rejects a token with 401. Tokens live only in
//! memory and are dropped whenever the source changes.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwtError {
    /// The source produced something that is not a usable token.
    #[error("Provided JWT token is invalid.")]
    Invalid,
    /// The factory itself failed.
    #[error("failed to get token from the jwt factory: {0}")]
    Factory(String),
    /// No source is configured.
    #[error("no jwt source configured")]
    NotConfigured,
}

/// Produces bearer tokens on demand.
#[async_trait::async_trait]
pub trait JwtFactory: Send + Sync {
    async fn token(&self, refresh: bool) -> Result<String, JwtError>;
}

struct FnFactory<F>(F);

#[async_trait::async_trait]
impl<F, Fut> JwtFactory for FnFactory<F>
where
    F: Fn(bool) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, JwtError>> + Send + 'static,
{
    async fn token(&self, refresh: bool) -> Result<String, JwtError> {
        (self.0)(refresh).await
    }
}

/// Where the session gets its bearer token from.
#[derive(Clone)]
pub enum JwtSource {
    /// A fixed token. Cannot be refreshed; kept for compatibility.
    Token(String),
    Factory(Arc<dyn JwtFactory>),
}

impl JwtSource {
    /// Wrap an async closure as a factory source.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, JwtError>> + Send + 'static,
    {
        Self::Factory(Arc::new(FnFactory(f)))
    }

    /// Produce a token, validating that it is a non-empty string.
    pub fn fetch(&self, refresh: bool) -> BoxFuture<'static, Result<String, JwtError>> {
        let source = self.clone();
        Box::pin(async move {
            let token = match source {
                JwtSource::Token(token) => {
                    tracing::warn!("providing a JWT without a factory function is deprecated");
                    token
                }
                JwtSource::Factory(factory) => factory.token(refresh).await?,
            };
            if token.trim().is_empty() {
                return Err(JwtError::Invalid);
            }
            Ok(token)
        })
    }
}

impl PartialEq for JwtSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Token(a), Self::Token(b)) => a == b,
            (Self::Factory(a), Self::Factory(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for JwtSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("JwtSource::Token(..)"),
            Self::Factory(_) => f.write_str("JwtSource::Factory(..)"),
        }
    }
}

impl From<String> for JwtSource {
    fn from(token: String) -> Self {
        Self::Token(token)
    }
}

impl From<&str> for JwtSource {
    fn from(token: &str) -> Self {
        Self::Token(token.to_owned())
    }
}

/// Configured source plus the last token it produced.
#[derive(Debug, Default)]
pub struct JwtCache {
    source: Option<JwtSource>,
    token: Option<String>,
}

impl JwtCache {
    /// Replace the source; the cached token is invalidated.
    pub fn set(&mut self, source: JwtSource) {
        tracing::debug!("configuring jwt");
        self.source = Some(source);
        self.token = None;
    }

    /// Forget both source and token; the session falls back to cookies.
    pub fn clear(&mut self) {
        tracing::debug!("clearing jwt");
        self.source = None;
        self.token = None;
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    #[must_use]
    pub fn is_same_source(&self, other: &JwtSource) -> bool {
        self.source.as_ref() == Some(other)
    }

    #[must_use]
    pub fn source(&self) -> Option<JwtSource> {
        self.source.clone()
    }

    #[must_use]
    pub fn cached(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn invalidate(&mut self) {
        self.token = None;
    }

    /// Store a freshly fetched token if it came from the current source.
    pub fn store(&mut self, from: &JwtSource, token: String) {
        if self.is_same_source(from) {
            self.token = Some(token);
        }
    }
}

#[cfg(test)]
#[path = "jwt_test.rs"]
mod tests;

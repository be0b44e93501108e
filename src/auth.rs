//! Session token provider trait consumed by hub connections

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced while fetching or refreshing a session token.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no session token available: {0}")]
    TokenUnavailable(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Source of the bearer token embedded in hub URLs.
///
/// The realtime layer only consumes tokens; acquiring them (login, API key
/// exchange) belongs to the REST client that owns the session. A single
/// provider instance is shared by every hub connection so refreshes are not
/// duplicated per hub.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current session token.
    async fn get_token(&self) -> Result<String, AuthError>;

    /// Forces a token renewal and returns the fresh token.
    async fn refresh_token(&self) -> Result<String, AuthError>;
}

/// Token provider backed by a fixed token.
///
/// Useful for short-lived tools and tests; refreshing returns the same token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<String, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::TokenUnavailable("empty token".to_string()));
        }
        Ok(self.token.clone())
    }

    async fn refresh_token(&self) -> Result<String, AuthError> {
        self.get_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_returns_token() {
        let provider = StaticTokenProvider::new("session-token");
        assert_eq!(provider.get_token().await.unwrap(), "session-token");
        assert_eq!(provider.refresh_token().await.unwrap(), "session-token");
    }

    #[tokio::test]
    async fn test_static_provider_rejects_empty_token() {
        let provider = StaticTokenProvider::new("");
        assert!(matches!(
            provider.get_token().await,
            Err(AuthError::TokenUnavailable(_))
        ));
    }
}

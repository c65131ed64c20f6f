//! Credential provider trait.

use async_trait::async_trait;

use super::CredentialError;

/// A bearer token for the platform API.
///
/// The value is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value, for building the `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken(<{} chars>)", self.0.len())
    }
}

/// Source of bearer tokens for the poll loop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a token. No retry happens inside this call; the poll loop
    /// tries again on its next cycle.
    async fn acquire(&self) -> Result<AccessToken, CredentialError>;
}

//! Credential error types.

use thiserror::Error;

/// Errors that can occur while acquiring a platform token.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Neither a static token nor a complete client id/secret pair is configured.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// The client-credentials exchange did not yield a token.
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),
}

impl CredentialError {
    /// Check if this error is caused by configuration rather than the network.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredentials(_))
    }
}

impl From<reqwest::Error> for CredentialError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TokenExchangeFailed(format!("request timed out: {}", err))
        } else {
            Self::TokenExchangeFailed(err.to_string())
        }
    }
}

//! Credential management module.
//!
//! Provides the bearer token used for platform API calls.
//!
//! - [`CredentialProvider`]: the seam the poll loop depends on
//! - [`TwitchTokenProvider`]: static token or OAuth client-credentials exchange
//! - [`CredentialError`]: why no token could be obtained

mod error;
mod provider;
mod twitch;

pub use error::CredentialError;
#[cfg(test)]
pub use provider::MockCredentialProvider;
pub use provider::{AccessToken, CredentialProvider};
pub use twitch::TwitchTokenProvider;

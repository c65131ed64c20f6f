//! Twitch app access token provider.
//!
//! Uses the OAuth client-credentials grant:
//! `POST {token_url}` with `client_id`, `client_secret` and
//! `grant_type=client_credentials` as a form body.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::TwitchConfig;
use crate::credentials::error::CredentialError;
use crate::credentials::provider::{AccessToken, CredentialProvider};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Twitch token provider.
pub struct TwitchTokenProvider {
    client: Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    static_token: Option<AccessToken>,
    token_url: String,
}

impl TwitchTokenProvider {
    /// Create a provider from the Twitch configuration.
    ///
    /// `client` should carry the request timeout (see
    /// [`build_api_client`](crate::utils::http_client::build_api_client)).
    pub fn new(client: Client, config: &TwitchConfig) -> Self {
        Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            static_token: config.app_access_token.clone().map(AccessToken::new),
            token_url: config.token_url.clone(),
        }
    }

    async fn exchange(&self, client_id: &str, client_secret: &str) -> Result<AccessToken, CredentialError> {
        debug!("Requesting app access token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "Token endpoint responded");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenExchangeFailed(format!(
                "token endpoint returned HTTP {}: {}",
                status,
                preview(&body)
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::TokenExchangeFailed(format!("invalid token response: {}", e)))?;

        match body.access_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                debug!(expires_in = ?body.expires_in, "Obtained app access token");
                Ok(AccessToken::new(token))
            }
            None => Err(CredentialError::TokenExchangeFailed(
                "'access_token' not found in token response".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CredentialProvider for TwitchTokenProvider {
    #[instrument(skip(self), name = "acquire_token")]
    async fn acquire(&self) -> Result<AccessToken, CredentialError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let (Some(client_id), Some(client_secret)) =
            (self.client_id.as_deref(), self.client_secret.as_deref())
        else {
            let err = CredentialError::MissingCredentials(
                "TWITCH_CLIENT_ID or TWITCH_CLIENT_SECRET is not configured".to_string(),
            );
            warn!(error = %err, "Cannot request app access token");
            return Err(err);
        };

        self.exchange(client_id, client_secret).await.inspect_err(|err| {
            warn!(error = %err, "App access token request failed");
        })
    }
}

/// First 200 characters of a response body, for error messages.
fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::http_client::build_api_client;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn twitch_config(server_uri: &str) -> TwitchConfig {
        TwitchConfig {
            client_id: Some("cid".to_string()),
            client_secret: Some("csecret".to_string()),
            app_access_token: None,
            token_url: format!("{}/oauth2/token", server_uri),
            api_base_url: server_uri.to_string(),
        }
    }

    fn provider(config: &TwitchConfig) -> TwitchTokenProvider {
        TwitchTokenProvider::new(build_api_client(Duration::from_secs(2)).unwrap(), config)
    }

    #[tokio::test]
    async fn test_static_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = twitch_config(&server.uri());
        config.app_access_token = Some("preset".to_string());
        config.client_secret = None;

        let token = provider(&config).acquire().await.unwrap();
        assert_eq!(token.secret(), "preset");
    }

    #[tokio::test]
    async fn test_missing_secret_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = twitch_config(&server.uri());
        config.client_secret = None;

        let err = provider(&config).acquire().await.unwrap_err();
        assert!(matches!(err, CredentialError::MissingCredentials(_)));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_client_credentials_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=cid"))
            .and(body_string_contains("client_secret=csecret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "expires_in": 5000000,
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = provider(&twitch_config(&server.uri())).acquire().await.unwrap();
        assert_eq!(token.secret(), "fresh-token");
    }

    #[tokio::test]
    async fn test_error_status_fails_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid client secret"))
            .mount(&server)
            .await;

        let err = provider(&twitch_config(&server.uri())).acquire().await.unwrap_err();
        assert!(matches!(err, CredentialError::TokenExchangeFailed(_)));
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_missing_access_token_field_fails_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "unexpected"
            })))
            .mount(&server)
            .await;

        let err = provider(&twitch_config(&server.uri())).acquire().await.unwrap_err();
        assert!(matches!(err, CredentialError::TokenExchangeFailed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_exchange() {
        let server = MockServer::start().await;
        let config = twitch_config(&server.uri());
        drop(server);

        let err = provider(&config).acquire().await.unwrap_err();
        assert!(matches!(err, CredentialError::TokenExchangeFailed(_)));
    }
}

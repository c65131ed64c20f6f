use std::{sync::OnceLock, time::Duration};

use tracing::debug;

use crate::Result;

/// User agent sent with every outbound request.
pub const USER_AGENT: &str = concat!("livewatch/", env!("CARGO_PKG_VERSION"));

/// Install the process-wide rustls crypto provider.
///
/// reqwest is built without a bundled provider, so this must run before the
/// first client is constructed.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the `reqwest::Client` shared by the token provider and the fetcher.
///
/// `request_timeout` bounds every request made through the client. A client
/// that cannot be configured is an error rather than an unbounded fallback.
pub fn build_api_client(request_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(4);

    if request_timeout > Duration::ZERO {
        builder = builder
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)));
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_install_provider_is_idempotent() {
        install_rustls_provider();
        install_rustls_provider();
    }

    #[test]
    fn test_build_api_client() {
        assert!(build_api_client(Duration::from_secs(5)).is_ok());
        assert!(build_api_client(Duration::ZERO).is_ok());
    }

    #[tokio::test]
    async fn test_request_timeout_is_enforced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = build_api_client(Duration::from_millis(200)).unwrap();
        let err = client
            .get(format!("{}/slow", server.uri()))
            .send()
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }
}

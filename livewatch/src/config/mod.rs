//! Worker configuration.
//!
//! All settings come from environment variables (a `.env` file is loaded by
//! `main` through `dotenvy`). [`WorkerConfig::from_env`] parses them and
//! [`WorkerConfig::validate`] enforces the production requirements.

use std::time::Duration;

use tracing::info;

use crate::{Error, Result};

/// Default SQLite database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:livewatch.db?mode=rwc";

/// Default Twitch OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Default Twitch API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.twitch.tv";

/// Maximum number of user ids accepted by a single Helix streams request.
pub const MAX_FETCH_BATCH_SIZE: usize = 100;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;
const DEFAULT_HEALTH_GRACE_SECS: u64 = 180;
const DEFAULT_HEALTH_STALE_SECS: u64 = 180;
const DEFAULT_API_PORT: u16 = 8080;

/// Environment variable whose presence marks a Cloud Run deployment.
const PRODUCTION_MARKER_VAR: &str = "K_SERVICE";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::config(format!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                other
            ))),
        }
    }
}

/// Twitch API credentials and endpoints.
#[derive(Clone, Default)]
pub struct TwitchConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Pre-provisioned app access token; skips the client-credentials exchange.
    pub app_access_token: Option<String>,
    pub token_url: String,
    pub api_base_url: String,
}

impl std::fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field(
                "app_access_token",
                &self.app_access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_url", &self.token_url)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// Poll loop settings.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Sleep between iterations, and between failed token attempts.
    pub interval: Duration,
    /// Broadcasters per fetch request, at most [`MAX_FETCH_BATCH_SIZE`].
    pub batch_size: usize,
    /// Timeout applied to token exchange and fetch requests.
    pub http_timeout: Duration,
    /// Skip reconciliation for a batch whose fetch failed instead of closing
    /// every open session in it.
    pub suppress_close_on_fetch_failure: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            batch_size: MAX_FETCH_BATCH_SIZE,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            suppress_close_on_fetch_failure: false,
        }
    }
}

/// Liveness probe thresholds.
#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    /// Time after start during which a worker without a completed loop is healthy.
    pub grace_period: Duration,
    /// Maximum age of the last completed loop.
    pub stale_after: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(DEFAULT_HEALTH_GRACE_SECS),
            stale_after: Duration::from_secs(DEFAULT_HEALTH_STALE_SECS),
        }
    }
}

/// Health server settings.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_API_PORT,
        }
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub app_name: String,
    pub environment: String,
    pub database_url: String,
    pub twitch: TwitchConfig,
    pub poll: PollConfig,
    pub health: HealthConfig,
    pub api: ApiServerConfig,
    pub log_format: LogFormat,
    /// True when running on Cloud Run.
    pub is_production: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            app_name: "livewatch".to_string(),
            environment: "dev".to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            twitch: TwitchConfig {
                token_url: DEFAULT_TOKEN_URL.to_string(),
                api_base_url: DEFAULT_API_BASE_URL.to_string(),
                ..TwitchConfig::default()
            },
            poll: PollConfig::default(),
            health: HealthConfig::default(),
            api: ApiServerConfig::default(),
            log_format: LogFormat::default(),
            is_production: false,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values are treated the same as unset ones.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(name) = get("APP_NAME") {
            config.app_name = name;
        }
        if let Some(env) = get("ENV") {
            config.environment = env;
        }
        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }

        config.twitch.client_id = get("TWITCH_CLIENT_ID");
        config.twitch.client_secret = get("TWITCH_CLIENT_SECRET");
        config.twitch.app_access_token = get("TWITCH_APP_ACCESS_TOKEN");
        if let Some(url) = get("TWITCH_TOKEN_URL") {
            config.twitch.token_url = url;
        }
        if let Some(url) = get("TWITCH_API_BASE_URL") {
            config.twitch.api_base_url = url;
        }

        if let Some(secs) = get("POLL_INTERVAL_SECS") {
            config.poll.interval = Duration::from_secs(parse_positive("POLL_INTERVAL_SECS", &secs)?);
        }
        if let Some(size) = get("FETCH_BATCH_SIZE") {
            let size = parse_positive("FETCH_BATCH_SIZE", &size)? as usize;
            config.poll.batch_size = size.min(MAX_FETCH_BATCH_SIZE);
        }
        if let Some(secs) = get("HTTP_TIMEOUT_SECS") {
            config.poll.http_timeout =
                Duration::from_secs(parse_positive("HTTP_TIMEOUT_SECS", &secs)?);
        }
        if let Some(flag) = get("SUPPRESS_CLOSE_ON_FETCH_FAILURE") {
            config.poll.suppress_close_on_fetch_failure =
                parse_bool("SUPPRESS_CLOSE_ON_FETCH_FAILURE", &flag)?;
        }

        if let Some(secs) = get("HEALTH_GRACE_SECS") {
            config.health.grace_period =
                Duration::from_secs(parse_positive("HEALTH_GRACE_SECS", &secs)?);
        }
        if let Some(secs) = get("HEALTH_STALE_SECS") {
            config.health.stale_after =
                Duration::from_secs(parse_positive("HEALTH_STALE_SECS", &secs)?);
        }

        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            config.api.bind_address = bind_address;
        }
        if let Some(port) = get("API_PORT") {
            config.api.port = port
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::config(format!("API_PORT must be a port number, got '{}'", port)))?;
        }

        if let Some(format) = get("LOG_FORMAT") {
            config.log_format = LogFormat::parse(&format)?;
        }

        config.is_production = lookup(PRODUCTION_MARKER_VAR).is_some();

        Ok(config)
    }

    /// Check the configuration for values the worker cannot run with.
    ///
    /// Outside production a missing client id or secret is tolerated: the
    /// token provider reports it on every loop instead.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("TWITCH_TOKEN_URL", &self.twitch.token_url),
            ("TWITCH_API_BASE_URL", &self.twitch.api_base_url),
        ] {
            url::Url::parse(url)
                .map_err(|e| Error::config(format!("{} is not a valid URL ({}): {}", name, e, url)))?;
        }

        if !self.is_production {
            return Ok(());
        }

        if self.database_url == DEFAULT_DATABASE_URL {
            return Err(Error::config(
                "DATABASE_URL is not set in the production environment; check that the secret is mounted",
            ));
        }

        let missing: Vec<&str> = [
            ("TWITCH_CLIENT_ID", self.twitch.client_id.is_none()),
            ("TWITCH_CLIENT_SECRET", self.twitch.client_secret.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(Error::config(format!(
                "The following required secrets are not set in the production environment: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// Log a summary of the configuration without exposing secrets.
    pub fn log_summary(&self) {
        let client_id_len = self.twitch.client_id.as_deref().map_or(0, str::len);
        info!(
            app = %self.app_name,
            env = %self.environment,
            production = self.is_production,
            client_id_present = self.twitch.client_id.is_some(),
            client_id_len,
            client_secret_present = self.twitch.client_secret.is_some(),
            static_token_present = self.twitch.app_access_token.is_some(),
            database_url_present = !self.database_url.is_empty(),
            poll_interval_secs = self.poll.interval.as_secs(),
            batch_size = self.poll.batch_size,
            "Configuration loaded"
        );
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::config(format!(
            "{} must be a positive integer, got '{}'",
            name, value
        ))),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "{} must be a boolean, got '{}'",
            name, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<WorkerConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.poll.interval, Duration::from_secs(60));
        assert_eq!(config.poll.batch_size, 100);
        assert_eq!(config.poll.http_timeout, Duration::from_secs(20));
        assert!(!config.poll.suppress_close_on_fetch_failure);
        assert_eq!(config.health.grace_period, Duration::from_secs(180));
        assert_eq!(config.health.stale_after, Duration::from_secs(180));
        assert_eq!(config.api.port, 8080);
        assert!(!config.is_production);
        assert!(config.twitch.client_id.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = config_from(&[
            ("TWITCH_CLIENT_ID", "abc"),
            ("TWITCH_CLIENT_SECRET", "   "),
            ("TWITCH_APP_ACCESS_TOKEN", ""),
        ])
        .unwrap();

        assert_eq!(config.twitch.client_id.as_deref(), Some("abc"));
        assert!(config.twitch.client_secret.is_none());
        assert!(config.twitch.app_access_token.is_none());
    }

    #[rstest]
    #[case("250", 100)]
    #[case("100", 100)]
    #[case("25", 25)]
    fn test_batch_size_is_capped(#[case] raw: &str, #[case] expected: usize) {
        let config = config_from(&[("FETCH_BATCH_SIZE", raw)]).unwrap();
        assert_eq!(config.poll.batch_size, expected);
    }

    #[rstest]
    #[case("POLL_INTERVAL_SECS", "0")]
    #[case("POLL_INTERVAL_SECS", "soon")]
    #[case("FETCH_BATCH_SIZE", "-1")]
    #[case("API_PORT", "70000")]
    #[case("SUPPRESS_CLOSE_ON_FETCH_FAILURE", "maybe")]
    #[case("LOG_FORMAT", "xml")]
    fn test_invalid_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        let err = config_from(&[(key, value)]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_url_fails_validation() {
        let config = config_from(&[("TWITCH_API_BASE_URL", "not a url")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_production_requires_database_url() {
        let config = config_from(&[
            ("K_SERVICE", "livewatch"),
            ("TWITCH_CLIENT_ID", "id"),
            ("TWITCH_CLIENT_SECRET", "secret"),
        ])
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_production_lists_every_missing_secret() {
        let config = config_from(&[
            ("K_SERVICE", "livewatch"),
            ("DATABASE_URL", "sqlite:/data/livewatch.db"),
        ])
        .unwrap();

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("TWITCH_CLIENT_ID"));
        assert!(message.contains("TWITCH_CLIENT_SECRET"));
    }

    #[test]
    fn test_production_with_everything_set() {
        let config = config_from(&[
            ("K_SERVICE", "livewatch"),
            ("DATABASE_URL", "sqlite:/data/livewatch.db"),
            ("TWITCH_CLIENT_ID", "id"),
            ("TWITCH_CLIENT_SECRET", "secret"),
            ("SUPPRESS_CLOSE_ON_FETCH_FAILURE", "true"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        config.validate().unwrap();
        assert!(config.poll.suppress_close_on_fetch_failure);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config_from(&[
            ("TWITCH_CLIENT_SECRET", "hunter2"),
            ("TWITCH_APP_ACCESS_TOKEN", "tok123"),
        ])
        .unwrap();

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("tok123"));
    }
}

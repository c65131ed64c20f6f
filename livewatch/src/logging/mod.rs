//! Logging initialisation.
//!
//! Logs go to stdout only: the worker runs in a container whose platform
//! collects and retains the output.

use chrono::Local;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogFormat;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "livewatch=info,sqlx=warn,tower_http=info";

/// Timer that formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Build the filter from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
fn build_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global tracing subscriber.
pub fn init_logging(format: LogFormat) -> crate::Result<()> {
    let registry = tracing_subscriber::registry().with(build_filter());

    let result = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_ansi(false)
                    .with_timer(LocalTimer),
            )
            .try_init(),
    };

    result.map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_local_timer_writes_rfc3339_like_timestamp() {
        let mut out = String::new();
        LocalTimer.format_time(&mut Writer::new(&mut out)).unwrap();
        assert!(out.contains('T'));
        assert!(out.len() >= "2025-01-01T00:00:00.000+00:00".len());
    }
}

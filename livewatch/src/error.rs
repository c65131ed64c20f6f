//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Short, stable name of the variant, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseSqlx(_) => "database",
            Self::Http(_) => "http",
            Self::Configuration(_) => "configuration",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

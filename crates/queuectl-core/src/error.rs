use thiserror::Error;

/// Main error type for queuectl-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to spawn job: {0}")]
    Spawn(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn spawn<T: Into<String>>(msg: T) -> Self {
        Error::Spawn(msg.into())
    }

    /// Category string used for log fields and CLI exit diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Database(_) => "database",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::Spawn(_) => "spawn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_category() {
        let err = Error::validation("bad priority");
        assert_eq!(err.category(), "validation");
        assert_eq!(err.to_string(), "validation error: bad priority");
    }

    #[test]
    fn not_found_error_category() {
        let err = Error::not_found("job abc123");
        assert_eq!(err.category(), "not_found");
    }

    #[test]
    fn json_parse_failure_converts_to_serialization_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = parse_err.into();
        assert_eq!(err.category(), "serialization");
    }
}

use thiserror::Error;

/// Unified application error.
///
/// This ensures all layers (config, Railway, DigitalOcean, PostgreSQL,
/// state persistence) fail in a predictable and debuggable way.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("State error: {0}")]
    State(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::Parse(err.to_string())
        } else {
            AppError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_variant() {
        let err = AppError::Config("RAILWAY_PROJECT_ID is required".into());
        assert_eq!(err.to_string(), "Config error: RAILWAY_PROJECT_ID is required");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Io(_)));
    }
}

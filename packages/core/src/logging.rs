use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging for the controller.
///
/// This must be called once at startup (in main.rs).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Logging initialized");
}

/// Shorten a secret for log output: first 20 characters followed by `...`.
/// Values of 20 characters or fewer are returned unchanged.
pub fn mask(value: &str) -> String {
    match value.char_indices().nth(20) {
        Some((idx, _)) => format!("{}...", &value[..idx]),
        None => value.to_string(),
    }
}

pub mod config;
pub mod error;

pub use config::{
    Config, GeocoderConfig, KmaConfig, MonitorConfig, PathsConfig, ThresholdsConfig,
    ValidationResult,
};
pub use error::{AppError, ConfigError, NetworkError, ReqwestErrorExt, WeatherError};

use anyhow::Result;

/// Initialize logging for the sitewatch binary.
///
/// Honors `RUST_LOG`; falls back to `info`.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    tracing::debug!("sitewatch core initialized");
    Ok(())
}

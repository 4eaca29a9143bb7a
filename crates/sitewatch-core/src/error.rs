//! Centralized error types for sitewatch.
//!
//! This module provides a typed error hierarchy that:
//! - Lets the binary tell configuration problems apart from upstream outages
//! - Provides short operator-facing messages for the terminal
//! - Preserves full error context for logging

use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` for the one-line hint printed next to the error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Weather service error: {0}")]
    Weather(#[from] WeatherError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Weather(e) => e.user_message(),
            AppError::Io(_) => "A file operation failed. Check the configured paths.",
            AppError::Other(_) => "An unexpected error occurred.",
        }
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check the network connection."
            }
            NetworkError::Timeout => "The request timed out. Try again later.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The upstream service is having issues. Try again later."
            }
            NetworkError::ServerError { .. } => "The request was rejected by the upstream service.",
            NetworkError::InvalidResponse(_) => "Received an unexpected response.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check config.toml.",
            ConfigError::ParseError(_) => "config.toml is malformed.",
            ConfigError::MissingSetting(_) => "A required setting is missing from config.toml.",
        }
    }
}

/// Weather monitoring errors, as seen by the operator.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Advisory bulletin unavailable: {0}")]
    BulletinUnavailable(String),

    #[error("Temperature unavailable: {0}")]
    TemperatureUnavailable(String),

    #[error("Geocoding failed: {0}")]
    GeocodeFailed(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Roster error: {0}")]
    Roster(String),

    #[error("Cache error: {0}")]
    CacheError(String),
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::BulletinUnavailable(_) => {
                "KMA advisory bulletin could not be fetched. Try again later."
            }
            WeatherError::TemperatureUnavailable(_) => {
                "Current temperatures could not be fetched. Try again later."
            }
            WeatherError::GeocodeFailed(_) => "Some addresses could not be located.",
            WeatherError::InvalidApiKey => "KMA service key is invalid. Check kma.service_key.",
            WeatherError::Roster(_) => "The site roster could not be read. Check paths.roster.",
            WeatherError::CacheError(_) => "Cached data may be outdated.",
        }
    }
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            NetworkError::Timeout
        } else if self.is_connect() {
            NetworkError::ConnectionFailed(self.to_string())
        } else if let Some(status) = self.status() {
            NetworkError::ServerError {
                status: status.as_u16(),
                message: self.to_string(),
            }
        } else if self.is_decode() {
            NetworkError::InvalidResponse(self.to_string())
        } else {
            NetworkError::ConnectionFailed(self.to_string())
        }
    }
}

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Geographic coordinates (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both components finite and inside WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Cell of the KMA 5 km forecast grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPoint {
    pub nx: i32,
    pub ny: i32,
}

impl std::fmt::Display for GridPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.nx, self.ny)
    }
}

/// A construction site from the roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub address: String,
    pub coordinates: Option<Coordinates>,
}

impl Site {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            coordinates: None,
        }
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }
}

/// Current air temperature for one grid cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub grid: GridPoint,
    pub temperature_c: f64,
    /// Observation base time, KST
    pub observed_at: NaiveDateTime,
}

/// Active advisory text as published by KMA
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bulletin {
    /// Issue time (`tmFc`), KST
    pub issued_at: Option<NaiveDateTime>,
    /// The "advisories in effect" text; empty when none are active
    pub text: String,
}

impl Bulletin {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Weather crate errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("KMA API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Invalid or unregistered service key")]
    InvalidApiKey,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing value: {0}")]
    MissingValue(String),

    #[error("Roster error: {0}")]
    Roster(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WeatherError {
    /// Whether a later attempt may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

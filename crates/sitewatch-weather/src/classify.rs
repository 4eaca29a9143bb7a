//! Site status classification from temperature and active advisories.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::advisory::Advisory;

/// Temperature thresholds in °C, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub severe_cold_c: f64,
    pub cold_c: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            severe_cold_c: -15.0,
            cold_c: -12.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ThresholdError {
    #[error("thresholds must be finite")]
    NotFinite,

    #[error("severe cold threshold {severe_cold_c} is above cold threshold {cold_c}")]
    Inverted { severe_cold_c: f64, cold_c: f64 },
}

impl Thresholds {
    pub fn new(severe_cold_c: f64, cold_c: f64) -> Result<Self, ThresholdError> {
        let thresholds = Self {
            severe_cold_c,
            cold_c,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        if !self.severe_cold_c.is_finite() || !self.cold_c.is_finite() {
            return Err(ThresholdError::NotFinite);
        }
        if self.severe_cold_c > self.cold_c {
            return Err(ThresholdError::Inverted {
                severe_cold_c: self.severe_cold_c,
                cold_c: self.cold_c,
            });
        }
        Ok(())
    }
}

/// Operational status of a site, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    SevereCold,
    Cold,
    Advisory,
    Normal,
}

impl SiteStatus {
    pub fn color(&self) -> &'static str {
        match self {
            Self::SevereCold => "#000080",
            Self::Cold => "#1f77b4",
            Self::Advisory => "#ff6600",
            Self::Normal => "#28a745",
        }
    }

    /// Marker icon name for map front-ends
    pub fn icon_name(&self) -> &'static str {
        match self {
            Self::SevereCold => "snowflake",
            Self::Cold => "temperature-low",
            Self::Advisory => "exclamation-triangle",
            Self::Normal => "check",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::SevereCold => "❄️",
            Self::Cold => "📉",
            Self::Advisory => "⚠️",
            Self::Normal => "✅",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SevereCold => "Severe cold",
            Self::Cold => "Cold",
            Self::Advisory => "Advisory",
            Self::Normal => "Normal",
        }
    }

    /// Lower is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Self::SevereCold => 0,
            Self::Cold => 1,
            Self::Advisory => 2,
            Self::Normal => 3,
        }
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a site. Temperature rules win over advisories; a missing
/// temperature skips them.
pub fn classify(
    temperature_c: Option<f64>,
    advisories: &[Advisory],
    thresholds: &Thresholds,
) -> SiteStatus {
    if let Some(t) = temperature_c.filter(|t| t.is_finite()) {
        if t <= thresholds.severe_cold_c {
            return SiteStatus::SevereCold;
        }
        if t <= thresholds.cold_c {
            return SiteStatus::Cold;
        }
    }

    if advisories.is_empty() {
        SiteStatus::Normal
    } else {
        SiteStatus::Advisory
    }
}

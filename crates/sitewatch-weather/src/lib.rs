//! Weather monitoring for construction sites
//!
//! Loads the site roster, geocodes it once against a CSV cache, and polls the
//! KMA open API for advisories and current temperatures to classify every site.

pub mod advisory;
pub mod cache;
pub mod classify;
pub mod geocode;
pub mod grid;
pub mod monitor;
pub mod poster;
pub mod provider;
pub mod retry;
pub mod roster;
pub mod types;

pub use advisory::{analyze_all_warnings, parse_bulletin, Advisory, AdvisoryEntry, WarningSummary};
pub use cache::{SiteCache, SnapshotStore};
pub use classify::{classify, SiteStatus, ThresholdError, Thresholds};
pub use geocode::{GeocodeReport, Geocoder};
pub use grid::to_grid;
pub use monitor::{FetchFailure, Monitor, SiteReport, Snapshot, StatusChange};
pub use poster::PosterSummary;
pub use provider::KmaClient;
pub use retry::RetryPolicy;
pub use roster::load_roster;
pub use types::*;

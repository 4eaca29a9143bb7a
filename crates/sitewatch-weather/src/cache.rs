//! Flat-file caches: geocoded site coordinates (CSV) and the last monitor
//! snapshot (JSON).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::Snapshot;
use crate::types::{Coordinates, Site, WeatherError};

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    name: String,
    address: String,
    lat: f64,
    lon: f64,
}

/// Geocoded coordinates keyed by site name and address.
///
/// Both must match for a hit, so editing a site's address in the roster
/// forces it to be geocoded again.
#[derive(Debug, Clone, Default)]
pub struct SiteCache {
    entries: BTreeMap<(String, String), Coordinates>,
}

impl SiteCache {
    /// Load the cache; a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, WeatherError> {
        if !path.exists() {
            tracing::debug!("No site cache at {}", path.display());
            return Ok(Self::default());
        }

        let mut reader = csv::Reader::from_path(path)?;
        let mut cache = Self::default();
        for record in reader.deserialize::<CacheRecord>() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Ignoring bad site cache row: {}", e);
                    continue;
                }
            };
            let coordinates = Coordinates::new(record.lat, record.lon);
            if coordinates.is_valid() {
                cache.entries.insert((record.name, record.address), coordinates);
            }
        }

        tracing::debug!("Loaded {} cached sites from {}", cache.len(), path.display());
        Ok(cache)
    }

    /// Write the cache through a temp file renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<(), WeatherError> {
        let tmp = temp_path(path);
        ensure_parent(path)?;

        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for ((name, address), coordinates) in &self.entries {
                writer.serialize(CacheRecord {
                    name: name.clone(),
                    address: address.clone(),
                    lat: coordinates.latitude,
                    lon: coordinates.longitude,
                })?;
            }
            writer.flush()?;
        }

        std::fs::rename(&tmp, path)?;
        tracing::debug!("Saved {} cached sites to {}", self.len(), path.display());
        Ok(())
    }

    pub fn lookup(&self, site: &Site) -> Option<Coordinates> {
        self.entries
            .get(&(site.name.clone(), site.address.clone()))
            .copied()
    }

    /// Record a site's coordinates. Sites without coordinates are ignored.
    pub fn insert(&mut self, site: &Site) {
        if let Some(coordinates) = site.coordinates {
            self.entries
                .insert((site.name.clone(), site.address.clone()), coordinates);
        }
    }

    /// Fill missing coordinates from the cache. Returns how many sites still
    /// have none.
    pub fn apply(&self, sites: &mut [Site]) -> usize {
        let mut missing = 0;
        for site in sites.iter_mut().filter(|s| s.coordinates.is_none()) {
            site.coordinates = self.lookup(site);
            if site.coordinates.is_none() {
                missing += 1;
            }
        }
        missing
    }

    /// Drop entries whose name and address no longer appear in `sites`.
    /// Returns how many were removed.
    pub fn retain_sites(&mut self, sites: &[Site]) -> usize {
        let current: HashSet<(&str, &str)> = sites
            .iter()
            .map(|s| (s.name.as_str(), s.address.as_str()))
            .collect();

        let before = self.entries.len();
        self.entries
            .retain(|(name, address), _| current.contains(&(name.as_str(), address.as_str())));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persists the most recent monitor snapshot as JSON.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Snapshot>, WeatherError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)?;
        let snapshot = serde_json::from_str(&json)
            .map_err(|e| WeatherError::Cache(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), WeatherError> {
        ensure_parent(&self.path)?;
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| WeatherError::Cache(e.to_string()))?;

        let tmp = temp_path(&self.path);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// True when no snapshot is stored or the stored one is older than `max_age`.
    pub fn is_stale(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> Result<bool, WeatherError> {
        Ok(match self.load()? {
            Some(snapshot) => now - snapshot.taken_at > max_age,
            None => true,
        })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<(), WeatherError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

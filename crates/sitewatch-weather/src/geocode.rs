//! Forward geocoding: convert site addresses to coordinates.
//! Uses Nominatim (OpenStreetMap) - free, no API key required, one request per second.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache::SiteCache;
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{Coordinates, Site, WeatherError};

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Fewest address tokens tried before giving up (province + municipality).
const MIN_QUERY_TOKENS: usize = 2;

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// Outcome of a `geocode_missing` pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodeReport {
    pub resolved: usize,
    /// Names of sites that still have no coordinates
    pub failed: Vec<String>,
}

pub struct Geocoder {
    client: Client,
    base_url: String,
    delay: Duration,
    retry: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl Geocoder {
    pub fn new(base_url: &str, user_agent: &str, delay: Duration) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            delay,
            retry: RetryPolicy::default(),
            last_request: Mutex::new(None),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Wait until `delay` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Look up one free-text query. Returns `None` on failure or no match.
    pub async fn search(&self, query: &str) -> Option<Coordinates> {
        self.throttle().await;

        let url = format!("{}/search", self.base_url);
        let response = match with_retry(&self.retry, || {
            self.client
                .get(&url)
                .query(&[
                    ("q", query),
                    ("format", "json"),
                    ("limit", "1"),
                    ("countrycodes", "kr"),
                ])
                .send()
        })
        .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Geocode request failed for {}: {}", query, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("Geocode returned status {} for {}", response.status(), query);
            return None;
        }

        let places: Vec<NominatimPlace> = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!("Geocode parse error for {}: {}", query, e);
                return None;
            }
        };

        let place = places.into_iter().next()?;
        let coordinates = Coordinates::new(place.lat.parse().ok()?, place.lon.parse().ok()?);
        if !coordinates.is_valid() {
            tracing::warn!("Geocoder returned out-of-range coordinates for {}", query);
            return None;
        }

        tracing::debug!(
            "Geocoded {} -> {} ({}, {})",
            query,
            place.display_name.as_deref().unwrap_or("?"),
            coordinates.latitude,
            coordinates.longitude
        );
        Some(coordinates)
    }

    /// Geocode an address, dropping trailing tokens until something matches.
    pub async fn geocode_address(&self, address: &str) -> Option<Coordinates> {
        for query in query_candidates(address) {
            if let Some(coordinates) = self.search(&query).await {
                return Some(coordinates);
            }
        }
        None
    }

    /// Fill in coordinates for sites that lack them, recording hits in `cache`.
    ///
    /// Failures are left without coordinates so the next run retries them.
    pub async fn geocode_missing(&self, sites: &mut [Site], cache: &mut SiteCache) -> GeocodeReport {
        let mut report = GeocodeReport::default();

        for site in sites.iter_mut().filter(|s| s.coordinates.is_none()) {
            match self.geocode_address(&site.address).await {
                Some(coordinates) => {
                    site.coordinates = Some(coordinates);
                    cache.insert(site);
                    report.resolved += 1;
                }
                None => {
                    tracing::warn!("Could not geocode {} ({})", site.name, site.address);
                    report.failed.push(site.name.clone());
                }
            }
        }

        tracing::info!(
            "Geocoded {} sites, {} failed",
            report.resolved,
            report.failed.len()
        );
        report
    }
}

/// Queries to try for an address, most specific first.
pub fn query_candidates(address: &str) -> Vec<String> {
    let tokens: Vec<&str> = address.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    if tokens.len() <= MIN_QUERY_TOKENS {
        return vec![tokens.join(" ")];
    }

    (MIN_QUERY_TOKENS..=tokens.len())
        .rev()
        .map(|n| tokens[..n].join(" "))
        .collect()
}

//! Polling loop: fetch the bulletin and temperatures, classify every site.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::advisory::{analyze_all_warnings, parse_bulletin, WarningSummary};
use crate::cache::SnapshotStore;
use crate::classify::{classify, SiteStatus, Thresholds};
use crate::grid::to_grid;
use crate::provider::KmaClient;
use crate::types::{Bulletin, Coordinates, GridPoint, Observation, Site};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// One site's state at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteReport {
    pub name: String,
    pub address: String,
    pub coordinates: Option<Coordinates>,
    pub grid: Option<GridPoint>,
    pub temperature_c: Option<f64>,
    pub observed_at: Option<NaiveDateTime>,
    /// Advisory names in bulletin order
    pub advisories: Vec<String>,
    pub status: SiteStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub bulletin_issued_at: Option<NaiveDateTime>,
    pub sites: Vec<SiteReport>,
    pub summary: WarningSummary,
    /// Fetch failures during this cycle; the snapshot is still usable
    pub errors: Vec<FetchFailure>,
}

/// A fetch that failed during a refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FetchFailure {
    Bulletin { message: String },
    /// `grid` is `None` when the fetch task itself died
    Temperature { grid: Option<GridPoint>, message: String },
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bulletin { message } => write!(f, "bulletin: {}", message),
            Self::Temperature {
                grid: Some(grid),
                message,
            } => write!(f, "temperature {}: {}", grid, message),
            Self::Temperature { grid: None, message } => write!(f, "temperature: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub site: String,
    /// `None` when the site was not in the previous snapshot
    pub from: Option<SiteStatus>,
    pub to: SiteStatus,
}

impl Snapshot {
    pub fn site(&self, name: &str) -> Option<&SiteReport> {
        self.sites.iter().find(|s| s.name == name)
    }

    /// Sites whose status differs from `previous`.
    pub fn changes_since(&self, previous: &Snapshot) -> Vec<StatusChange> {
        self.sites
            .iter()
            .filter_map(|report| {
                let from = previous.site(&report.name).map(|p| p.status);
                (from != Some(report.status)).then(|| StatusChange {
                    site: report.name.clone(),
                    from,
                    to: report.status,
                })
            })
            .collect()
    }

    /// Number of sites per status, most severe first.
    pub fn counts(&self) -> Vec<(SiteStatus, usize)> {
        let mut counts: BTreeMap<u8, (SiteStatus, usize)> = BTreeMap::new();
        for report in &self.sites {
            counts
                .entry(report.status.rank())
                .or_insert((report.status, 0))
                .1 += 1;
        }
        counts.into_values().collect()
    }
}

pub struct Monitor {
    client: Arc<KmaClient>,
    sites: Vec<Site>,
    thresholds: Thresholds,
    concurrency: usize,
    store: Option<SnapshotStore>,
}

impl Monitor {
    pub fn new(client: KmaClient, sites: Vec<Site>, thresholds: Thresholds) -> Self {
        Self {
            client: Arc::new(client),
            sites,
            thresholds,
            concurrency: DEFAULT_CONCURRENCY,
            store: None,
        }
    }

    /// Cap on in-flight temperature requests; zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Run one full polling cycle.
    ///
    /// Fetch failures are recorded in `Snapshot::errors`; a failed bulletin
    /// means no advisories this cycle, a failed temperature means `None`.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Snapshot {
        let mut errors = Vec::new();

        let bulletin = match self.client.fetch_bulletin().await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Bulletin fetch failed, treating as no advisories: {}", e);
                errors.push(FetchFailure::Bulletin {
                    message: e.to_string(),
                });
                Bulletin::default()
            }
        };

        let entries = parse_bulletin(&bulletin.text);
        let summary = analyze_all_warnings(&entries, &self.sites);

        let grids: BTreeSet<GridPoint> = self
            .sites
            .iter()
            .filter_map(|s| s.coordinates.map(to_grid))
            .collect();
        let observations = self.fetch_temperatures(grids, now, &mut errors).await;

        let sites = self
            .sites
            .iter()
            .map(|site| {
                let grid = site.coordinates.map(to_grid);
                let observation = grid.and_then(|g| observations.get(&g));
                let advisories = summary.advisories_for(&site.name);
                let temperature_c = observation.map(|o| o.temperature_c);

                SiteReport {
                    name: site.name.clone(),
                    address: site.address.clone(),
                    coordinates: site.coordinates,
                    grid,
                    temperature_c,
                    observed_at: observation.map(|o| o.observed_at),
                    advisories: advisories.iter().map(|a| a.name.clone()).collect(),
                    status: classify(temperature_c, advisories, &self.thresholds),
                }
            })
            .collect();

        Snapshot {
            taken_at: now,
            bulletin_issued_at: bulletin.issued_at,
            sites,
            summary,
            errors,
        }
    }

    async fn fetch_temperatures(
        &self,
        grids: BTreeSet<GridPoint>,
        now: DateTime<Utc>,
        errors: &mut Vec<FetchFailure>,
    ) -> BTreeMap<GridPoint, Observation> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for grid in grids {
            let client = Arc::clone(&self.client);
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (grid, client.fetch_temperature(grid, now).await)
            });
        }

        let mut observations = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((grid, Ok(observation))) => {
                    observations.insert(grid, observation);
                }
                Ok((grid, Err(e))) => {
                    tracing::warn!("Temperature fetch failed for grid {}: {}", grid, e);
                    errors.push(FetchFailure::Temperature {
                        grid: Some(grid),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!("Temperature task failed: {}", e);
                    errors.push(FetchFailure::Temperature {
                        grid: None,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!("Fetched {} temperatures", observations.len());
        observations
    }

    /// Poll every `period` until `shutdown` resolves.
    ///
    /// Each snapshot is persisted when a store is set. A failed save is
    /// logged and polling continues. Status changes are logged against the
    /// previous snapshot, including one loaded from the store at startup.
    pub async fn run<S>(&self, period: Duration, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut previous = match &self.store {
            Some(store) => store.load().unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable snapshot: {}", e);
                None
            }),
            None => None,
        };

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let snapshot = self.refresh(Utc::now()).await;
                    self.report(&snapshot, previous.as_ref());

                    if let Some(store) = &self.store {
                        if let Err(e) = store.save(&snapshot) {
                            tracing::error!(
                                "Failed to save snapshot to {}: {}",
                                store.path().display(),
                                e
                            );
                        }
                    }
                    previous = Some(snapshot);
                }
            }
        }
    }

    fn report(&self, snapshot: &Snapshot, previous: Option<&Snapshot>) {
        let counts = snapshot
            .counts()
            .iter()
            .map(|(status, n)| format!("{}={}", status, n))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            "Refreshed {} sites ({}), {} errors",
            snapshot.sites.len(),
            counts,
            snapshot.errors.len()
        );

        let Some(previous) = previous else {
            return;
        };
        for change in snapshot.changes_since(previous) {
            match change.from {
                Some(from) => tracing::warn!(
                    "{}: {} -> {} {}",
                    change.site,
                    from,
                    change.to.emoji(),
                    change.to
                ),
                None => tracing::info!("{}: new site, {}", change.site, change.to),
            }
        }
    }
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use sitewatch_core::{AppError, Config, ConfigError, NetworkError, ReqwestErrorExt};
use sitewatch_weather::provider::kst;
use sitewatch_weather::{
    load_roster, FetchFailure, Geocoder, KmaClient, Monitor, PosterSummary, Site, SiteCache,
    Snapshot, SnapshotStore, Thresholds,
};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: <config dir>/sitewatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Geocode roster sites that are not in the coordinate cache yet
    Geocode,
    /// Refresh once and print every site's status
    Check {
        #[arg(long)]
        json: bool,
    },
    /// Print the status poster content
    Poster {
        #[arg(long)]
        json: bool,
    },
    /// Keep polling until Ctrl-C
    Watch,
    /// Show the config file location and validation result
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = sitewatch_core::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let load = || -> Result<Config, AppError> {
        let (config, _) = Config::load_validated(Some(&config_path))?;
        Ok(config)
    };

    match args.command {
        Command::Config => show_config(&config_path)?,
        Command::Geocode => {
            let config = load()?;
            let sites = prepare_sites(&config).await?;
            let located = sites.iter().filter(|s| s.coordinates.is_some()).count();
            println!("{} of {} sites have coordinates", located, sites.len());
        }
        Command::Check { json } => {
            let config = load()?;
            let snapshot = refresh_once(&config).await?;
            if json {
                print_json(&snapshot)?;
            } else {
                print_table(&snapshot);
            }
        }
        Command::Poster { json } => {
            let config = load()?;
            let sites = prepare_sites(&config).await?;
            let snapshot = latest_snapshot(&config, &sites).await?;
            let as_of = snapshot.taken_at.with_timezone(&kst()).naive_local();
            let poster = PosterSummary::build(&snapshot.summary, &sites, as_of);
            if json {
                print_json(&poster)?;
            } else {
                print!("{}", poster.render_text());
            }
        }
        Command::Watch => {
            let config = load()?;
            if config.monitor.refresh_minutes == 0 {
                return Err(ConfigError::Invalid(
                    "monitor.refresh_minutes must be above 0 to watch".to_string(),
                )
                .into());
            }
            let period = Duration::from_secs(u64::from(config.monitor.refresh_minutes) * 60);
            let monitor = build_monitor(&config, prepare_sites(&config).await?)?;

            tracing::info!(
                "Watching {} sites every {} minutes",
                monitor.sites().len(),
                config.monitor.refresh_minutes
            );
            monitor
                .run(period, async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;
        }
    }

    Ok(())
}

fn show_config(path: &std::path::Path) -> Result<(), AppError> {
    let config = Config::load(Some(path))?;
    let validation = config.validate();

    println!("Config: {}", path.display());
    println!("Roster: {}", config.paths.roster.display());
    println!("Site cache: {}", config.paths.site_cache.display());
    println!("Snapshot: {}", config.paths.snapshot.display());

    for error in &validation.errors {
        println!("error: {}", error);
    }
    for warning in &validation.warnings {
        println!("warning: {}", warning);
    }
    if validation.is_valid() {
        println!("Configuration is valid");
    }
    Ok(())
}

/// Load the roster, fill coordinates from the cache and geocode the rest.
async fn prepare_sites(config: &Config) -> Result<Vec<Site>, AppError> {
    let mut sites = load_roster(&config.paths.roster).map_err(weather_error)?;
    let mut cache = SiteCache::load(&config.paths.site_cache).map_err(weather_error)?;

    let pruned = cache.retain_sites(&sites);
    if pruned > 0 {
        tracing::info!("Dropping {} cached sites no longer in the roster", pruned);
    }

    let missing = cache.apply(&mut sites);
    let mut resolved = 0;
    if missing > 0 {
        tracing::info!("Geocoding {} sites", missing);
        let geocoder = Geocoder::new(
            &config.geocoder.base_url,
            &config.geocoder.user_agent,
            Duration::from_millis(config.geocoder.request_delay_ms),
        )
        .map_err(weather_error)?;

        let report = geocoder.geocode_missing(&mut sites, &mut cache).await;
        if !report.failed.is_empty() {
            let e = sitewatch_core::WeatherError::GeocodeFailed(report.failed.join(", "));
            tracing::warn!("{} ({})", e, e.user_message());
        }
        resolved = report.resolved;
    }

    if resolved > 0 || pruned > 0 {
        cache.save(&config.paths.site_cache).map_err(weather_error)?;
    }

    Ok(sites)
}

fn build_monitor(config: &Config, sites: Vec<Site>) -> Result<Monitor, AppError> {
    let service_key = config
        .kma
        .service_key
        .as_deref()
        .ok_or_else(|| ConfigError::MissingSetting("kma.service_key".to_string()))?;

    let client = KmaClient::new(&config.kma.base_url, service_key).map_err(weather_error)?;
    let thresholds = Thresholds::new(config.thresholds.severe_cold_c, config.thresholds.cold_c)
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    Ok(Monitor::new(client, sites, thresholds)
        .with_concurrency(config.monitor.concurrency)
        .with_store(SnapshotStore::new(&config.paths.snapshot)))
}

async fn refresh_once(config: &Config) -> Result<Snapshot, AppError> {
    let monitor = build_monitor(config, prepare_sites(config).await?)?;
    let snapshot = monitor.refresh(Utc::now()).await;
    report_failures(&snapshot);

    SnapshotStore::new(&config.paths.snapshot)
        .save(&snapshot)
        .map_err(weather_error)?;
    Ok(snapshot)
}

/// The stored snapshot when it is recent enough, otherwise a fresh one.
async fn latest_snapshot(config: &Config, sites: &[Site]) -> Result<Snapshot, AppError> {
    let store = SnapshotStore::new(&config.paths.snapshot);
    let max_age = chrono::Duration::minutes(i64::from(config.monitor.stale_after_minutes));

    match store.is_stale(max_age, Utc::now()) {
        Ok(false) => {
            if let Ok(Some(snapshot)) = store.load() {
                tracing::info!("Using snapshot from {}", snapshot.taken_at);
                return Ok(snapshot);
            }
        }
        Ok(true) => {}
        Err(e) => tracing::warn!("Ignoring stored snapshot: {}", e),
    }

    let monitor = build_monitor(config, sites.to_vec())?;
    let snapshot = monitor.refresh(Utc::now()).await;
    report_failures(&snapshot);
    store.save(&snapshot).map_err(weather_error)?;
    Ok(snapshot)
}

fn report_failures(snapshot: &Snapshot) {
    for failure in &snapshot.errors {
        let e = match failure {
            FetchFailure::Bulletin { message } => {
                sitewatch_core::WeatherError::BulletinUnavailable(message.clone())
            }
            FetchFailure::Temperature { .. } => {
                sitewatch_core::WeatherError::TemperatureUnavailable(failure.to_string())
            }
        };
        tracing::warn!("{} ({})", e, e.user_message());
    }
}

fn print_table(snapshot: &Snapshot) {
    let taken_at = snapshot.taken_at.with_timezone(&kst());
    println!("Site status at {}", taken_at.format("%Y-%m-%d %H:%M KST"));
    if let Some(issued) = snapshot.bulletin_issued_at {
        println!("Bulletin issued {}", issued.format("%Y-%m-%d %H:%M"));
    }
    println!();

    let mut sites: Vec<_> = snapshot.sites.iter().collect();
    sites.sort_by(|a, b| {
        a.status
            .rank()
            .cmp(&b.status.rank())
            .then_with(|| a.name.cmp(&b.name))
    });

    for site in sites {
        let temperature = site
            .temperature_c
            .map(|t| format!("{:.1}°C", t))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {:<12} {:>8}  {:<24} {}",
            site.status.emoji(),
            site.status.label(),
            temperature,
            site.name,
            site.advisories.join(", ")
        );
    }

    if !snapshot.errors.is_empty() {
        println!();
        println!("{} fetches failed; see log for details", snapshot.errors.len());
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?;
    println!("{}", json);
    Ok(())
}

/// Map domain errors onto the operator-facing hierarchy.
fn weather_error(e: sitewatch_weather::WeatherError) -> AppError {
    use sitewatch_weather::WeatherError as W;

    match e {
        W::Network(e) => AppError::Network(e.into_network_error()),
        W::Http { status, body } => AppError::Network(NetworkError::ServerError {
            status,
            message: body,
        }),
        W::Api { code, message } => {
            AppError::Network(NetworkError::InvalidResponse(format!("{}: {}", code, message)))
        }
        W::Parse(msg) | W::MissingValue(msg) => {
            AppError::Network(NetworkError::InvalidResponse(msg))
        }
        W::InvalidApiKey => AppError::Weather(sitewatch_core::WeatherError::InvalidApiKey),
        W::Roster(msg) => AppError::Weather(sitewatch_core::WeatherError::Roster(msg)),
        W::Cache(msg) => AppError::Weather(sitewatch_core::WeatherError::CacheError(msg)),
        W::Csv(e) => AppError::Weather(sitewatch_core::WeatherError::CacheError(e.to_string())),
        W::Io(e) => AppError::Io(e),
    }
}

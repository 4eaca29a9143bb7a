//! Site roster loading from a CSV export of the site spreadsheet.

use std::collections::HashSet;
use std::path::Path;

use crate::types::{Coordinates, Site, WeatherError};

const NAME_HEADERS: &[&str] = &["name", "현장명"];
const ADDRESS_HEADERS: &[&str] = &["address", "주소"];
const LAT_HEADERS: &[&str] = &["lat", "latitude", "위도"];
const LON_HEADERS: &[&str] = &["lon", "longitude", "경도"];

struct Columns {
    name: usize,
    address: usize,
    lat: Option<usize>,
    lon: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, WeatherError> {
        let find = |aliases: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim_start_matches('\u{feff}').trim().to_lowercase();
                aliases.iter().any(|a| *a == h)
            })
        };

        let name = find(NAME_HEADERS)
            .ok_or_else(|| WeatherError::Roster("missing name column (name/현장명)".into()))?;
        let address = find(ADDRESS_HEADERS)
            .ok_or_else(|| WeatherError::Roster("missing address column (address/주소)".into()))?;

        Ok(Self {
            name,
            address,
            lat: find(LAT_HEADERS),
            lon: find(LON_HEADERS),
        })
    }

    fn coordinates(&self, record: &csv::StringRecord) -> Option<Coordinates> {
        let value = |idx: Option<usize>| record.get(idx?)?.trim().parse::<f64>().ok();
        let coordinates = Coordinates::new(value(self.lat)?, value(self.lon)?);
        coordinates.is_valid().then_some(coordinates)
    }
}

/// Load sites from a roster CSV file.
///
/// Rows with a blank name or address are skipped. When a name repeats, the
/// first row wins.
pub fn load_roster(path: &Path) -> Result<Vec<Site>, WeatherError> {
    let reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| WeatherError::Roster(format!("cannot open {}: {}", path.display(), e)))?;

    let sites = read_roster(reader)?;
    tracing::info!("Loaded {} sites from {}", sites.len(), path.display());
    Ok(sites)
}

pub fn read_roster<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<Site>, WeatherError> {
    let headers = reader
        .headers()
        .map_err(|e| WeatherError::Roster(format!("cannot read header: {}", e)))?;
    let columns = Columns::from_headers(headers)?;

    let mut seen = HashSet::new();
    let mut sites = Vec::new();

    for (idx, record) in reader.records().enumerate() {
        // header is line 1
        let line = idx + 2;
        let record =
            record.map_err(|e| WeatherError::Roster(format!("line {}: {}", line, e)))?;

        let name = record.get(columns.name).unwrap_or_default();
        let address = record.get(columns.address).unwrap_or_default();

        if name.is_empty() || address.is_empty() {
            tracing::warn!("Skipping roster line {}: blank name or address", line);
            continue;
        }
        if !seen.insert(name.to_string()) {
            tracing::warn!("Skipping roster line {}: duplicate site {}", line, name);
            continue;
        }

        let mut site = Site::new(name, address);
        site.coordinates = columns.coordinates(&record);
        sites.push(site);
    }

    Ok(sites)
}

//! KMA advisory bulletin parsing and site matching.
//!
//! The "advisories in effect" field of the KMA bulletin is free text of the form
//!
//! ```text
//! o 한파경보 : 강원도(철원군평지, 화천군평지), 경기도(연천, 포천)
//! o 한파주의보 : 서울, 인천(강화), 경기도(가평, 양주, 파주)
//! ```
//!
//! Each entry is split into an advisory name and its region text. A site is
//! affected by an entry when one of the keywords derived from its address
//! occurs in the region text.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Site;

static ENTRY_RE: OnceLock<Regex> = OnceLock::new();

/// Entry header: a bullet (`o`, `ㅇ` or `○`) at line start or after whitespace,
/// the advisory name, then a colon.
#[allow(clippy::unwrap_used)]
fn entry_re() -> &'static Regex {
    ENTRY_RE.get_or_init(|| Regex::new(r"(?m)(?:^|\s)[oㅇ○]\s*([^:\n]+?)\s*:").unwrap())
}

/// Hazard named by an advisory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hazard {
    ColdWave,
    HeatWave,
    StrongWind,
    HeavyRain,
    HeavySnow,
    Dry,
    WindWaves,
    Typhoon,
    StormSurge,
    YellowDust,
    Other,
}

impl Hazard {
    /// Korean stems as they appear in advisory names. `폭풍해일` is listed
    /// before anything it could be confused with.
    const STEMS: [(&'static str, Hazard); 10] = [
        ("폭풍해일", Hazard::StormSurge),
        ("한파", Hazard::ColdWave),
        ("폭염", Hazard::HeatWave),
        ("강풍", Hazard::StrongWind),
        ("호우", Hazard::HeavyRain),
        ("대설", Hazard::HeavySnow),
        ("건조", Hazard::Dry),
        ("풍랑", Hazard::WindWaves),
        ("태풍", Hazard::Typhoon),
        ("황사", Hazard::YellowDust),
    ];

    fn from_name(name: &str) -> Self {
        Self::STEMS
            .iter()
            .find(|(stem, _)| name.contains(stem))
            .map(|(_, hazard)| *hazard)
            .unwrap_or(Hazard::Other)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ColdWave => "Cold wave",
            Self::HeatWave => "Heat wave",
            Self::StrongWind => "Strong wind",
            Self::HeavyRain => "Heavy rain",
            Self::HeavySnow => "Heavy snow",
            Self::Dry => "Dry air",
            Self::WindWaves => "Wind waves",
            Self::Typhoon => "Typhoon",
            Self::StormSurge => "Storm surge",
            Self::YellowDust => "Yellow dust",
            Self::Other => "Other",
        }
    }

    /// Hazards the poster and map pins care about.
    pub fn is_temperature(&self) -> bool {
        matches!(self, Self::ColdWave | Self::HeatWave)
    }
}

/// Advisory severity: 주의보 (advisory) or 경보 (warning)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Advisory,
    Warning,
}

/// An advisory name classified into hazard and level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Advisory {
    /// Name with whitespace removed, e.g. `한파경보`
    pub name: String,
    pub hazard: Hazard,
    /// `None` for names without a 주의보/경보 suffix
    pub level: Option<Level>,
}

impl Advisory {
    pub fn parse(raw: &str) -> Self {
        let name: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let level = if name.ends_with("경보") {
            Some(Level::Warning)
        } else if name.ends_with("주의보") {
            Some(Level::Advisory)
        } else {
            None
        };

        Self {
            hazard: Hazard::from_name(&name),
            level,
            name,
        }
    }
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// One region group of an entry: `경기도(연천, 포천)` or a bare `서울`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionGroup {
    pub area: String,
    pub districts: Vec<String>,
}

/// One `o <name> : <regions>` entry of a bulletin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryEntry {
    pub advisory: Advisory,
    /// Region text exactly as published (trimmed)
    pub regions: String,
}

impl AdvisoryEntry {
    pub fn region_groups(&self) -> Vec<RegionGroup> {
        parse_region_groups(&self.regions)
    }

    /// True when any keyword occurs in the region text.
    pub fn covers(&self, keywords: &[String]) -> bool {
        keywords.iter().any(|k| self.regions.contains(k.as_str()))
    }
}

/// Split the bulletin into entries in publication order.
///
/// Entries with an empty region text are dropped.
pub fn parse_bulletin(text: &str) -> Vec<AdvisoryEntry> {
    let headers: Vec<_> = entry_re().captures_iter(text).collect();
    let mut entries = Vec::with_capacity(headers.len());

    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };

        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let regions = collapse_whitespace(&text[whole.end()..end]);

        if regions.is_empty() {
            tracing::debug!("Skipping advisory without regions: {}", name.as_str());
            continue;
        }

        entries.push(AdvisoryEntry {
            advisory: Advisory::parse(name.as_str()),
            regions,
        });
    }

    entries
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split region text on commas outside parentheses.
pub fn parse_region_groups(regions: &str) -> Vec<RegionGroup> {
    split_top_level(regions)
        .into_iter()
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            match (part.find('('), part.rfind(')')) {
                (Some(open), Some(close)) if close > open => Some(RegionGroup {
                    area: part[..open].trim().to_string(),
                    districts: split_top_level(&part[open + 1..close])
                        .into_iter()
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect(),
                }),
                _ => Some(RegionGroup {
                    area: part.to_string(),
                    districts: Vec::new(),
                }),
            }
        })
        .collect()
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

const METRO_CITIES: [&str; 8] = ["서울", "부산", "대구", "인천", "광주", "대전", "울산", "세종"];
const METRO_SUFFIXES: [&str; 3] = ["특별자치시", "특별시", "광역시"];
const PROVINCE_SUFFIXES: [&str; 2] = ["특별자치도", "도"];
const MUNICIPALITY_SUFFIXES: [char; 3] = ['시', '군', '구'];

/// Strip the first matching suffix; returns `None` if none matched.
fn strip_any_suffix<'a>(token: &'a str, suffixes: &[&str]) -> Option<&'a str> {
    suffixes.iter().find_map(|s| token.strip_suffix(s))
}

/// Short metropolitan name when the token names one (`서울특별시`, `서울시`, `서울`).
fn metro_name(token: &str) -> Option<&'static str> {
    let stem = strip_any_suffix(token, &METRO_SUFFIXES)
        .or_else(|| token.strip_suffix('시'))
        .unwrap_or(token);
    METRO_CITIES.iter().copied().find(|m| *m == stem)
}

/// `철원군` → `철원`; keeps one-character stems whole (`중구` stays `중구`).
fn municipality_keyword(token: &str) -> Option<String> {
    let stem = token.strip_suffix(&MUNICIPALITY_SUFFIXES[..])?;
    if stem.chars().count() >= 2 {
        Some(stem.to_string())
    } else {
        Some(token.to_string())
    }
}

/// Keywords identifying the site's area in bulletin region text.
///
/// Metropolitan cities contribute their short name only. Elsewhere the
/// municipality stem is used, falling back to the province stem when the
/// address has no municipality token.
///
/// Keywords are matched by substring, so a short stem also hits longer
/// names that contain it: `양주` matches `남양주`, `동해` matches the marine
/// zone `동해중부먼바다`. Bulletins rarely list one without the other.
pub fn site_keywords(address: &str) -> Vec<String> {
    let mut tokens = address.split_whitespace();
    let Some(first) = tokens.next() else {
        return Vec::new();
    };

    if let Some(metro) = metro_name(first) {
        return vec![metro.to_string()];
    }

    // A city or county without its province, e.g. "수원시 팔달구 ...". The
    // district that follows is never named in bulletins.
    if first.ends_with(['시', '군']) {
        if let Some(keyword) = municipality_keyword(first) {
            return vec![keyword];
        }
    }

    if let Some(keyword) = tokens.next().and_then(municipality_keyword) {
        return vec![keyword];
    }

    // A bare district as the first token, e.g. "중구 ..."
    if !first.ends_with('도') {
        if let Some(keyword) = municipality_keyword(first) {
            return vec![keyword];
        }
    }

    let province = strip_any_suffix(first, &PROVINCE_SUFFIXES).unwrap_or(first);
    if province.is_empty() {
        Vec::new()
    } else {
        vec![province.to_string()]
    }
}

/// Sites affected by one advisory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryHit {
    pub advisory: Advisory,
    /// Sorted, no duplicates
    pub sites: Vec<String>,
}

/// Result of matching a bulletin against the roster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningSummary {
    /// One hit per advisory name, in bulletin order; advisories matching no
    /// site are omitted
    pub by_advisory: Vec<AdvisoryHit>,
    /// Advisories per affected site, in bulletin order without duplicates
    pub by_site: BTreeMap<String, Vec<Advisory>>,
}

impl WarningSummary {
    pub fn advisories_for(&self, site: &str) -> &[Advisory] {
        self.by_site.get(site).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sites_for(&self, advisory_name: &str) -> &[String] {
        self.by_advisory
            .iter()
            .find(|hit| hit.advisory.name == advisory_name)
            .map(|hit| hit.sites.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_site.is_empty()
    }
}

/// Match every bulletin entry against every site.
pub fn analyze_all_warnings(entries: &[AdvisoryEntry], sites: &[Site]) -> WarningSummary {
    let keywords: Vec<(&Site, Vec<String>)> = sites
        .iter()
        .map(|site| (site, site_keywords(&site.address)))
        .collect();

    for (site, kws) in &keywords {
        if kws.is_empty() {
            tracing::warn!("No area keyword for site {} ({})", site.name, site.address);
        }
    }

    let mut summary = WarningSummary::default();

    for entry in entries {
        let matched: Vec<&str> = keywords
            .iter()
            .filter(|(_, kws)| entry.covers(kws))
            .map(|(site, _)| site.name.as_str())
            .collect();

        if matched.is_empty() {
            continue;
        }

        let hit_index = match summary
            .by_advisory
            .iter()
            .position(|hit| hit.advisory.name == entry.advisory.name)
        {
            Some(i) => i,
            None => {
                summary.by_advisory.push(AdvisoryHit {
                    advisory: entry.advisory.clone(),
                    sites: Vec::new(),
                });
                summary.by_advisory.len() - 1
            }
        };
        summary.by_advisory[hit_index]
            .sites
            .extend(matched.iter().map(|s| s.to_string()));

        for site in matched {
            let list = summary.by_site.entry(site.to_string()).or_default();
            if !list.contains(&entry.advisory) {
                list.push(entry.advisory.clone());
            }
        }
    }

    for hit in &mut summary.by_advisory {
        hit.sites.sort();
        hit.sites.dedup();
    }

    tracing::debug!(
        "{} advisories affect {} sites",
        summary.by_advisory.len(),
        summary.by_site.len()
    );

    summary
}

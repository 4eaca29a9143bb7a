//! Content of the printable site status poster.
//!
//! Only heat and cold advisories reach the poster. Drawing is left to
//! whatever consumes the JSON or text rendering.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::advisory::{Hazard, Level, WarningSummary};
use crate::types::{Coordinates, Site};

pub const POSTER_TITLE: &str = "건설현장 기상특보 현황";
pub const LIST_HEADING: &str = "■ 특보 발령 현장 목록";
pub const ALL_CLEAR_MESSAGE: &str = "현재 한파/폭염 특보 발령 현장이 없습니다.";
pub const ALL_CLEAR_COLOR: &str = "#28a745";

const HEAT_TITLE: &str = "※ 폭염 시 현장 안전수칙 및 온열질환 안내";
const HEAT_LINES: [&str; 2] = [
    "[폭염 5대 기본 수칙] 물, 바람·그늘, 휴식, 보냉장구, 응급조치",
    "[온열질환 증상] 열사병(의식없음/체온40도↑), 열탈진(땀많음/구토), 열경련(근육경련)",
];
const HEAT_WARNING_LINE: &str = "[추가] 폭염 경보 시 무더위 시간대(14:00~17:00) 옥외작업 중지 권고";

const COLD_TITLE: &str = "※ 한파(혹한) 시 현장 안전수칙 및 한랭질환 안내";
const COLD_LINES: [&str; 2] = [
    "[한파안전 5대 기본수칙] 따뜻한 옷, 따뜻한 쉼터, 따뜻한 물, 작업시간대 조정, 119 신고",
    "[한랭질환 증상] 저체온증(몸떨림/말어눌), 동상(피부변색/감각저하), 침수병(부종/통증)",
];
const COLD_WARNING_LINE: &str = "[추가] 영하 15도 이하 시 옥외작업 시간 단축 및 휴식시간 연장 필수";

/// The four poster lists, in print order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    HeatWarning,
    HeatAdvisory,
    ColdWarning,
    ColdAdvisory,
}

impl GroupKind {
    pub const ALL: [GroupKind; 4] = [
        GroupKind::HeatWarning,
        GroupKind::HeatAdvisory,
        GroupKind::ColdWarning,
        GroupKind::ColdAdvisory,
    ];

    fn of(hazard: Hazard, level: Option<Level>) -> Option<Self> {
        match (hazard, level?) {
            (Hazard::HeatWave, Level::Warning) => Some(Self::HeatWarning),
            (Hazard::HeatWave, Level::Advisory) => Some(Self::HeatAdvisory),
            (Hazard::ColdWave, Level::Warning) => Some(Self::ColdWarning),
            (Hazard::ColdWave, Level::Advisory) => Some(Self::ColdAdvisory),
            _ => None,
        }
    }

    /// Cold groups are labelled by the temperature they stand for.
    pub fn label(&self) -> &'static str {
        match self {
            Self::HeatWarning => "🔥 폭염 경보",
            Self::HeatAdvisory => "☀️ 폭염 주의보",
            Self::ColdWarning => "❄️ 영하 15도 이하",
            Self::ColdAdvisory => "📉 영하 12도 이하",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::HeatWarning => "#ff0000",
            Self::HeatAdvisory => "#ff6600",
            Self::ColdWarning => "#000080",
            Self::ColdAdvisory => "#1f77b4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteGroup {
    pub kind: GroupKind,
    pub label: &'static str,
    pub color: &'static str,
    /// Sorted, no duplicates
    pub sites: Vec<String>,
}

impl SiteGroup {
    fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            label: kind.label(),
            color: kind.color(),
            sites: Vec::new(),
        }
    }

    /// Heading as printed, e.g. `🔥 폭염 경보 (3개소)`.
    pub fn heading(&self) -> String {
        format!("{} ({}개소)", self.label, self.sites.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPin {
    pub name: String,
    pub coordinates: Coordinates,
    pub advisories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyBlock {
    pub title: &'static str,
    pub color: &'static str,
    pub lines: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosterSummary {
    pub title: &'static str,
    /// e.g. `2025년 01월 09일 07:00 기준`
    pub as_of: String,
    /// Always four groups in print order, possibly empty
    pub groups: Vec<SiteGroup>,
    pub pins: Vec<MapPin>,
    pub safety: Vec<SafetyBlock>,
}

impl PosterSummary {
    pub fn build(summary: &WarningSummary, sites: &[Site], as_of: NaiveDateTime) -> Self {
        let mut groups: Vec<SiteGroup> = GroupKind::ALL.into_iter().map(SiteGroup::new).collect();

        for hit in &summary.by_advisory {
            if let Some(kind) = GroupKind::of(hit.advisory.hazard, hit.advisory.level) {
                if let Some(group) = groups.iter_mut().find(|g| g.kind == kind) {
                    group.sites.extend(hit.sites.iter().cloned());
                }
            }
        }
        for group in &mut groups {
            group.sites.sort();
            group.sites.dedup();
        }

        let pinned: BTreeSet<&str> = summary
            .by_advisory
            .iter()
            .filter(|hit| hit.advisory.hazard.is_temperature())
            .flat_map(|hit| hit.sites.iter().map(String::as_str))
            .collect();

        let pins = pinned
            .into_iter()
            .filter_map(|name| {
                let site = sites.iter().find(|s| s.name == name)?;
                let Some(coordinates) = site.coordinates else {
                    tracing::debug!("No coordinates for {}, leaving it off the map", name);
                    return None;
                };
                Some(MapPin {
                    name: name.to_string(),
                    coordinates,
                    advisories: summary
                        .advisories_for(name)
                        .iter()
                        .filter(|a| a.hazard.is_temperature())
                        .map(|a| a.name.clone())
                        .collect(),
                })
            })
            .collect();

        let mut poster = Self {
            title: POSTER_TITLE,
            as_of: as_of.format("%Y년 %m월 %d일 %H:%M 기준").to_string(),
            groups,
            pins,
            safety: Vec::new(),
        };
        poster.safety = poster.safety_blocks();
        poster
    }

    pub fn group(&self, kind: GroupKind) -> &[String] {
        self.groups
            .iter()
            .find(|g| g.kind == kind)
            .map(|g| g.sites.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_all_clear(&self) -> bool {
        self.groups.iter().all(|g| g.sites.is_empty())
    }

    fn safety_blocks(&self) -> Vec<SafetyBlock> {
        let mut blocks = Vec::new();

        let heat_warning = !self.group(GroupKind::HeatWarning).is_empty();
        if heat_warning || !self.group(GroupKind::HeatAdvisory).is_empty() {
            let mut lines = HEAT_LINES.to_vec();
            if heat_warning {
                lines.push(HEAT_WARNING_LINE);
            }
            blocks.push(SafetyBlock {
                title: HEAT_TITLE,
                color: if heat_warning { "#ff0000" } else { "#ff6600" },
                lines,
            });
        }

        let cold_warning = !self.group(GroupKind::ColdWarning).is_empty();
        if cold_warning || !self.group(GroupKind::ColdAdvisory).is_empty() {
            let mut lines = COLD_LINES.to_vec();
            if cold_warning {
                lines.push(COLD_WARNING_LINE);
            }
            blocks.push(SafetyBlock {
                title: COLD_TITLE,
                color: if cold_warning { "#000080" } else { "#1f77b4" },
                lines,
            });
        }

        blocks
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title);
        let _ = writeln!(out, "{}", self.as_of);
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", LIST_HEADING);

        if self.is_all_clear() {
            let _ = writeln!(out, "{}", ALL_CLEAR_MESSAGE);
        } else {
            for group in self.groups.iter().filter(|g| !g.sites.is_empty()) {
                let _ = writeln!(out, "{}", group.heading());
                let _ = writeln!(out, "  {}", group.sites.join(", "));
            }
        }

        for block in &self.safety {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", block.title);
            for line in &block.lines {
                let _ = writeln!(out, "  {}", line);
            }
        }

        out
    }
}

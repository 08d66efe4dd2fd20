use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::sports::{Sport, SportProfile};
use crate::store;

const DEFAULT_MIN_SAMPLE_RATIO: f64 = 0.6;
const DEFAULT_MIN_FILTERED_ENTITIES: usize = 5;
const DEFAULT_FUZZY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekSpan {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScheduleKind {
    #[default]
    Daily,
    Weekly { weeks: Vec<WeekSpan> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueConfig {
    pub league_id: String,
    pub sport: Sport,
    pub season: String,
    pub season_start: NaiveDate,
    pub season_end: NaiveDate,
    #[serde(default)]
    pub schedule: ScheduleKind,
    pub primary_provider: String,
    #[serde(default)]
    pub secondary_provider: Option<String>,
    #[serde(default)]
    pub game_minutes: Option<f64>,
    #[serde(default = "default_min_sample_ratio")]
    pub min_sample_ratio: f64,
    #[serde(default = "default_min_filtered_entities")]
    pub min_filtered_entities: usize,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
}

fn default_min_sample_ratio() -> f64 {
    DEFAULT_MIN_SAMPLE_RATIO
}

fn default_min_filtered_entities() -> usize {
    DEFAULT_MIN_FILTERED_ENTITIES
}

fn default_fuzzy_threshold() -> f64 {
    DEFAULT_FUZZY_THRESHOLD
}

impl LeagueConfig {
    pub fn new(
        league_id: &str,
        sport: Sport,
        season: &str,
        season_start: NaiveDate,
        season_end: NaiveDate,
        primary_provider: &str,
        secondary_provider: Option<&str>,
    ) -> Self {
        Self {
            league_id: league_id.to_string(),
            sport,
            season: season.to_string(),
            season_start,
            season_end,
            schedule: ScheduleKind::Daily,
            primary_provider: primary_provider.to_string(),
            secondary_provider: secondary_provider.map(str::to_string),
            game_minutes: None,
            min_sample_ratio: DEFAULT_MIN_SAMPLE_RATIO,
            min_filtered_entities: DEFAULT_MIN_FILTERED_ENTITIES,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    pub fn profile(&self) -> &'static SportProfile {
        SportProfile::for_sport(self.sport)
    }

    pub fn game_minutes(&self) -> f64 {
        self.game_minutes.unwrap_or(self.profile().game_minutes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.league_id.trim().is_empty() {
            return Err(anyhow!("league id is empty"));
        }
        if self.season_start >= self.season_end {
            return Err(anyhow!(
                "league {}: season_start {} is not before season_end {}",
                self.league_id,
                self.season_start,
                self.season_end
            ));
        }
        if self.primary_provider.trim().is_empty() {
            return Err(anyhow!("league {}: primary provider is empty", self.league_id));
        }
        if self.secondary_provider.as_deref() == Some(self.primary_provider.as_str()) {
            return Err(anyhow!(
                "league {}: secondary provider equals primary",
                self.league_id
            ));
        }
        if !(0.0..=1.0).contains(&self.min_sample_ratio) {
            return Err(anyhow!(
                "league {}: min_sample_ratio {} outside [0, 1]",
                self.league_id,
                self.min_sample_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(anyhow!(
                "league {}: fuzzy_threshold {} outside [0, 1]",
                self.league_id,
                self.fuzzy_threshold
            ));
        }
        if let Some(minutes) = self.game_minutes
            && minutes <= 0.0
        {
            return Err(anyhow!("league {}: game_minutes must be positive", self.league_id));
        }
        if let ScheduleKind::Weekly { weeks } = &self.schedule {
            for pair in weeks.windows(2) {
                if pair[1].start <= pair[0].end {
                    return Err(anyhow!(
                        "league {}: week {} overlaps or precedes {}",
                        self.league_id,
                        pair[1].label,
                        pair[0].label
                    ));
                }
            }
            if let Some(bad) = weeks.iter().find(|w| w.start > w.end) {
                return Err(anyhow!("league {}: week {} ends before it starts", self.league_id, bad.label));
            }
        }
        Ok(())
    }
}

pub fn load_leagues(path: &Path) -> Result<Vec<LeagueConfig>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read league config {}", path.display()))?;
    let leagues: Vec<LeagueConfig> = serde_json::from_str(&raw)
        .with_context(|| format!("parse league config {}", path.display()))?;
    for league in &leagues {
        league.validate()?;
    }
    Ok(leagues)
}

pub fn default_leagues() -> Vec<LeagueConfig> {
    let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);
    let mut ncaab = LeagueConfig::new(
        "ncaab",
        Sport::Basketball,
        "2025-26",
        date(2025, 11, 3),
        date(2026, 4, 7),
        "espn",
        Some("yahoo"),
    );
    ncaab.game_minutes = Some(40.0);
    let mut nfl = LeagueConfig::new(
        "nfl",
        Sport::Football,
        "2025",
        date(2025, 9, 4),
        date(2026, 2, 9),
        "espn",
        Some("yahoo"),
    );
    // Thursday through Monday.
    nfl.schedule = ScheduleKind::Weekly {
        weeks: week_spans(date(2025, 9, 4), 18, 4),
    };
    let mut ncaaf = LeagueConfig::new(
        "ncaaf",
        Sport::Football,
        "2025",
        date(2025, 8, 19),
        date(2026, 1, 20),
        "espn",
        Some("yahoo"),
    );
    // Tuesday through Monday, starting with week 0.
    ncaaf.schedule = ScheduleKind::Weekly {
        weeks: week_spans(date(2025, 8, 19), 16, 6)
            .into_iter()
            .enumerate()
            .map(|(i, w)| WeekSpan {
                label: i.to_string(),
                ..w
            })
            .collect(),
    };
    vec![
        LeagueConfig::new(
            "nba",
            Sport::Basketball,
            "2025-26",
            date(2025, 10, 21),
            date(2026, 6, 20),
            "espn",
            Some("yahoo"),
        ),
        ncaab,
        nfl,
        ncaaf,
        LeagueConfig::new(
            "mlb",
            Sport::Baseball,
            "2026",
            date(2026, 3, 26),
            date(2026, 11, 1),
            "espn",
            Some("yahoo"),
        ),
    ]
}

/// `count` weeks of `span_days + 1` days each, one week apart, labelled from 1.
fn week_spans(first: NaiveDate, count: u64, span_days: u64) -> Vec<WeekSpan> {
    (0..count)
        .filter_map(|n| {
            let start = first.checked_add_days(Days::new(n * 7))?;
            let end = start.checked_add_days(Days::new(span_days))?;
            Some(WeekSpan {
                label: (n + 1).to_string(),
                start,
                end,
            })
        })
        .collect()
}

/// Local hour range (inclusive) in which scheduled runs do work. `22-3`
/// wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHours {
    pub start: u32,
    pub end: u32,
}

impl ActiveHours {
    pub fn parse(raw: &str) -> Option<Self> {
        let (a, b) = raw.trim().split_once('-')?;
        let start = a.trim().parse::<u32>().ok()?;
        let end = b.trim().parse::<u32>().ok()?;
        (start < 24 && end < 24).then_some(Self { start, end })
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub leagues: Vec<LeagueConfig>,
    pub events_dir: PathBuf,
    pub active_hours: Option<ActiveHours>,
    pub threads: usize,
    pub force_rebuild: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let db_path = env_path("SIGNALS_DB")
            .or_else(store::default_db_path)
            .context("unable to resolve sqlite path (set SIGNALS_DB)")?;
        let leagues = match env_path("SIGNALS_LEAGUES") {
            Some(path) => load_leagues(&path)?,
            None => default_leagues(),
        };
        let events_dir = env_path("SIGNALS_EVENTS_DIR").unwrap_or_else(|| PathBuf::from("events"));
        let active_hours = match env::var("SIGNALS_ACTIVE_HOURS") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                ActiveHours::parse(&raw)
                    .ok_or_else(|| anyhow!("SIGNALS_ACTIVE_HOURS must look like 8-23, got {raw:?}"))?,
            ),
            _ => None,
        };
        let threads = env::var("SIGNALS_THREADS")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(2)
            .clamp(1, 16);
        let force_rebuild = env_bool("SIGNALS_FORCE_REBUILD", false);

        Ok(Self {
            db_path,
            leagues,
            events_dir,
            active_hours,
            threads,
            force_rebuild,
        })
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| {
            let t = v.trim().to_ascii_lowercase();
            !(t.is_empty() || t == "0" || t == "false" || t == "off" || t == "no")
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_hours_parse_and_wrap() {
        let day = ActiveHours::parse("8-23").unwrap();
        assert!(day.contains(8));
        assert!(day.contains(23));
        assert!(!day.contains(3));

        let night = ActiveHours::parse(" 22 - 3 ").unwrap();
        assert!(night.contains(23));
        assert!(night.contains(2));
        assert!(!night.contains(12));

        assert!(ActiveHours::parse("8-24").is_none());
        assert!(ActiveHours::parse("eight").is_none());
    }

    #[test]
    fn league_json_fills_defaults() {
        let raw = r#"[{
            "league_id": "nfl",
            "sport": "football",
            "season": "2025",
            "season_start": "2025-09-04",
            "season_end": "2026-02-09",
            "schedule": {"kind": "weekly", "weeks": [
                {"label": "1", "start": "2025-09-04", "end": "2025-09-08"},
                {"label": "2", "start": "2025-09-11", "end": "2025-09-15"}
            ]},
            "primary_provider": "espn",
            "secondary_provider": "yahoo"
        }]"#;
        let leagues: Vec<LeagueConfig> = serde_json::from_str(raw).unwrap();
        let nfl = &leagues[0];
        assert_eq!(nfl.min_sample_ratio, 0.6);
        assert_eq!(nfl.min_filtered_entities, 5);
        assert_eq!(nfl.fuzzy_threshold, 0.7);
        assert_eq!(nfl.game_minutes(), 60.0);
        nfl.validate().unwrap();
    }

    #[test]
    fn overlapping_weeks_are_rejected() {
        let mut league = default_leagues().remove(0);
        let d = |m, day| NaiveDate::from_ymd_opt(2025, m, day).unwrap();
        league.schedule = ScheduleKind::Weekly {
            weeks: vec![
                WeekSpan {
                    label: "1".into(),
                    start: d(10, 1),
                    end: d(10, 7),
                },
                WeekSpan {
                    label: "2".into(),
                    start: d(10, 7),
                    end: d(10, 14),
                },
            ],
        };
        assert!(league.validate().is_err());
    }

    #[test]
    fn football_defaults_run_on_weekly_schedules() {
        let leagues = default_leagues();
        let nfl = leagues.iter().find(|l| l.league_id == "nfl").unwrap();
        assert_eq!(nfl.profile().sport, Sport::Football);
        let ScheduleKind::Weekly { weeks } = &nfl.schedule else {
            panic!("nfl should be weekly");
        };
        assert_eq!(weeks.len(), 18);
        assert_eq!(weeks[0].label, "1");
        assert_eq!(weeks[0].end, NaiveDate::from_ymd_opt(2025, 9, 8).unwrap());
        assert!(weeks.iter().all(|w| w.end <= nfl.season_end));

        let ncaaf = leagues.iter().find(|l| l.league_id == "ncaaf").unwrap();
        let ScheduleKind::Weekly { weeks } = &ncaaf.schedule else {
            panic!("ncaaf should be weekly");
        };
        assert_eq!(weeks[0].label, "0");
        assert_eq!(weeks[0].start, ncaaf.season_start);
        assert!(weeks.iter().all(|w| w.end <= ncaaf.season_end));
    }

    #[test]
    fn ncaab_uses_forty_minute_games() {
        let leagues = default_leagues();
        let ncaab = leagues.iter().find(|l| l.league_id == "ncaab").unwrap();
        assert_eq!(ncaab.game_minutes(), 40.0);
        for l in &leagues {
            l.validate().unwrap();
        }
    }
}

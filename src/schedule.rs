use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::{LeagueConfig, ScheduleKind, WeekSpan};

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleUnit {
    Day(NaiveDate),
    Week(WeekSpan),
}

impl ScheduleUnit {
    /// Directory-friendly name: `2025-01-09` or `week-5`.
    pub fn label(&self) -> String {
        match self {
            ScheduleUnit::Day(date) => date.to_string(),
            ScheduleUnit::Week(week) => format!("week-{}", week.label),
        }
    }

    /// High-water mark recorded once this unit is done.
    pub fn mark(&self) -> NaiveDate {
        match self {
            ScheduleUnit::Day(date) => *date,
            ScheduleUnit::Week(week) => week.end,
        }
    }
}

pub struct Schedule<'a> {
    league: &'a LeagueConfig,
}

impl<'a> Schedule<'a> {
    pub fn new(league: &'a LeagueConfig) -> Self {
        Self { league }
    }

    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.league.season_start <= today && today < self.league.season_end
    }

    /// Units still to process, oldest first.
    pub fn pending_units(&self, last_update: Option<NaiveDate>, today: NaiveDate) -> Vec<ScheduleUnit> {
        match &self.league.schedule {
            ScheduleKind::Daily => {
                let Some(yesterday) = today.pred_opt() else {
                    return Vec::new();
                };
                let last_day = yesterday.min(self.league.season_end);
                let mut day = match last_update {
                    Some(mark) => match mark.checked_add_days(Days::new(1)) {
                        Some(next) => next.max(self.league.season_start),
                        None => return Vec::new(),
                    },
                    None => self.league.season_start,
                };
                let mut out = Vec::new();
                while day <= last_day {
                    out.push(ScheduleUnit::Day(day));
                    let Some(next) = day.succ_opt() else {
                        break;
                    };
                    day = next;
                }
                out
            }
            ScheduleKind::Weekly { weeks } => {
                let mut pending = weeks
                    .iter()
                    .filter(|w| last_update.is_none_or(|mark| w.start > mark))
                    .filter(|w| w.end < today)
                    .cloned()
                    .collect::<Vec<_>>();
                pending.sort_by_key(|w| w.start);
                pending.into_iter().map(ScheduleUnit::Week).collect()
            }
        }
    }

    pub fn is_up_to_date(&self, last_update: Option<NaiveDate>, today: NaiveDate) -> bool {
        self.pending_units(last_update, today).is_empty()
    }
}

pub fn load_checkpoint(conn: &Connection, league_id: &str) -> Result<Option<NaiveDate>> {
    let raw = conn
        .query_row(
            "SELECT last_update FROM leagues WHERE league_id = ?1",
            params![league_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .context("query league checkpoint")?
        .flatten();
    match raw {
        Some(s) => Ok(Some(
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .with_context(|| format!("parse checkpoint {s:?} for {league_id}"))?,
        )),
        None => Ok(None),
    }
}

pub fn ensure_league(conn: &Connection, league: &LeagueConfig) -> Result<()> {
    conn.execute(
        "INSERT INTO leagues(league_id, sport, season, last_update, updated_at)
         VALUES (?1, ?2, ?3, NULL, ?4)
         ON CONFLICT(league_id) DO UPDATE SET sport = excluded.sport, season = excluded.season",
        params![
            league.league_id,
            league.sport.as_str(),
            league.season,
            Utc::now().to_rfc3339()
        ],
    )
    .context("register league")?;
    Ok(())
}

/// Advance the league's high-water mark to `unit`. The mark never moves
/// backwards.
pub fn mark_processed(conn: &Connection, league: &LeagueConfig, unit: &ScheduleUnit) -> Result<()> {
    conn.execute(
        "INSERT INTO leagues(league_id, sport, season, last_update, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(league_id) DO UPDATE SET
            last_update = excluded.last_update,
            updated_at = excluded.updated_at
         WHERE leagues.last_update IS NULL OR excluded.last_update > leagues.last_update",
        params![
            league.league_id,
            league.sport.as_str(),
            league.season,
            unit.mark().to_string(),
            Utc::now().to_rfc3339()
        ],
    )
    .context("advance league checkpoint")?;
    Ok(())
}

//! Normalized per-provider event records.
//!
//! Parsing goes through [`EventReport::from_json`] / [`EventReport::from_value`],
//! which validate once so ingest can rely on referenced teams and players
//! being present and counters being usable numbers.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SignalError;
use crate::formula::Counters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    Scheduled,
    InProgress,
    Final,
    Postponed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameReport {
    pub game_id: String,
    pub date: NaiveDate,
    pub season: String,
    pub home_team_id: String,
    pub away_team_id: String,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub home_score: Option<i32>,
    #[serde(default)]
    pub away_score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamReport {
    pub team_id: String,
    pub display_name: String,
    #[serde(default)]
    pub abbreviation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerReport {
    pub player_id: String,
    #[serde(default)]
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub birthdate: Option<NaiveDate>,
    pub team_id: String,
}

impl PlayerReport {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatLine {
    pub group: String,
    pub team_id: String,
    pub counters: Counters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatLine {
    pub group: String,
    pub player_id: String,
    pub counters: Counters,
}

/// One provider's view of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventReport {
    pub provider: String,
    pub game: GameReport,
    pub teams: Vec<TeamReport>,
    #[serde(default)]
    pub players: Vec<PlayerReport>,
    #[serde(default)]
    pub team_stats: Vec<TeamStatLine>,
    #[serde(default)]
    pub player_stats: Vec<PlayerStatLine>,
}

impl EventReport {
    pub fn from_json(raw: &str) -> Result<Self, SignalError> {
        let report: EventReport = serde_json::from_str(raw)
            .map_err(|err| SignalError::invalid(format!("event report: {err}")))?;
        report.validate()?;
        Ok(report)
    }

    pub fn from_value(value: Value) -> Result<Self, SignalError> {
        let report: EventReport = serde_json::from_value(value)
            .map_err(|err| SignalError::invalid(format!("event report: {err}")))?;
        report.validate()?;
        Ok(report)
    }

    pub fn is_final(&self) -> bool {
        self.game.status == GameStatus::Final
    }

    pub fn team(&self, team_id: &str) -> Option<&TeamReport> {
        self.teams.iter().find(|t| t.team_id == team_id)
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerReport> {
        self.players.iter().find(|p| p.player_id == player_id)
    }

    pub fn team_line(&self, group: &str, team_id: &str) -> Option<&TeamStatLine> {
        self.team_stats
            .iter()
            .find(|l| l.group == group && l.team_id == team_id)
    }

    pub fn player_line(&self, group: &str, player_id: &str) -> Option<&PlayerStatLine> {
        self.player_stats
            .iter()
            .find(|l| l.group == group && l.player_id == player_id)
    }

    fn validate(&self) -> Result<(), SignalError> {
        let g = &self.game;
        if self.provider.trim().is_empty() {
            return Err(SignalError::invalid("provider is empty"));
        }
        if g.game_id.trim().is_empty() {
            return Err(SignalError::invalid("game id is empty"));
        }
        if g.home_team_id == g.away_team_id {
            return Err(SignalError::invalid(format!(
                "game {}: home and away are both {}",
                g.game_id, g.home_team_id
            )));
        }

        let mut team_ids = HashSet::new();
        for t in &self.teams {
            if !team_ids.insert(t.team_id.as_str()) {
                return Err(SignalError::invalid(format!(
                    "game {}: team {} listed twice",
                    g.game_id, t.team_id
                )));
            }
        }
        for side in [&g.home_team_id, &g.away_team_id] {
            if !team_ids.contains(side.as_str()) {
                return Err(SignalError::invalid(format!(
                    "game {}: team {} not listed",
                    g.game_id, side
                )));
            }
        }

        let mut player_ids = HashSet::new();
        for p in &self.players {
            if !player_ids.insert(p.player_id.as_str()) {
                return Err(SignalError::invalid(format!(
                    "game {}: player {} listed twice",
                    g.game_id, p.player_id
                )));
            }
            if p.team_id != g.home_team_id && p.team_id != g.away_team_id {
                return Err(SignalError::invalid(format!(
                    "game {}: player {} on team {} which is not playing",
                    g.game_id, p.player_id, p.team_id
                )));
            }
        }

        for line in &self.team_stats {
            if !team_ids.contains(line.team_id.as_str()) {
                return Err(SignalError::invalid(format!(
                    "game {}: {} line for unknown team {}",
                    g.game_id, line.group, line.team_id
                )));
            }
            check_counters(&g.game_id, &line.counters)?;
        }
        for line in &self.player_stats {
            if !player_ids.contains(line.player_id.as_str()) {
                return Err(SignalError::invalid(format!(
                    "game {}: {} line for unknown player {}",
                    g.game_id, line.group, line.player_id
                )));
            }
            check_counters(&g.game_id, &line.counters)?;
        }
        Ok(())
    }
}

fn check_counters(game_id: &str, counters: &Counters) -> Result<(), SignalError> {
    match counters.iter().find(|(_, v)| !v.is_finite() || **v < 0.0) {
        Some((name, v)) => Err(SignalError::invalid(format!(
            "game {game_id}: counter {name} = {v}"
        ))),
        None => Ok(()),
    }
}

/// Both providers' reports for one event. `None` on either side means that
/// provider had nothing for the event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBundle {
    pub event: String,
    pub primary: Option<EventReport>,
    pub secondary: Option<EventReport>,
}

#[derive(Debug, Deserialize)]
struct RawBundle {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    primary: Option<Value>,
    #[serde(default)]
    secondary: Option<Value>,
}

impl EventBundle {
    pub fn from_json(raw: &str, fallback_event: &str) -> Result<Self, SignalError> {
        let bundle: RawBundle = serde_json::from_str(raw)
            .map_err(|err| SignalError::invalid(format!("event bundle: {err}")))?;
        let primary = bundle
            .primary
            .filter(|v| !v.is_null())
            .map(EventReport::from_value)
            .transpose()?;
        let secondary = bundle
            .secondary
            .filter(|v| !v.is_null())
            .map(EventReport::from_value)
            .transpose()?;
        let event = bundle
            .event
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| fallback_event.to_string());
        Ok(Self {
            event,
            primary,
            secondary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report() -> Value {
        json!({
            "provider": "espn",
            "game": {
                "game_id": "401",
                "date": "2025-01-09",
                "season": "2024-25",
                "home_team_id": "1",
                "away_team_id": "2",
                "status": "final"
            },
            "teams": [
                {"team_id": "1", "display_name": "Utah Jazz"},
                {"team_id": "2", "display_name": "Miami Heat"}
            ],
            "players": [
                {"player_id": "10", "first_name": "Lauri", "last_name": "Markkanen", "team_id": "1"}
            ],
            "team_stats": [
                {"group": "team", "team_id": "1", "counters": {"pts": 101.0}}
            ],
            "player_stats": [
                {"group": "player", "player_id": "10", "counters": {"pts": 30.0}}
            ]
        })
    }

    #[test]
    fn valid_report_parses() {
        let r = EventReport::from_value(report()).unwrap();
        assert!(r.is_final());
        assert_eq!(r.player("10").unwrap().full_name(), "Lauri Markkanen");
        assert!(r.team_line("team", "1").is_some());
    }

    #[test]
    fn same_home_and_away_is_rejected() {
        let mut v = report();
        v["game"]["away_team_id"] = json!("1");
        assert!(matches!(
            EventReport::from_value(v),
            Err(SignalError::InvalidRecord(_))
        ));
    }

    #[test]
    fn unlisted_team_is_rejected() {
        let mut v = report();
        v["teams"] = json!([{"team_id": "1", "display_name": "Utah Jazz"}]);
        assert!(EventReport::from_value(v).is_err());
    }

    #[test]
    fn stat_line_for_unknown_player_is_rejected() {
        let mut v = report();
        v["player_stats"][0]["player_id"] = json!("99");
        assert!(EventReport::from_value(v).is_err());
    }

    #[test]
    fn negative_counter_is_rejected() {
        let mut v = report();
        v["team_stats"][0]["counters"]["pts"] = json!(-1.0);
        assert!(EventReport::from_value(v).is_err());
    }

    #[test]
    fn bundle_with_null_secondary() {
        let raw = json!({"primary": report(), "secondary": null}).to_string();
        let b = EventBundle::from_json(&raw, "401.json").unwrap();
        assert!(b.primary.is_some());
        assert!(b.secondary.is_none());
        assert_eq!(b.event, "401.json");
    }
}

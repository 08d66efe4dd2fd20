use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::config::LeagueConfig;
use crate::error::SignalError;
use crate::formula::Counters;
use crate::identity::{
    self, CanonicalId, EntityAttributes, EntityType, GameAttributes, MappingKey, NameIndex,
};
use crate::records::{EventBundle, EventReport, GameStatus};
use crate::sports::SportProfile;
use crate::store::UnitOfWork;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub samples_written: usize,
    pub samples_existing: usize,
    pub unresolved: usize,
    pub unknown_groups: usize,
    pub fields_from_secondary: usize,
}

#[derive(Debug)]
pub enum IngestOutcome {
    Ingested {
        game_id: CanonicalId,
        stats: IngestStats,
    },
    /// Pregame or in-progress data; nothing stored.
    NotFinal,
    /// The primary provider had nothing for the event. The unit holding it
    /// must not be checkpointed.
    MissingPrimary(SignalError),
    /// A team could not be resolved, so the game itself could not be keyed.
    Unresolved(SignalError),
}

/// Resolve every entity in `bundle` and store its stat lines as samples.
pub fn ingest_event(
    uow: &mut UnitOfWork<'_>,
    league: &LeagueConfig,
    bundle: &EventBundle,
) -> Result<IngestOutcome> {
    let Some(primary) = bundle.primary.as_ref() else {
        return Ok(IngestOutcome::MissingPrimary(
            SignalError::TransientFetchFailure {
                provider: league.primary_provider.clone(),
                event: bundle.event.clone(),
            },
        ));
    };
    if primary.provider != league.primary_provider {
        return Err(anyhow!(
            "event {}: primary report comes from {}, league expects {}",
            bundle.event,
            primary.provider,
            league.primary_provider
        ));
    }
    if !primary.is_final() {
        return Ok(IngestOutcome::NotFinal);
    }

    let secondary = bundle.secondary.as_ref().filter(|s| {
        let expected = league.secondary_provider.as_deref() == Some(s.provider.as_str());
        if !expected {
            warn!(event = %bundle.event, provider = %s.provider, "ignoring report from unexpected provider");
        }
        expected
    });
    if secondary.is_none() && league.secondary_provider.is_some() {
        let gap = SignalError::TransientFetchFailure {
            provider: league.secondary_provider.clone().unwrap_or_default(),
            event: bundle.event.clone(),
        };
        debug!(league = %league.league_id, "{gap}; ingesting primary only");
    }

    let league_id = league.league_id.as_str();
    let threshold = league.fuzzy_threshold;
    let mut stats = IngestStats::default();

    // Teams.
    let mut team_index = secondary.map(|s| {
        let mut index = NameIndex::new(&s.provider);
        for t in &s.teams {
            index.push(&t.team_id, &t.display_name, None);
        }
        index
    });
    if let Some(index) = team_index.as_mut() {
        index.retain_unmapped(uow, league_id, EntityType::Team)?;
    }
    let mut sides = [None, None];
    for (slot, team_id) in [&primary.game.home_team_id, &primary.game.away_team_id]
        .into_iter()
        .enumerate()
    {
        let Some(team) = primary.team(team_id) else {
            continue;
        };
        let key = MappingKey::new(&primary.provider, league_id, EntityType::Team, team_id);
        let attrs = EntityAttributes::Team {
            display_name: team.display_name.clone(),
            abbreviation: team.abbreviation.clone(),
        };
        match identity::resolve_or_create(uow, &key, &attrs, team_index.as_mut(), threshold)? {
            Some(id) => sides[slot] = Some(id),
            None => return Ok(IngestOutcome::Unresolved(key.unresolved())),
        }
    }
    let (Some(home_id), Some(away_id)) = (sides[0], sides[1]) else {
        let key = MappingKey::new(
            &primary.provider,
            league_id,
            EntityType::Team,
            &primary.game.home_team_id,
        );
        return Ok(IngestOutcome::Unresolved(key.unresolved()));
    };
    if let Some(s) = secondary {
        for (team_id, id) in [(&s.game.home_team_id, home_id), (&s.game.away_team_id, away_id)] {
            let key = MappingKey::new(&s.provider, league_id, EntityType::Team, team_id);
            identity::insert_or_get(uow, &key, id)?;
        }
    }

    // Game.
    let game_attrs = game_attributes(primary, home_id, away_id);
    let game_key = MappingKey::new(
        &primary.provider,
        league_id,
        EntityType::Game,
        &primary.game.game_id,
    );
    let Some(game_id) = identity::resolve_or_create(
        uow,
        &game_key,
        &EntityAttributes::Game(game_attrs.clone()),
        None,
        threshold,
    )?
    else {
        return Ok(IngestOutcome::Unresolved(game_key.unresolved()));
    };
    identity::enrich_game(uow, game_id, &game_attrs)?;
    if let Some(s) = secondary {
        let key = MappingKey::new(&s.provider, league_id, EntityType::Game, &s.game.game_id);
        identity::insert_or_get(uow, &key, game_id)?;
        identity::enrich_game(uow, game_id, &game_attributes(s, home_id, away_id))?;
    }

    let team_of = |report: &EventReport, local_team: &str| -> Option<(CanonicalId, CanonicalId)> {
        if local_team == report.game.home_team_id {
            Some((home_id, away_id))
        } else if local_team == report.game.away_team_id {
            Some((away_id, home_id))
        } else {
            None
        }
    };

    // Players.
    let mut player_index = secondary.map(|s| {
        let mut index = NameIndex::new(&s.provider);
        for p in &s.players {
            index.push(&p.player_id, &p.full_name(), p.birthdate);
        }
        index
    });
    if let Some(index) = player_index.as_mut() {
        index.retain_unmapped(uow, league_id, EntityType::Player)?;
    }
    let mut primary_players: HashMap<&str, CanonicalId> = HashMap::new();
    for p in &primary.players {
        let key = MappingKey::new(&primary.provider, league_id, EntityType::Player, &p.player_id);
        let attrs = EntityAttributes::Player {
            first_name: p.first_name.clone(),
            last_name: p.last_name.clone(),
            position: p.position.clone(),
            birthdate: p.birthdate,
        };
        match identity::resolve_or_create(uow, &key, &attrs, player_index.as_mut(), threshold)? {
            Some(id) => {
                primary_players.insert(p.player_id.as_str(), id);
            }
            None => warn!(event = %bundle.event, "{}", key.unresolved()),
        }
    }
    let mut secondary_players: HashMap<&str, CanonicalId> = HashMap::new();
    if let Some(s) = secondary {
        for p in &s.players {
            let key = MappingKey::new(&s.provider, league_id, EntityType::Player, &p.player_id);
            if let Some(id) = identity::resolve(uow, &key)? {
                secondary_players.insert(p.player_id.as_str(), id);
            }
        }
    }

    let profile = league.profile();
    let mut written: Vec<(String, CanonicalId)> = Vec::new();

    // Team lines: primary first, secondary fills gaps and missing groups.
    for line in &primary.team_stats {
        let Some((team_id, opp_id)) = team_of(primary, line.team_id.as_str()) else {
            continue;
        };
        let fill = secondary
            .and_then(|s| {
                let local = if team_id == home_id {
                    &s.game.home_team_id
                } else {
                    &s.game.away_team_id
                };
                s.team_line(&line.group, local)
            })
            .map(|l| &l.counters);
        let (counters, filled) = merge_counters(&line.counters, fill);
        stats.fields_from_secondary += filled;
        let sample = Sample {
            league_id,
            game_id,
            group: &line.group,
            entity_id: team_id,
            team_id,
            opp_id,
            counters: &counters,
        };
        let known = accepts_group(profile, &line.group, EntityType::Team);
        record_sample(uow, known, &sample, &mut stats)?;
        written.push((line.group.clone(), team_id));
    }
    if let Some(s) = secondary {
        for line in &s.team_stats {
            let Some((team_id, opp_id)) = team_of(s, line.team_id.as_str()) else {
                continue;
            };
            if written.iter().any(|(g, e)| g == &line.group && *e == team_id) {
                continue;
            }
            stats.fields_from_secondary += line.counters.len();
            let sample = Sample {
                league_id,
                game_id,
                group: &line.group,
                entity_id: team_id,
                team_id,
                opp_id,
                counters: &line.counters,
            };
            let known = accepts_group(profile, &line.group, EntityType::Team);
            record_sample(uow, known, &sample, &mut stats)?;
            written.push((line.group.clone(), team_id));
        }
    }

    // Player lines.
    let canonical_to_secondary: HashMap<CanonicalId, &str> = secondary_players
        .iter()
        .map(|(local, id)| (*id, *local))
        .collect();
    for line in &primary.player_stats {
        let Some(&player_id) = primary_players.get(line.player_id.as_str()) else {
            stats.unresolved += 1;
            continue;
        };
        let Some((team_id, opp_id)) = primary
            .player(&line.player_id)
            .and_then(|p| team_of(primary, p.team_id.as_str()))
        else {
            continue;
        };
        let fill = canonical_to_secondary
            .get(&player_id)
            .and_then(|local| secondary.and_then(|s| s.player_line(&line.group, local)))
            .map(|l| &l.counters);
        let (counters, filled) = merge_counters(&line.counters, fill);
        stats.fields_from_secondary += filled;
        let sample = Sample {
            league_id,
            game_id,
            group: &line.group,
            entity_id: player_id,
            team_id,
            opp_id,
            counters: &counters,
        };
        let known = accepts_group(profile, &line.group, EntityType::Player);
        record_sample(uow, known, &sample, &mut stats)?;
        written.push((line.group.clone(), player_id));
    }
    if let Some(s) = secondary {
        for line in &s.player_stats {
            let Some(&player_id) = secondary_players.get(line.player_id.as_str()) else {
                stats.unresolved += 1;
                debug!(event = %bundle.event, player = %line.player_id, "secondary-only player has no mapping");
                continue;
            };
            if written.iter().any(|(g, e)| g == &line.group && *e == player_id) {
                continue;
            }
            let Some((team_id, opp_id)) = s
                .player(&line.player_id)
                .and_then(|p| team_of(s, p.team_id.as_str()))
            else {
                continue;
            };
            stats.fields_from_secondary += line.counters.len();
            let sample = Sample {
                league_id,
                game_id,
                group: &line.group,
                entity_id: player_id,
                team_id,
                opp_id,
                counters: &line.counters,
            };
            let known = accepts_group(profile, &line.group, EntityType::Player);
            record_sample(uow, known, &sample, &mut stats)?;
            written.push((line.group.clone(), player_id));
        }
    }

    debug!(
        league = %league_id,
        event = %bundle.event,
        game = %game_id,
        written = stats.samples_written,
        existing = stats.samples_existing,
        unresolved = stats.unresolved,
        "event ingested"
    );
    Ok(IngestOutcome::Ingested { game_id, stats })
}

fn game_attributes(report: &EventReport, home_id: CanonicalId, away_id: CanonicalId) -> GameAttributes {
    let g = &report.game;
    GameAttributes {
        date: g.date,
        season: g.season.clone(),
        home_id,
        away_id,
        venue: g.venue.clone().filter(|v| !v.trim().is_empty()),
        home_score: g.home_score,
        away_score: g.away_score,
        finished: g.status == GameStatus::Final,
    }
}

/// A line is kept only when its group exists and describes the kind of
/// entity the line belongs to.
fn accepts_group(profile: &SportProfile, group: &str, entity_type: EntityType) -> bool {
    profile
        .group(group)
        .is_some_and(|g| g.entity_type == entity_type)
}

/// Primary counters win; the secondary only adds fields the primary lacks.
pub fn merge_counters(primary: &Counters, secondary: Option<&Counters>) -> (Counters, usize) {
    let mut merged = primary.clone();
    let mut filled = 0usize;
    if let Some(extra) = secondary {
        for (field, value) in extra {
            if !merged.contains_key(field) {
                merged.insert(field.clone(), *value);
                filled += 1;
            }
        }
    }
    (merged, filled)
}

struct Sample<'a> {
    league_id: &'a str,
    game_id: CanonicalId,
    group: &'a str,
    entity_id: CanonicalId,
    team_id: CanonicalId,
    opp_id: CanonicalId,
    counters: &'a Counters,
}

fn record_sample(
    conn: &Connection,
    known_group: bool,
    sample: &Sample<'_>,
    stats: &mut IngestStats,
) -> Result<()> {
    if !known_group {
        stats.unknown_groups += 1;
        debug!(group = %sample.group, "no formulas for sample group; line dropped");
        return Ok(());
    }
    if insert_sample(conn, sample)? {
        stats.samples_written += 1;
    } else {
        stats.samples_existing += 1;
    }
    Ok(())
}

/// Samples are immutable: a second write for the same (game, group, entity)
/// is a no-op.
fn insert_sample(conn: &Connection, sample: &Sample<'_>) -> Result<bool> {
    let counters_json = serde_json::to_string(sample.counters).context("encode counters")?;
    let changed = conn.execute(
        "INSERT INTO metric_samples(league_id, game_id, sample_group, entity_id, team_id, opp_id, counters_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(game_id, sample_group, entity_id) DO NOTHING",
        params![
            sample.league_id,
            sample.game_id.get(),
            sample.group,
            sample.entity_id.get(),
            sample.team_id.get(),
            sample.opp_id.get(),
            counters_json
        ],
    )
    .context("insert metric sample")?;
    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_primary_values() {
        let primary: Counters = [("pts".to_string(), 100.0)].into_iter().collect();
        let secondary: Counters = [("pts".to_string(), 99.0), ("poss".to_string(), 98.0)]
            .into_iter()
            .collect();
        let (merged, filled) = merge_counters(&primary, Some(&secondary));
        assert_eq!(merged["pts"], 100.0);
        assert_eq!(merged["poss"], 98.0);
        assert_eq!(filled, 1);
    }

    #[test]
    fn groups_only_accept_their_own_entity_type() {
        let profile = SportProfile::for_sport(crate::sports::Sport::Baseball);
        assert!(accepts_group(profile, "team", EntityType::Team));
        assert!(accepts_group(profile, "pitcher", EntityType::Player));
        assert!(!accepts_group(profile, "pitcher", EntityType::Team));
        assert!(!accepts_group(profile, "team", EntityType::Player));
        assert!(!accepts_group(profile, "hustle", EntityType::Team));
    }

    #[test]
    fn merge_without_secondary_is_identity() {
        let primary: Counters = [("pts".to_string(), 100.0)].into_iter().collect();
        let (merged, filled) = merge_counters(&primary, None);
        assert_eq!(merged, primary);
        assert_eq!(filled, 0);
    }
}

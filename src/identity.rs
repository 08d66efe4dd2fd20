//! Provider id reconciliation.
//!
//! Every provider-local id is bound to one canonical id through a row in
//! `provider_mapping`. Rows are only ever inserted; the table's primary key
//! is what keeps concurrent resolvers from creating two canonical entities
//! for the same provider id.

use std::fmt;

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SignalError;
use crate::store::UnitOfWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Game,
    Team,
    Player,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Game => "game",
            EntityType::Team => "team",
            EntityType::Player => "player",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "game" => Some(EntityType::Game),
            "team" => Some(EntityType::Team),
            "player" => Some(EntityType::Player),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(pub i64);

impl CanonicalId {
    /// Wire value for "no mapping" where an integer is required.
    pub const NOT_FOUND: i64 = -1;

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn or_not_found(id: Option<CanonicalId>) -> i64 {
        id.map_or(Self::NOT_FOUND, CanonicalId::get)
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingKey {
    pub provider: String,
    pub league: String,
    pub entity_type: EntityType,
    pub local_id: String,
}

impl MappingKey {
    pub fn new(provider: &str, league: &str, entity_type: EntityType, local_id: &str) -> Self {
        Self {
            provider: provider.to_string(),
            league: league.to_string(),
            entity_type,
            local_id: local_id.trim().to_string(),
        }
    }

    pub fn unresolved(&self) -> SignalError {
        SignalError::UnresolvedEntity {
            provider: self.provider.clone(),
            league: self.league.clone(),
            entity_type: self.entity_type,
            local_id: self.local_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameAttributes {
    pub date: NaiveDate,
    pub season: String,
    pub home_id: CanonicalId,
    pub away_id: CanonicalId,
    pub venue: Option<String>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub finished: bool,
}

/// What the first reporting provider knows about an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityAttributes {
    Team {
        display_name: String,
        abbreviation: Option<String>,
    },
    Player {
        first_name: String,
        last_name: String,
        position: Option<String>,
        birthdate: Option<NaiveDate>,
    },
    Game(GameAttributes),
}

impl EntityAttributes {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityAttributes::Team { .. } => EntityType::Team,
            EntityAttributes::Player { .. } => EntityType::Player,
            EntityAttributes::Game(_) => EntityType::Game,
        }
    }

    /// Name used for cross-provider matching. Games are keyed, not named.
    pub fn display_name(&self) -> Option<String> {
        let name = match self {
            EntityAttributes::Team { display_name, .. } => display_name.trim().to_string(),
            EntityAttributes::Player {
                first_name,
                last_name,
                ..
            } => format!("{} {}", first_name.trim(), last_name.trim())
                .trim()
                .to_string(),
            EntityAttributes::Game(_) => return None,
        };
        (!name.is_empty()).then_some(name)
    }

    pub fn birthdate(&self) -> Option<NaiveDate> {
        match self {
            EntityAttributes::Player { birthdate, .. } => *birthdate,
            _ => None,
        }
    }

    fn is_creatable(&self) -> bool {
        match self {
            EntityAttributes::Team { display_name, .. } => !display_name.trim().is_empty(),
            EntityAttributes::Player { last_name, .. } => !last_name.trim().is_empty(),
            EntityAttributes::Game(g) => g.home_id != g.away_id && !g.season.trim().is_empty(),
        }
    }
}

pub fn game_key(league: &str, date: NaiveDate, home_id: CanonicalId) -> String {
    format!("{league}_{}_{:04}", date.format("%Y%m%d"), home_id.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameCandidate {
    pub local_id: String,
    pub name: String,
    pub birthdate: Option<NaiveDate>,
}

/// The other provider's unclaimed entities of one type, in report order.
#[derive(Debug, Clone)]
pub struct NameIndex {
    provider: String,
    candidates: Vec<NameCandidate>,
}

impl NameIndex {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            candidates: Vec::new(),
        }
    }

    pub fn push(&mut self, local_id: &str, name: &str, birthdate: Option<NaiveDate>) {
        self.candidates.push(NameCandidate {
            local_id: local_id.trim().to_string(),
            name: name.trim().to_string(),
            birthdate,
        });
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Position of the single best candidate scoring at least `threshold`.
    /// Ties go to the earliest candidate. A candidate whose birthdate is known
    /// and differs from `birthdate` is never returned.
    pub fn best_match(
        &self,
        name: &str,
        birthdate: Option<NaiveDate>,
        threshold: f64,
    ) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        let mut tied = 0usize;
        for (idx, candidate) in self.candidates.iter().enumerate() {
            if let (Some(a), Some(b)) = (birthdate, candidate.birthdate)
                && a != b
            {
                continue;
            }
            let score = similarity(name, &candidate.name);
            if score < threshold {
                continue;
            }
            match best {
                Some((_, top)) if score > top => {
                    best = Some((idx, score));
                    tied = 1;
                }
                Some((_, top)) if score == top => tied += 1,
                Some(_) => {}
                None => {
                    best = Some((idx, score));
                    tied = 1;
                }
            }
        }
        if tied > 1
            && let Some((idx, score)) = best
        {
            warn!(
                provider = %self.provider,
                name,
                chosen = %self.candidates[idx].name,
                score,
                tied,
                "ambiguous fuzzy match resolved by candidate order"
            );
        }
        best.map(|(idx, _)| idx)
    }

    pub fn get(&self, idx: usize) -> Option<&NameCandidate> {
        self.candidates.get(idx)
    }

    /// Remove a candidate so it can bind at most once.
    pub fn claim(&mut self, idx: usize) -> Option<NameCandidate> {
        (idx < self.candidates.len()).then(|| self.candidates.remove(idx))
    }

    /// Drop candidates this provider has already mapped in `league`. Their
    /// canonical entity is settled, so they are not free for a name match.
    pub fn retain_unmapped(
        &mut self,
        conn: &Connection,
        league: &str,
        entity_type: EntityType,
    ) -> Result<usize> {
        let mut kept = Vec::with_capacity(self.candidates.len());
        for candidate in self.candidates.drain(..) {
            let key = MappingKey::new(&self.provider, league, entity_type, &candidate.local_id);
            if resolve(conn, &key)?.is_none() {
                kept.push(candidate);
            }
        }
        self.candidates = kept;
        Ok(self.candidates.len())
    }
}

pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_name(a), &normalize_name(b))
}

fn normalize_name(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact lookup. Never writes.
pub fn resolve(conn: &Connection, key: &MappingKey) -> Result<Option<CanonicalId>> {
    let id = conn
        .query_row(
            "SELECT canonical_id FROM provider_mapping
             WHERE provider = ?1 AND league_id = ?2 AND entity_type = ?3 AND provider_local_id = ?4",
            params![
                key.provider,
                key.league,
                key.entity_type.as_str(),
                key.local_id
            ],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .context("query provider mapping")?;
    Ok(id.map(CanonicalId))
}

/// Bind `key` to `id` unless it is already bound. Returns whichever id the
/// key ends up mapped to; losing an insert race is not an error.
pub fn insert_or_get(conn: &Connection, key: &MappingKey, id: CanonicalId) -> Result<CanonicalId> {
    if try_insert_mapping(conn, key, id)? {
        return Ok(id);
    }
    let existing = resolve(conn, key)?
        .ok_or_else(|| anyhow!("mapping for {}:{} vanished after conflict", key.provider, key.local_id))?;
    if existing != id {
        let conflict = SignalError::PersistenceConflict {
            provider: key.provider.clone(),
            local_id: key.local_id.clone(),
            existing: existing.get(),
        };
        debug!(requested = %id, "{conflict}");
    }
    Ok(existing)
}

fn try_insert_mapping(conn: &Connection, key: &MappingKey, id: CanonicalId) -> Result<bool> {
    let changed = conn
        .execute(
            "INSERT INTO provider_mapping(provider, league_id, entity_type, provider_local_id, canonical_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(provider, league_id, entity_type, provider_local_id) DO NOTHING",
            params![
                key.provider,
                key.league,
                key.entity_type.as_str(),
                key.local_id,
                id.get(),
                Utc::now().to_rfc3339()
            ],
        )
        .context("insert provider mapping")?;
    Ok(changed == 1)
}

/// Resolve `key`, creating a canonical entity when nothing matches.
///
/// Order: exact mapping, then a fuzzy match against `other` (the second
/// provider's unclaimed entities), then creation. `Ok(None)` means the
/// attributes are too thin to create anything and the caller should skip the
/// dependent record.
pub fn resolve_or_create(
    uow: &mut UnitOfWork<'_>,
    key: &MappingKey,
    attrs: &EntityAttributes,
    other: Option<&mut NameIndex>,
    threshold: f64,
) -> Result<Option<CanonicalId>> {
    if attrs.entity_type() != key.entity_type {
        return Err(anyhow!(
            "attributes for {} passed with a {} key",
            attrs.entity_type(),
            key.entity_type
        ));
    }
    if let Some(id) = resolve(uow, key)? {
        return Ok(Some(id));
    }
    let mut counterpart: Option<MappingKey> = None;
    if let Some(index) = other
        && let Some(name) = attrs.display_name()
        && let Some(idx) = index.best_match(&name, attrs.birthdate(), threshold)
        && let Some(candidate) = index.get(idx).cloned()
    {
        let other_key = MappingKey::new(
            index.provider(),
            &key.league,
            key.entity_type,
            &candidate.local_id,
        );
        match resolve(uow, &other_key)? {
            Some(id) if !has_mapping_from(uow, &key.provider, &key.league, key.entity_type, id)? => {
                index.claim(idx);
                let bound = insert_or_get(uow, key, id)?;
                debug!(
                    provider = %key.provider,
                    local_id = %key.local_id,
                    matched = %candidate.name,
                    canonical = %bound,
                    "bound by name match"
                );
                return Ok(Some(bound));
            }
            Some(id) => {
                index.claim(idx);
                debug!(
                    provider = %key.provider,
                    local_id = %key.local_id,
                    matched = %candidate.name,
                    canonical = %id,
                    "name match already bound to another {} id",
                    key.provider
                );
            }
            None if attrs.is_creatable() => {
                index.claim(idx);
                counterpart = Some(other_key);
            }
            None => {}
        }
    }

    if !attrs.is_creatable() {
        debug!(provider = %key.provider, local_id = %key.local_id, "insufficient data to create {}", key.entity_type);
        return Ok(None);
    }

    let created = {
        let sp = uow.savepoint()?;
        let new_id = insert_entity(&sp, &key.league, attrs)?;
        if try_insert_mapping(&sp, key, new_id)? {
            sp.commit().context("release create savepoint")?;
            Some(new_id)
        } else {
            None
        }
    };
    let id = match created {
        Some(id) => {
            debug!(provider = %key.provider, local_id = %key.local_id, canonical = %id, "created {}", key.entity_type);
            id
        }
        None => resolve(uow, key)?
            .ok_or_else(|| anyhow!("mapping for {}:{} missing after conflict", key.provider, key.local_id))?,
    };

    if let Some(other_key) = counterpart {
        insert_or_get(uow, &other_key, id)?;
    }
    Ok(Some(id))
}

/// Whether `provider` already maps some local id of `entity_type` to `id`.
fn has_mapping_from(
    conn: &Connection,
    provider: &str,
    league: &str,
    entity_type: EntityType,
    id: CanonicalId,
) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM provider_mapping
             WHERE provider = ?1 AND league_id = ?2 AND entity_type = ?3 AND canonical_id = ?4
             LIMIT 1",
            params![provider, league, entity_type.as_str(), id.get()],
            |_| Ok(()),
        )
        .optional()
        .context("query mappings for canonical id")?;
    Ok(found.is_some())
}

fn insert_entity(conn: &Connection, league: &str, attrs: &EntityAttributes) -> Result<CanonicalId> {
    match attrs {
        EntityAttributes::Team {
            display_name,
            abbreviation,
        } => {
            conn.execute(
                "INSERT INTO teams(league_id, display_name, abbreviation) VALUES (?1, ?2, ?3)",
                params![league, display_name.trim(), abbreviation],
            )
            .context("insert team")?;
            Ok(CanonicalId(conn.last_insert_rowid()))
        }
        EntityAttributes::Player {
            first_name,
            last_name,
            position,
            birthdate,
        } => {
            conn.execute(
                "INSERT INTO players(league_id, first_name, last_name, position, birthdate)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    league,
                    first_name.trim(),
                    last_name.trim(),
                    position,
                    birthdate.map(|d| d.to_string())
                ],
            )
            .context("insert player")?;
            Ok(CanonicalId(conn.last_insert_rowid()))
        }
        EntityAttributes::Game(game) => {
            let key = game_key(league, game.date, game.home_id);
            conn.execute(
                "INSERT INTO games(league_id, game_key, season, game_date, home_id, away_id, venue, home_score, away_score, finished)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(game_key) DO NOTHING",
                params![
                    league,
                    key,
                    game.season,
                    game.date.to_string(),
                    game.home_id.get(),
                    game.away_id.get(),
                    game.venue,
                    game.home_score,
                    game.away_score,
                    game.finished as i64
                ],
            )
            .context("insert game")?;
            let id = conn
                .query_row(
                    "SELECT game_id FROM games WHERE game_key = ?1",
                    params![key],
                    |row| row.get::<_, i64>(0),
                )
                .context("read game id")?;
            Ok(CanonicalId(id))
        }
    }
}

/// Fill game fields a later provider knows and the stored row lacks. Never
/// overwrites a value that is already present.
pub fn enrich_game(conn: &Connection, id: CanonicalId, game: &GameAttributes) -> Result<()> {
    conn.execute(
        "UPDATE games SET
            venue = COALESCE(venue, ?2),
            home_score = COALESCE(home_score, ?3),
            away_score = COALESCE(away_score, ?4),
            finished = MAX(finished, ?5)
         WHERE game_id = ?1",
        params![
            id.get(),
            game.venue,
            game.home_score,
            game.away_score,
            game.finished as i64
        ],
    )
    .context("enrich game")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{open_in_memory, with_unit_of_work};

    fn team(name: &str) -> EntityAttributes {
        EntityAttributes::Team {
            display_name: name.to_string(),
            abbreviation: None,
        }
    }

    #[test]
    fn game_key_pads_home_id() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        assert_eq!(game_key("nba", date, CanonicalId(7)), "nba_20250109_0007");
    }

    #[test]
    fn not_found_sentinel() {
        assert_eq!(CanonicalId::or_not_found(None), -1);
        assert_eq!(CanonicalId::or_not_found(Some(CanonicalId(3))), 3);
    }

    #[test]
    fn similarity_ignores_case_and_punctuation() {
        assert_eq!(similarity("St. John's", "st johns"), 1.0);
        assert!(similarity("Boston Celtics", "Boston Celtic") > 0.9);
        assert!(similarity("Boston Celtics", "Denver Nuggets") < 0.7);
    }

    #[test]
    fn ties_go_to_the_first_candidate() {
        let mut index = NameIndex::new("yahoo");
        index.push("a", "Jon Smith", None);
        index.push("b", "Jon Smith", None);
        assert_eq!(index.best_match("Jon Smith", None, 0.7), Some(0));
    }

    #[test]
    fn differing_birthdates_reject_a_match() {
        let born = |y| NaiveDate::from_ymd_opt(y, 5, 1);
        let mut index = NameIndex::new("yahoo");
        index.push("a", "Jalen Williams", born(2001));
        index.push("b", "Jalen Williams", born(1997));
        assert_eq!(index.best_match("Jalen Williams", born(1997), 0.7), Some(1));
        assert_eq!(index.best_match("Jalen Williams", None, 0.7), Some(0));
    }

    #[test]
    fn below_threshold_is_no_match() {
        let mut index = NameIndex::new("yahoo");
        index.push("a", "Utah Jazz", None);
        assert_eq!(index.best_match("Miami Heat", None, 0.7), None);
    }

    #[test]
    fn claimed_candidates_are_gone() {
        let mut index = NameIndex::new("yahoo");
        index.push("a", "Utah Jazz", None);
        assert!(index.claim(0).is_some());
        assert!(index.is_empty());
        assert!(index.claim(0).is_none());
    }

    #[test]
    fn mismatched_entity_type_is_an_error() {
        let mut conn = open_in_memory().unwrap();
        let key = MappingKey::new("espn", "nba", EntityType::Player, "1");
        let res = with_unit_of_work(&mut conn, |uow| {
            resolve_or_create(uow, &key, &team("Utah Jazz"), None, 0.7)
        });
        assert!(res.is_err());
    }

    #[test]
    fn enrich_only_fills_gaps() {
        let mut conn = open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        let game = GameAttributes {
            date,
            season: "2024-25".into(),
            home_id: CanonicalId(1),
            away_id: CanonicalId(2),
            venue: None,
            home_score: Some(100),
            away_score: Some(90),
            finished: true,
        };
        let key = MappingKey::new("espn", "nba", EntityType::Game, "401");
        let id = with_unit_of_work(&mut conn, |uow| {
            resolve_or_create(uow, &key, &EntityAttributes::Game(game.clone()), None, 0.7)
        })
        .unwrap()
        .unwrap();
        let later = GameAttributes {
            venue: Some("Delta Center".into()),
            home_score: Some(1),
            ..game
        };
        enrich_game(&conn, id, &later).unwrap();
        let (venue, home): (Option<String>, i64) = conn
            .query_row(
                "SELECT venue, home_score FROM games WHERE game_id = ?1",
                params![id.get()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(venue.as_deref(), Some("Delta Center"));
        assert_eq!(home, 100);
    }
}

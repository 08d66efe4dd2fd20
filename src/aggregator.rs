//! Rolling-window ranking snapshots.
//!
//! A rebuild reads every finished-game sample for a league, slices it by
//! window, split and sample group, evaluates each registered formula per
//! entity, and replaces the league's `league_metrics` rows in one unit of
//! work.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rayon::prelude::*;
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use crate::config::LeagueConfig;
use crate::error::SignalError;
use crate::formula::{Counters, FormulaContext, SampleRow};
use crate::sports::SampleGroup;
use crate::stats::{self, Distribution};
use crate::store::{UnitOfWork, with_unit_of_work};
use crate::timeframe::{Role, Split, TimeWindow};

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub game_id: i64,
    pub game_date: NaiveDate,
    pub group: String,
    pub entity_id: i64,
    pub role: Role,
    pub counters: Counters,
    pub opp_counters: Option<Counters>,
}

impl SampleRecord {
    fn as_row(&self) -> SampleRow<'_> {
        SampleRow {
            own: &self.counters,
            opp: self.opp_counters.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub entity_type: String,
    pub timeframe: TimeWindow,
    pub split: Split,
    pub metric_name: String,
    pub is_max: bool,
    pub dist: Distribution,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub samples: usize,
    pub rows: usize,
    pub undefined_cells: usize,
}

/// Load finished-game samples, pairing team-group lines with the opponent's
/// line from the same game.
pub fn load_samples(conn: &Connection, league: &LeagueConfig) -> Result<Vec<SampleRecord>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT s.game_id, g.game_date, s.sample_group, s.entity_id, s.team_id, s.opp_id,
                   g.home_id, s.counters_json
            FROM metric_samples s
            JOIN games g ON g.game_id = s.game_id
            WHERE s.league_id = ?1 AND g.finished = 1
            ORDER BY g.game_date ASC, s.game_id ASC, s.sample_id ASC
            "#,
        )
        .context("prepare load samples query")?;

    struct Raw {
        game_id: i64,
        game_date: String,
        group: String,
        entity_id: i64,
        team_id: i64,
        opp_id: i64,
        home_id: i64,
        counters_json: String,
    }

    let rows = stmt
        .query_map(params![league.league_id], |row| {
            Ok(Raw {
                game_id: row.get(0)?,
                game_date: row.get(1)?,
                group: row.get(2)?,
                entity_id: row.get(3)?,
                team_id: row.get(4)?,
                opp_id: row.get(5)?,
                home_id: row.get(6)?,
                counters_json: row.get(7)?,
            })
        })
        .context("query load samples")?;

    let profile = league.profile();
    let mut decoded = Vec::new();
    for row in rows {
        let raw = row.context("decode sample row")?;
        let Ok(game_date) = NaiveDate::parse_from_str(&raw.game_date, "%Y-%m-%d") else {
            warn!(game = raw.game_id, date = %raw.game_date, "sample with unparseable game date skipped");
            continue;
        };
        let counters: Counters = match serde_json::from_str(&raw.counters_json) {
            Ok(c) => c,
            Err(err) => {
                warn!(game = raw.game_id, entity = raw.entity_id, "sample counters unreadable: {err}");
                continue;
            }
        };
        let role = if raw.team_id == raw.home_id {
            Role::Home
        } else {
            Role::Away
        };
        decoded.push((raw.opp_id, SampleRecord {
            game_id: raw.game_id,
            game_date,
            group: raw.group,
            entity_id: raw.entity_id,
            role,
            counters,
            opp_counters: None,
        }));
    }

    let paired: HashMap<(i64, &str, i64), usize> = decoded
        .iter()
        .enumerate()
        .filter(|(_, (_, r))| profile.group(&r.group).is_some_and(|g| g.paired))
        .map(|(idx, (_, r))| ((r.game_id, r.group.as_str(), r.entity_id), idx))
        .collect();
    let opp_lookup = decoded
        .iter()
        .map(|(opp_id, r)| {
            paired
                .get(&(r.game_id, r.group.as_str(), *opp_id))
                .copied()
        })
        .collect::<Vec<_>>();
    let opp_counters = opp_lookup
        .iter()
        .map(|idx| idx.map(|i| decoded[i].1.counters.clone()))
        .collect::<Vec<_>>();

    Ok(decoded
        .into_iter()
        .zip(opp_counters)
        .map(|((_, mut record), opp)| {
            record.opp_counters = opp;
            record
        })
        .collect())
}

/// Entities whose sample count reaches `ratio` of the group's maximum.
pub fn eligible_entities(counts: &BTreeMap<i64, f64>, ratio: f64) -> Vec<i64> {
    let max = counts.values().copied().fold(0.0_f64, f64::max);
    let cutoff = ratio * max;
    counts
        .iter()
        .filter(|(_, c)| **c >= cutoff)
        .map(|(id, _)| *id)
        .collect()
}

/// The minimum-sample filter as applied to a group: when the cutoff would
/// leave `min_entities` or fewer, the whole group is kept.
pub fn apply_min_sample_filter(
    counts: &BTreeMap<i64, f64>,
    ratio: f64,
    min_entities: usize,
) -> Vec<i64> {
    let kept = eligible_entities(counts, ratio);
    if kept.len() <= min_entities {
        counts.keys().copied().collect()
    } else {
        kept
    }
}

/// Per-entity formula values for one slice. A formula that is undefined for
/// an entity is absent from that entity's map, never stored as zero.
pub fn entity_metric_values(
    league: &LeagueConfig,
    group: &SampleGroup,
    samples: &[SampleRecord],
    window: TimeWindow,
    split: Split,
    run_date: NaiveDate,
) -> (BTreeMap<i64, BTreeMap<String, f64>>, Vec<SignalError>) {
    let mut by_entity: BTreeMap<i64, Vec<&SampleRecord>> = BTreeMap::new();
    for s in samples {
        if s.group == group.name
            && split.admits(s.role)
            && window.contains(s.game_date, run_date, league.season_start)
        {
            by_entity.entry(s.entity_id).or_default().push(s);
        }
    }

    let counts: BTreeMap<i64, f64> = by_entity
        .iter()
        .map(|(id, rows)| {
            let weight = match &group.sample_weight {
                Some(terms) => rows.iter().filter_map(|r| terms.eval(&r.as_row())).sum::<f64>(),
                None => rows.len() as f64,
            };
            (*id, weight)
        })
        .collect();
    let kept = apply_min_sample_filter(&counts, league.min_sample_ratio, league.min_filtered_entities);

    let ctx = FormulaContext {
        game_minutes: league.game_minutes(),
    };
    let mut values = BTreeMap::new();
    let mut undefined = Vec::new();
    for entity_id in kept {
        let Some(records) = by_entity.get(&entity_id) else {
            continue;
        };
        let rows = records.iter().map(|r| r.as_row()).collect::<Vec<_>>();
        let mut out = BTreeMap::new();
        for metric in &group.metrics {
            match metric.evaluate(entity_id, &rows, &ctx) {
                Ok(v) => {
                    out.insert(metric.name.clone(), v);
                }
                Err(err) => undefined.push(err),
            }
        }
        values.insert(entity_id, out);
    }
    (values, undefined)
}

/// Every snapshot row for the league, plus the number of undefined cells.
pub fn compute_snapshot(
    league: &LeagueConfig,
    samples: &[SampleRecord],
    run_date: NaiveDate,
) -> (Vec<SnapshotRow>, usize) {
    let groups = &league.profile().groups;
    let slices = TimeWindow::ALL
        .into_iter()
        .flat_map(|w| Split::ALL.into_iter().map(move |s| (w, s)))
        .flat_map(|(w, s)| groups.iter().map(move |g| (w, s, g)))
        .collect::<Vec<_>>();

    let results: Vec<(Vec<SnapshotRow>, usize)> = slices
        .par_iter()
        .map(|(window, split, group)| {
            let (values, undefined) =
                entity_metric_values(league, group, samples, *window, *split, run_date);
            for err in &undefined {
                debug!(league = %league.league_id, window = window.label(), split = split.label(), "{err}");
            }
            let mut rows = Vec::new();
            for metric in &group.metrics {
                let column = values
                    .values()
                    .filter_map(|m| m.get(&metric.name).copied())
                    .collect::<Vec<_>>();
                let Some(dist) = stats::distribution(&column, metric.is_max) else {
                    continue;
                };
                rows.push(SnapshotRow {
                    entity_type: group.name.to_string(),
                    timeframe: *window,
                    split: *split,
                    metric_name: metric.name.clone(),
                    is_max: metric.is_max,
                    dist,
                });
            }
            (rows, undefined.len())
        })
        .collect();

    let mut rows = Vec::new();
    let mut undefined = 0usize;
    for (slice_rows, slice_undefined) in results {
        rows.extend(slice_rows);
        undefined += slice_undefined;
    }
    (rows, undefined)
}

/// Delete the league's snapshot and write `rows` in its place. Any failure
/// propagates and the caller's unit of work rolls the delete back.
pub fn replace_snapshot(
    uow: &mut UnitOfWork<'_>,
    league_id: &str,
    rows: &[SnapshotRow],
    reference_date: NaiveDate,
) -> Result<()> {
    uow.execute(
        "DELETE FROM league_metrics WHERE league_id = ?1",
        params![league_id],
    )
    .context("clear league snapshot")?;
    let mut stmt = uow
        .prepare_cached(
            r#"
            INSERT INTO league_metrics (
                league_id, entity_type, timeframe, split, metric_name, is_max,
                best_value, worst_value, q1, q2, q4, q6, q8, q9,
                entity_count, reference_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .context("prepare snapshot insert")?;
    let reference = reference_date.to_string();
    for row in rows {
        let d = &row.dist;
        stmt.execute(params![
            league_id,
            row.entity_type,
            row.timeframe.label(),
            row.split.label(),
            row.metric_name,
            row.is_max as i64,
            d.best,
            d.worst,
            d.q1,
            d.q2,
            d.q4,
            d.q6,
            d.q8,
            d.q9,
            d.count as i64,
            reference
        ])
        .with_context(|| {
            format!(
                "insert snapshot row {}/{}/{}/{}",
                row.entity_type,
                row.timeframe.label(),
                row.split.label(),
                row.metric_name
            )
        })?;
    }
    Ok(())
}

pub fn rebuild_league_metrics(
    conn: &mut Connection,
    league: &LeagueConfig,
    run_date: NaiveDate,
) -> Result<RebuildSummary> {
    let samples = load_samples(conn, league)?;
    let (rows, undefined_cells) = compute_snapshot(league, &samples, run_date);
    with_unit_of_work(conn, |uow| {
        replace_snapshot(uow, &league.league_id, &rows, run_date)
    })
    .with_context(|| format!("replace snapshot for {}", league.league_id))?;

    let summary = RebuildSummary {
        samples: samples.len(),
        rows: rows.len(),
        undefined_cells,
    };
    info!(
        league = %league.league_id,
        samples = summary.samples,
        rows = summary.rows,
        undefined = summary.undefined_cells,
        "league snapshot rebuilt"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(i64, f64)]) -> BTreeMap<i64, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn cutoff_is_sixty_percent_of_max() {
        let c = counts(&[(1, 10.0), (2, 7.0), (3, 6.0), (4, 5.0), (5, 4.0)]);
        assert_eq!(eligible_entities(&c, 0.6), vec![1, 2, 3]);
    }

    #[test]
    fn thin_groups_fall_back_to_everyone() {
        let c = counts(&[(1, 10.0), (2, 7.0), (3, 6.0), (4, 5.0), (5, 4.0)]);
        assert_eq!(apply_min_sample_filter(&c, 0.6, 5), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn deep_groups_apply_the_cutoff() {
        let c = (1..=10).map(|id| (id, if id <= 7 { 10.0 } else { 2.0 })).collect();
        assert_eq!(apply_min_sample_filter(&c, 0.6, 5), (1..=7).collect::<Vec<_>>());
    }
}

use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::aggregator::{self, RebuildSummary};
use crate::config::LeagueConfig;
use crate::ingest::{IngestOutcome, ingest_event};
use crate::rankings;
use crate::schedule::{self, Schedule};
use crate::source::EventSource;
use crate::store::{self, with_unit_of_work};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSummary {
    pub league_id: String,
    pub inactive: bool,
    pub units_pending: usize,
    pub units_processed: usize,
    pub events_ingested: usize,
    pub events_not_final: usize,
    pub events_failed: usize,
    pub samples_written: usize,
    pub unresolved: usize,
    /// Unit whose primary data was missing; it and everything after it wait
    /// for the next run.
    pub stopped_at: Option<String>,
    pub last_update: Option<NaiveDate>,
    pub rebuilt: Option<RebuildSummary>,
}

/// Checkpointed catch-up for one league: ingest every pending unit in order,
/// then rebuild the ranking snapshot.
pub struct LeagueUpdater<'a, S: EventSource + ?Sized> {
    league: &'a LeagueConfig,
    source: &'a S,
    force_rebuild: bool,
}

impl<'a, S: EventSource + ?Sized> LeagueUpdater<'a, S> {
    pub fn new(league: &'a LeagueConfig, source: &'a S) -> Self {
        Self {
            league,
            source,
            force_rebuild: false,
        }
    }

    pub fn force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    pub fn update(&self, conn: &mut Connection, today: NaiveDate) -> Result<UpdateSummary> {
        let league = self.league;
        let mut summary = UpdateSummary {
            league_id: league.league_id.clone(),
            ..UpdateSummary::default()
        };

        let schedule = Schedule::new(league);
        if !schedule.is_active(today) {
            info!(league = %league.league_id, %today, "league out of season; skipping");
            summary.inactive = true;
            return Ok(summary);
        }

        schedule::ensure_league(conn, league)?;
        let last_update = schedule::load_checkpoint(conn, &league.league_id)?;
        let units = schedule.pending_units(last_update, today);
        summary.units_pending = units.len();
        summary.last_update = last_update;

        for unit in &units {
            let label = unit.label();
            let bundles = match self.source.events(league, unit) {
                Ok(bundles) => bundles,
                Err(err) => {
                    warn!(league = %league.league_id, unit = %label, "event source failed: {err:#}");
                    summary.stopped_at = Some(label);
                    break;
                }
            };

            let mut primary_missing = false;
            for bundle in &bundles {
                let outcome = with_unit_of_work(conn, |uow| ingest_event(uow, league, bundle));
                match outcome {
                    Ok(IngestOutcome::Ingested { stats, .. }) => {
                        summary.events_ingested += 1;
                        summary.samples_written += stats.samples_written;
                        summary.unresolved += stats.unresolved;
                    }
                    Ok(IngestOutcome::NotFinal) => summary.events_not_final += 1,
                    Ok(IngestOutcome::MissingPrimary(err)) => {
                        warn!(league = %league.league_id, unit = %label, "{err}");
                        primary_missing = true;
                    }
                    Ok(IngestOutcome::Unresolved(err)) => {
                        warn!(league = %league.league_id, event = %bundle.event, "{err}");
                        summary.events_failed += 1;
                    }
                    Err(err) => {
                        warn!(league = %league.league_id, event = %bundle.event, "ingest failed: {err:#}");
                        summary.events_failed += 1;
                    }
                }
            }

            if primary_missing {
                summary.stopped_at = Some(label);
                break;
            }
            schedule::mark_processed(conn, league, unit)?;
            summary.units_processed += 1;
            summary.last_update = Some(unit.mark());
        }

        let needs_rebuild = self.force_rebuild
            || summary.units_processed > 0
            || !rankings::snapshot_exists(conn, &league.league_id)?;
        if needs_rebuild {
            summary.rebuilt = Some(aggregator::rebuild_league_metrics(conn, league, today)?);
        }

        info!(
            league = %league.league_id,
            pending = summary.units_pending,
            processed = summary.units_processed,
            ingested = summary.events_ingested,
            failed = summary.events_failed,
            stopped_at = summary.stopped_at.as_deref().unwrap_or("-"),
            "league update finished"
        );
        Ok(summary)
    }
}

/// Update several leagues concurrently, each on its own connection. One
/// league's failure never stops the others.
pub fn run_leagues<S: EventSource + ?Sized>(
    db_path: &Path,
    leagues: &[LeagueConfig],
    source: &S,
    today: NaiveDate,
    threads: usize,
    force_rebuild: bool,
) -> Vec<(String, Result<UpdateSummary>)> {
    with_pool(threads, || {
        leagues
            .par_iter()
            .map(|league| {
                let result = store::open_db(db_path).and_then(|mut conn| {
                    LeagueUpdater::new(league, source)
                        .force_rebuild(force_rebuild)
                        .update(&mut conn, today)
                });
                if let Err(err) = &result {
                    warn!(league = %league.league_id, "league update failed: {err:#}");
                }
                (league.league_id.clone(), result)
            })
            .collect()
    })
}

fn with_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build() {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

/// Collapse per-league results into one error listing every failed league.
pub fn ensure_all_ok(results: &[(String, Result<UpdateSummary>)]) -> Result<()> {
    let failed = results
        .iter()
        .filter(|(_, r)| r.is_err())
        .map(|(id, _)| id.as_str())
        .collect::<Vec<_>>();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("league updates failed: {}", failed.join(", ")))
    }
}

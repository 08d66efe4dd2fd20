use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate, Timelike};

use league_signals::config::AppConfig;
use league_signals::logging;
use league_signals::source::JsonDirSource;
use league_signals::updater;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init();

    let mut config = AppConfig::from_env()?;
    if let Some(path) = arg_value("--db") {
        config.db_path = PathBuf::from(path);
    }
    if let Some(dir) = arg_value("--events-dir") {
        config.events_dir = PathBuf::from(dir);
    }
    if has_flag("--force") {
        config.force_rebuild = true;
    }
    if let Some(raw) = arg_value("--leagues") {
        let wanted = parse_league_ids(&raw);
        config
            .leagues
            .retain(|l| wanted.contains(l.league_id.to_ascii_lowercase().as_str()));
        if config.leagues.is_empty() {
            return Err(anyhow!("no configured league matches --leagues={raw}"));
        }
    }
    let today = match arg_value("--date") {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .with_context(|| format!("--date must be YYYY-MM-DD, got {raw:?}"))?,
        None => Local::now().date_naive(),
    };

    if let Some(hours) = config.active_hours {
        let hour = Local::now().hour();
        if !hours.contains(hour) && !has_flag("--force") {
            println!(
                "Outside active hours {}-{} (now {hour}); nothing to do",
                hours.start, hours.end
            );
            return Ok(());
        }
    }

    let source = JsonDirSource::new(&config.events_dir);
    let results = updater::run_leagues(
        &config.db_path,
        &config.leagues,
        &source,
        today,
        config.threads,
        config.force_rebuild,
    );

    println!("League update complete");
    println!("DB: {}", config.db_path.display());
    println!("Date: {today}");
    for (league_id, result) in &results {
        match result {
            Ok(s) if s.inactive => println!("league {league_id}: out of season"),
            Ok(s) => {
                println!(
                    "league {}: units {}/{} events={} not_final={} failed={} samples={} unresolved={} last_update={}",
                    league_id,
                    s.units_processed,
                    s.units_pending,
                    s.events_ingested,
                    s.events_not_final,
                    s.events_failed,
                    s.samples_written,
                    s.unresolved,
                    s.last_update
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "n/a".to_string())
                );
                if let Some(unit) = &s.stopped_at {
                    println!("  stopped at {unit}: primary data missing, will retry next run");
                }
                if let Some(r) = &s.rebuilt {
                    println!(
                        "  snapshot: rows={} samples={} undefined_cells={}",
                        r.rows, r.samples, r.undefined_cells
                    );
                }
            }
            Err(err) => println!("league {league_id}: failed: {err:#}"),
        }
    }

    updater::ensure_all_ok(&results)
}

fn arg_value(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
            && !next.starts_with("--")
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|a| a == name)
}

fn parse_league_ids(raw: &str) -> HashSet<String> {
    raw.split([',', ';', ' '])
        .map(|part| part.trim().to_ascii_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

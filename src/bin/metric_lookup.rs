use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use league_signals::logging;
use league_signals::rankings::{self, LeagueMetric};
use league_signals::store;
use league_signals::timeframe::{Split, TimeWindow};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init();

    let db_path = arg_value("--db")
        .map(PathBuf::from)
        .or_else(|| std::env::var("SIGNALS_DB").ok().map(PathBuf::from))
        .or_else(store::default_db_path)
        .ok_or_else(|| anyhow!("no database path; pass --db"))?;
    let league = arg_value("--league").ok_or_else(|| anyhow!("--league is required"))?;
    let timeframe = match arg_value("--timeframe") {
        Some(raw) => TimeWindow::parse(&raw).ok_or_else(|| anyhow!("unknown timeframe {raw:?}"))?,
        None => TimeWindow::Season,
    };
    let split = match arg_value("--split") {
        Some(raw) => Split::parse(&raw).ok_or_else(|| anyhow!("unknown split {raw:?}"))?,
        None => Split::All,
    };
    let entity_type = arg_value("--entity-type").unwrap_or_else(|| "team".to_string());
    let value = match arg_value("--value") {
        Some(raw) => Some(
            raw.parse::<f64>()
                .with_context(|| format!("--value must be a number, got {raw:?}"))?,
        ),
        None => None,
    };

    let conn = store::open_db(&db_path)?;
    let Some(metric_name) = arg_value("--metric") else {
        let rows = rankings::list(&conn, &league, timeframe, split, &entity_type)?;
        if rows.is_empty() {
            println!("n/a");
            return Ok(());
        }
        for row in &rows {
            print_metric(row);
        }
        return Ok(());
    };

    let metric = rankings::get(&conn, &league, timeframe, split, &entity_type, &metric_name)?;
    match &metric {
        Some(m) => print_metric(m),
        None => println!(
            "{league} {} {} {entity_type} {metric_name}: n/a",
            timeframe.label(),
            split.label()
        ),
    }
    if let Some(v) = value {
        let graded = rankings::grade(Some(v), metric.as_ref());
        match graded.score {
            Some(score) => println!(
                "value {v:.3}: {} ({}) bar {score:.2}",
                graded.grade,
                graded.grade.color()
            ),
            None => println!("value {v:.3}: {}", graded.grade),
        }
    }
    Ok(())
}

fn print_metric(m: &LeagueMetric) {
    println!(
        "{} {} {} {} {}: best={:.3} worst={:.3} q1={:.3} q2={:.3} q4={:.3} q6={:.3} q8={:.3} q9={:.3} n={} ({}) as_of={}",
        m.league_id,
        m.timeframe,
        m.split,
        m.entity_type,
        m.metric_name,
        m.best_value,
        m.worst_value,
        m.q1,
        m.q2,
        m.q4,
        m.q6,
        m.q8,
        m.q9,
        m.entity_count,
        if m.is_max { "higher is better" } else { "lower is better" },
        m.reference_date
    );
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

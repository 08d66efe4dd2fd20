use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::warn;

use league_signals::logging;
use league_signals::odds::{
    self, MoneylineProbs, calculate_kelly_criterion, calculate_moneyline_probs,
};

const DEFAULT_UNIT_SIZE: f64 = 100.0;

#[derive(Debug, Deserialize)]
struct Matchup {
    #[serde(default)]
    label: Option<String>,
    away: String,
    home: String,
    away_odds: i32,
    home_odds: i32,
    /// Externally estimated win probabilities, in [0, 1] or percent.
    #[serde(default)]
    away_win_prob: Option<f64>,
    #[serde(default)]
    home_win_prob: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatchupFile {
    Many(Vec<Matchup>),
    One(Matchup),
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init();

    let unit_size = match arg_value("--unit") {
        Some(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("--unit must be a number, got {raw:?}"))?,
        None => DEFAULT_UNIT_SIZE,
    };
    let edge = match arg_value("--edge") {
        Some(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("--edge must be a number, got {raw:?}"))?,
        None => 0.0,
    };

    let paths = input_paths();
    if paths.is_empty() {
        return Err(anyhow!(
            "usage: odds_board [--unit=100] [--edge=0.0] <matchups.json>..."
        ));
    }

    let mut matchups = Vec::new();
    for path in &paths {
        let raw =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let parsed: MatchupFile = serde_json::from_str(&raw)
            .with_context(|| format!("parse matchups in {}", path.display()))?;
        match parsed {
            MatchupFile::Many(list) => matchups.extend(list),
            MatchupFile::One(one) => matchups.push(one),
        }
    }

    println!("Odds board ({} matchups, unit {unit_size:.2}, edge {edge:.3})", matchups.len());
    for m in &matchups {
        let title = m
            .label
            .clone()
            .unwrap_or_else(|| format!("{} @ {}", m.away, m.home));
        let Some(probs) = calculate_moneyline_probs(m.away_odds, m.home_odds) else {
            warn!(matchup = %title, away = m.away_odds, home = m.home_odds, "invalid moneyline");
            println!("{title}: invalid moneyline {}/{}", m.away_odds, m.home_odds);
            continue;
        };
        println!("{title}: vig {:.2}%", probs.vig * 100.0);
        print_side(&m.away, m.away_odds, m.away_win_prob, &probs, true, edge, unit_size);
        print_side(&m.home, m.home_odds, m.home_win_prob, &probs, false, edge, unit_size);
    }
    Ok(())
}

fn print_side(
    team: &str,
    price: i32,
    estimate: Option<f64>,
    probs: &MoneylineProbs,
    away: bool,
    edge: f64,
    unit_size: f64,
) {
    let side = if away { probs.away } else { probs.home };
    let base = format!(
        "  {team:<24} {price:>+6} implied {:>5.1}% true {:>5.1}%",
        side.implied_prob * 100.0,
        side.true_prob * 100.0
    );
    let Some(p) = estimate.map(normalize_prob) else {
        println!("{base} est n/a");
        return;
    };
    let stake = calculate_kelly_criterion(p, price, edge);
    let winnings = odds::calculate_winnings(stake, price, unit_size);
    if stake > 0.0 {
        println!(
            "{base} est {:>5.1}% kelly {:>5.2}% win {winnings:.2}",
            p * 100.0,
            stake * 100.0
        );
    } else {
        println!("{base} est {:>5.1}% no bet", p * 100.0);
    }
}

fn normalize_prob(raw: f64) -> f64 {
    if raw > 1.0 { raw / 100.0 } else { raw }
}

fn input_paths() -> Vec<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--unit" || arg == "--edge" {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        out.push(PathBuf::from(arg));
    }
    out
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

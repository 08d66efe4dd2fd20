//! Moneyline conversion and Kelly stake sizing.
//!
//! All prices are American odds. Values strictly between -100 and +100 are not
//! valid American prices and are treated as "no line".

use serde::Serialize;

// Anything at or below this is a zero-edge bet once float noise is removed.
const KELLY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SideProbs {
    /// Raw implied probability, bookmaker margin included.
    pub implied_prob: f64,
    /// Implied probability with the margin normalized out.
    pub true_prob: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoneylineProbs {
    pub away: SideProbs,
    pub home: SideProbs,
    pub vig: f64,
}

pub fn is_valid_american(odds: i32) -> bool {
    odds >= 100 || odds <= -100
}

/// Raw implied probability of an American price.
pub fn moneyline_to_implied(odds: i32) -> Option<f64> {
    if odds >= 100 {
        Some(100.0 / (odds as f64 + 100.0))
    } else if odds <= -100 {
        let fav = -(odds as f64);
        Some(fav / (fav + 100.0))
    } else {
        None
    }
}

/// Net profit per unit staked (the `b` in the Kelly formula).
pub fn net_decimal_payout(odds: i32) -> Option<f64> {
    if odds >= 100 {
        Some(odds as f64 / 100.0)
    } else if odds <= -100 {
        Some(100.0 / -(odds as f64))
    } else {
        None
    }
}

/// Breakeven win probability for a price. Same number as the raw implied
/// probability; named separately because callers use it as a threshold.
pub fn breakeven_prob(odds: i32) -> Option<f64> {
    moneyline_to_implied(odds)
}

pub fn calculate_moneyline_probs(away_odds: i32, home_odds: i32) -> Option<MoneylineProbs> {
    let away = moneyline_to_implied(away_odds)?;
    let home = moneyline_to_implied(home_odds)?;
    let sum = away + home;
    if sum <= 0.0 {
        return None;
    }
    Some(MoneylineProbs {
        away: SideProbs {
            implied_prob: away,
            true_prob: away / sum,
        },
        home: SideProbs {
            implied_prob: home,
            true_prob: home / sum,
        },
        vig: sum - 1.0,
    })
}

/// Fraction of bankroll to stake.
///
/// `edge` is a safety margin subtracted from the full-Kelly fraction. The
/// result is never negative: no edge, a bad price or a probability outside
/// [0, 1] all mean "no bet".
pub fn calculate_kelly_criterion(true_prob: f64, odds: i32, edge: f64) -> f64 {
    if !true_prob.is_finite() || !(0.0..=1.0).contains(&true_prob) {
        return 0.0;
    }
    let Some(b) = net_decimal_payout(odds) else {
        return 0.0;
    };
    let full = ((b + 1.0) * true_prob - 1.0) / b;
    let adjusted = full - edge.max(0.0);
    if !adjusted.is_finite() || adjusted <= KELLY_EPSILON {
        0.0
    } else {
        adjusted
    }
}

/// Net winnings if a stake of `stake_fraction` units of `unit_size` wins.
pub fn calculate_winnings(stake_fraction: f64, odds: i32, unit_size: f64) -> f64 {
    if stake_fraction <= 0.0 || unit_size <= 0.0 {
        return 0.0;
    }
    match net_decimal_payout(odds) {
        Some(b) => stake_fraction * unit_size * b,
        None => 0.0,
    }
}

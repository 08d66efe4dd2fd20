//! Metric formulas as data.
//!
//! A formula is an [`Aggregation`] over per-game sample rows. Operands are
//! [`Terms`]: linear combinations of counter fields read either from the
//! entity's own line or from the opponent's line in the same game, so derived
//! counters like two-point attempts (`fga - fg3a`) never need code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::stats;

pub type Counters = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Own,
    Opp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub coef: f64,
    pub side: Side,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Terms(pub Vec<Term>);

impl Terms {
    pub fn own(field: &str) -> Self {
        Terms(Vec::new()).with(1.0, Side::Own, field)
    }

    pub fn opp(field: &str) -> Self {
        Terms(Vec::new()).with(1.0, Side::Opp, field)
    }

    pub fn with(mut self, coef: f64, side: Side, field: &str) -> Self {
        self.0.push(Term {
            coef,
            side,
            field: field.to_string(),
        });
        self
    }

    pub fn plus(self, field: &str) -> Self {
        self.with(1.0, Side::Own, field)
    }

    pub fn minus(self, field: &str) -> Self {
        self.with(-1.0, Side::Own, field)
    }

    pub fn plus_opp(self, field: &str) -> Self {
        self.with(1.0, Side::Opp, field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Term> {
        self.0.iter()
    }

    /// `None` when any referenced field is missing from the row, so a game
    /// without the counter drops out instead of counting as zero.
    pub fn eval(&self, row: &SampleRow<'_>) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        let mut total = 0.0;
        for term in &self.0 {
            let source = match term.side {
                Side::Own => Some(row.own),
                Side::Opp => row.opp,
            }?;
            total += term.coef * source.get(&term.field).copied()?;
        }
        Some(total)
    }
}

/// `Σnum / Σden × scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioSpec {
    pub num: Terms,
    pub den: Terms,
    #[serde(default = "one")]
    pub scale: f64,
}

fn one() -> f64 {
    1.0
}

impl RatioSpec {
    pub fn new(num: Terms, den: Terms, scale: f64) -> Self {
        Self { num, den, scale }
    }

    fn pooled(&self, rows: &[SampleRow<'_>]) -> Option<f64> {
        let mut num = 0.0;
        let mut den = 0.0;
        let mut seen = false;
        for row in rows {
            if let (Some(n), Some(d)) = (self.num.eval(row), self.den.eval(row)) {
                num += n;
                den += d;
                seen = true;
            }
        }
        checked_div(seen, num, den).map(|v| v * self.scale)
    }

    fn per_game(&self, row: &SampleRow<'_>) -> Option<f64> {
        let n = self.num.eval(row)?;
        let d = self.den.eval(row)?;
        checked_div(true, n, d).map(|v| v * self.scale)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum(Terms),
    Mean(Terms),
    Median(Terms),
    Ratio(RatioSpec),
    /// `Σpart / (Σpart + Σother) × 100`
    ShareOfSum { part: Terms, other: Terms },
    /// `Σstat / (Σminutes / game_minutes)`: a per-full-game rate.
    MinuteRate { stat: Terms, minutes: Terms },
    /// Mean per-game offensive efficiency minus mean per-game defensive one.
    EfficiencyDiff { off: RatioSpec, def: RatioSpec },
    /// Pooled ratio minus pooled ratio.
    RatioDiff { left: RatioSpec, right: RatioSpec },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFormula {
    pub name: String,
    pub label: String,
    pub is_max: bool,
    pub aggregation: Aggregation,
}

impl MetricFormula {
    pub fn new(name: &str, label: &str, is_max: bool, aggregation: Aggregation) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            is_max,
            aggregation,
        }
    }

    pub fn evaluate(
        &self,
        entity_id: i64,
        rows: &[SampleRow<'_>],
        ctx: &FormulaContext,
    ) -> Result<f64, SignalError> {
        let value = match &self.aggregation {
            Aggregation::Sum(terms) => {
                let vals = per_game(terms, rows);
                (!vals.is_empty()).then(|| vals.iter().sum::<f64>())
            }
            Aggregation::Mean(terms) => stats::mean(&per_game(terms, rows)),
            Aggregation::Median(terms) => stats::median_f64(&per_game(terms, rows)),
            Aggregation::Ratio(spec) => spec.pooled(rows),
            Aggregation::ShareOfSum { part, other } => {
                let (mut a, mut b, mut seen) = (0.0, 0.0, false);
                for row in rows {
                    if let (Some(x), Some(y)) = (part.eval(row), other.eval(row)) {
                        a += x;
                        b += y;
                        seen = true;
                    }
                }
                checked_div(seen, a, a + b).map(|v| v * 100.0)
            }
            Aggregation::MinuteRate { stat, minutes } => {
                let (mut s, mut m, mut seen) = (0.0, 0.0, false);
                for row in rows {
                    if let (Some(x), Some(y)) = (stat.eval(row), minutes.eval(row)) {
                        s += x;
                        m += y;
                        seen = true;
                    }
                }
                if ctx.game_minutes > 0.0 {
                    checked_div(seen, s, m / ctx.game_minutes)
                } else {
                    None
                }
            }
            Aggregation::EfficiencyDiff { off, def } => {
                let off_vals = rows.iter().filter_map(|r| off.per_game(r)).collect::<Vec<_>>();
                let def_vals = rows.iter().filter_map(|r| def.per_game(r)).collect::<Vec<_>>();
                match (stats::mean(&off_vals), stats::mean(&def_vals)) {
                    (Some(o), Some(d)) => Some(o - d),
                    _ => None,
                }
            }
            Aggregation::RatioDiff { left, right } => match (left.pooled(rows), right.pooled(rows)) {
                (Some(l), Some(r)) => Some(l - r),
                _ => None,
            },
        };

        value
            .filter(|v| v.is_finite())
            .ok_or_else(|| SignalError::UndefinedMetric {
                metric: self.name.clone(),
                entity_id,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaContext {
    pub game_minutes: f64,
}

/// One entity's line in one game, with the opponent's line when the sample
/// group is a team group.
#[derive(Debug, Clone, Copy)]
pub struct SampleRow<'a> {
    pub own: &'a Counters,
    pub opp: Option<&'a Counters>,
}

fn per_game(terms: &Terms, rows: &[SampleRow<'_>]) -> Vec<f64> {
    rows.iter().filter_map(|r| terms.eval(r)).collect()
}

fn checked_div(seen: bool, num: f64, den: f64) -> Option<f64> {
    if !seen || den == 0.0 || !den.is_finite() {
        None
    } else {
        Some(num / den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(pairs: &[(&str, f64)]) -> Counters {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    const CTX: FormulaContext = FormulaContext { game_minutes: 48.0 };

    #[test]
    fn derived_terms_evaluate() {
        let own = counters(&[("fga", 80.0), ("fg3a", 30.0)]);
        let row = SampleRow {
            own: &own,
            opp: None,
        };
        assert_eq!(Terms::own("fga").minus("fg3a").eval(&row), Some(50.0));
        assert_eq!(Terms::own("fta").eval(&row), None);
        assert_eq!(Terms::opp("fga").eval(&row), None);
    }

    #[test]
    fn ratio_pools_before_dividing() {
        let a = counters(&[("fgm", 1.0), ("fga", 2.0)]);
        let b = counters(&[("fgm", 9.0), ("fga", 18.0)]);
        let rows = [
            SampleRow { own: &a, opp: None },
            SampleRow { own: &b, opp: None },
        ];
        let f = MetricFormula::new(
            "fg_pct",
            "FG%",
            true,
            Aggregation::Ratio(RatioSpec::new(Terms::own("fgm"), Terms::own("fga"), 100.0)),
        );
        assert!((f.evaluate(1, &rows, &CTX).unwrap() - 50.0).abs() < 1e-12);
    }

    #[test]
    fn zero_denominator_is_undefined_not_zero() {
        let a = counters(&[("ftm", 0.0), ("fta", 0.0)]);
        let rows = [SampleRow { own: &a, opp: None }];
        let f = MetricFormula::new(
            "ft_pct",
            "FT%",
            true,
            Aggregation::Ratio(RatioSpec::new(Terms::own("ftm"), Terms::own("fta"), 100.0)),
        );
        assert!(matches!(
            f.evaluate(7, &rows, &CTX),
            Err(SignalError::UndefinedMetric { entity_id: 7, .. })
        ));
    }

    #[test]
    fn legitimate_zero_is_kept() {
        let a = counters(&[("fg3m", 0.0), ("fg3a", 4.0)]);
        let rows = [SampleRow { own: &a, opp: None }];
        let f = MetricFormula::new(
            "fg3_pct",
            "3P%",
            true,
            Aggregation::Ratio(RatioSpec::new(Terms::own("fg3m"), Terms::own("fg3a"), 100.0)),
        );
        assert_eq!(f.evaluate(1, &rows, &CTX).unwrap(), 0.0);
    }

    #[test]
    fn minute_rate_normalizes_to_full_games() {
        let a = counters(&[("pts", 12.0), ("min", 24.0)]);
        let b = counters(&[("pts", 12.0), ("min", 24.0)]);
        let rows = [
            SampleRow { own: &a, opp: None },
            SampleRow { own: &b, opp: None },
        ];
        let f = MetricFormula::new(
            "pts_per_game_min",
            "PTS/48",
            true,
            Aggregation::MinuteRate {
                stat: Terms::own("pts"),
                minutes: Terms::own("min"),
            },
        );
        assert!((f.evaluate(1, &rows, &CTX).unwrap() - 24.0).abs() < 1e-12);
    }

    #[test]
    fn share_of_sum_is_a_percentage() {
        let a = counters(&[("oreb", 10.0)]);
        let opp = counters(&[("dreb", 30.0)]);
        let rows = [SampleRow {
            own: &a,
            opp: Some(&opp),
        }];
        let f = MetricFormula::new(
            "oreb_pct",
            "OREB%",
            true,
            Aggregation::ShareOfSum {
                part: Terms::own("oreb"),
                other: Terms::opp("dreb"),
            },
        );
        assert!((f.evaluate(1, &rows, &CTX).unwrap() - 25.0).abs() < 1e-12);
    }

    #[test]
    fn efficiency_diff_averages_per_game() {
        let g1 = counters(&[("pts", 110.0), ("poss", 100.0)]);
        let g1_opp = counters(&[("pts", 100.0), ("poss", 100.0)]);
        let g2 = counters(&[("pts", 90.0), ("poss", 90.0)]);
        let g2_opp = counters(&[("pts", 99.0), ("poss", 90.0)]);
        let rows = [
            SampleRow {
                own: &g1,
                opp: Some(&g1_opp),
            },
            SampleRow {
                own: &g2,
                opp: Some(&g2_opp),
            },
        ];
        let f = MetricFormula::new(
            "net_rating",
            "NET",
            true,
            Aggregation::EfficiencyDiff {
                off: RatioSpec::new(Terms::own("pts"), Terms::own("poss"), 100.0),
                def: RatioSpec::new(Terms::opp("pts"), Terms::opp("poss"), 100.0),
            },
        );
        // off mean = (110 + 100) / 2 = 105, def mean = (100 + 110) / 2 = 105
        assert!(f.evaluate(1, &rows, &CTX).unwrap().abs() < 1e-9);
    }

    #[test]
    fn formulas_deserialize_from_json() {
        let raw = r#"{
            "name": "tov_rate",
            "label": "TOV%",
            "is_max": false,
            "aggregation": {"ratio": {
                "num": [{"coef": 1.0, "side": "own", "field": "tov"}],
                "den": [{"coef": 1.0, "side": "own", "field": "poss"}],
                "scale": 100.0
            }}
        }"#;
        let f: MetricFormula = serde_json::from_str(raw).unwrap();
        assert!(!f.is_max);
        assert!(matches!(f.aggregation, Aggregation::Ratio(_)));
    }
}

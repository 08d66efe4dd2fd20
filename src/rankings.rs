use std::fmt;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::timeframe::{Split, TimeWindow};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeagueMetric {
    pub league_id: String,
    pub entity_type: String,
    pub timeframe: String,
    pub split: String,
    pub metric_name: String,
    pub is_max: bool,
    pub best_value: f64,
    pub worst_value: f64,
    pub q1: f64,
    pub q2: f64,
    pub q4: f64,
    pub q6: f64,
    pub q8: f64,
    pub q9: f64,
    pub entity_count: i64,
    pub reference_date: String,
}

const SELECT_COLUMNS: &str = "league_id, entity_type, timeframe, split, metric_name, is_max,
    best_value, worst_value, q1, q2, q4, q6, q8, q9, entity_count, reference_date";

fn decode_row(row: &Row<'_>) -> rusqlite::Result<LeagueMetric> {
    Ok(LeagueMetric {
        league_id: row.get(0)?,
        entity_type: row.get(1)?,
        timeframe: row.get(2)?,
        split: row.get(3)?,
        metric_name: row.get(4)?,
        is_max: row.get::<_, i64>(5)? != 0,
        best_value: row.get(6)?,
        worst_value: row.get(7)?,
        q1: row.get(8)?,
        q2: row.get(9)?,
        q4: row.get(10)?,
        q6: row.get(11)?,
        q8: row.get(12)?,
        q9: row.get(13)?,
        entity_count: row.get(14)?,
        reference_date: row.get(15)?,
    })
}

pub fn get(
    conn: &Connection,
    league_id: &str,
    timeframe: TimeWindow,
    split: Split,
    entity_type: &str,
    metric_name: &str,
) -> Result<Option<LeagueMetric>> {
    conn.query_row(
        &format!(
            "SELECT {SELECT_COLUMNS} FROM league_metrics
             WHERE league_id = ?1 AND timeframe = ?2 AND split = ?3 AND entity_type = ?4 AND metric_name = ?5"
        ),
        params![league_id, timeframe.label(), split.label(), entity_type, metric_name],
        decode_row,
    )
    .optional()
    .context("query league metric")
}

/// Every metric of one slice, sorted by name.
pub fn list(
    conn: &Connection,
    league_id: &str,
    timeframe: TimeWindow,
    split: Split,
    entity_type: &str,
) -> Result<Vec<LeagueMetric>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM league_metrics
             WHERE league_id = ?1 AND timeframe = ?2 AND split = ?3 AND entity_type = ?4
             ORDER BY metric_name ASC"
        ))
        .context("prepare list league metrics")?;
    let rows = stmt
        .query_map(
            params![league_id, timeframe.label(), split.label(), entity_type],
            decode_row,
        )
        .context("query list league metrics")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode league metric row")?);
    }
    Ok(out)
}

pub fn snapshot_exists(conn: &Connection, league_id: &str) -> Result<bool> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM league_metrics WHERE league_id = ?1",
            params![league_id],
            |row| row.get(0),
        )
        .context("count league metrics")?;
    Ok(n > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    Elite,
    Strong,
    Good,
    Average,
    Weak,
    Poor,
    /// Outside the bottom quantile.
    Bottom,
    NoData,
}

impl Grade {
    pub fn color(self) -> &'static str {
        match self {
            Grade::Elite => "gold",
            Grade::Strong => "forestgreen",
            Grade::Good => "springgreen",
            Grade::Average => "khaki",
            Grade::Weak => "salmon",
            Grade::Poor => "red",
            Grade::Bottom => "black",
            Grade::NoData => "n/a",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::Elite => "elite",
            Grade::Strong => "strong",
            Grade::Good => "good",
            Grade::Average => "average",
            Grade::Weak => "weak",
            Grade::Poor => "poor",
            Grade::Bottom => "bottom",
            Grade::NoData => "n/a",
        };
        f.write_str(s)
    }
}

const SCORE_FLOOR: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradedValue {
    pub grade: Grade,
    /// Bar length in [0.03, 1.0]; `None` when there is nothing to grade.
    pub score: Option<f64>,
}

impl GradedValue {
    pub const NO_DATA: GradedValue = GradedValue {
        grade: Grade::NoData,
        score: None,
    };
}

/// Place a live value on a metric's quantile scale.
pub fn grade(value: Option<f64>, metric: Option<&LeagueMetric>) -> GradedValue {
    let (Some(value), Some(m)) = (value, metric) else {
        return GradedValue::NO_DATA;
    };
    if !value.is_finite() {
        return GradedValue::NO_DATA;
    }

    let ladder = [
        Grade::Elite,
        Grade::Strong,
        Grade::Good,
        Grade::Average,
        Grade::Weak,
        Grade::Poor,
    ];
    let rung = if m.is_max {
        [m.q9, m.q8, m.q6, m.q4, m.q2, m.q1]
            .into_iter()
            .position(|q| value >= q)
    } else {
        [m.q1, m.q2, m.q4, m.q6, m.q8, m.q9]
            .into_iter()
            .position(|q| value < q)
    };
    let grade = rung.map_or(Grade::Bottom, |idx| ladder[idx]);

    GradedValue {
        grade,
        score: Some(bar_score(value, m)),
    }
}

fn bar_score(value: f64, m: &LeagueMetric) -> f64 {
    let (span, gap) = if m.is_max {
        (m.best_value - m.worst_value, m.best_value - value)
    } else {
        (m.worst_value - m.best_value, value - m.best_value)
    };
    if span <= 0.0 {
        return SCORE_FLOOR;
    }
    ((span - gap) / span + SCORE_FLOOR).clamp(SCORE_FLOOR, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(is_max: bool) -> LeagueMetric {
        let (best, worst) = if is_max { (120.0, 100.0) } else { (100.0, 120.0) };
        LeagueMetric {
            league_id: "nba".into(),
            entity_type: "team".into(),
            timeframe: "Season".into(),
            split: "all".into(),
            metric_name: "pts".into(),
            is_max,
            best_value: best,
            worst_value: worst,
            q1: 102.0,
            q2: 104.0,
            q4: 108.0,
            q6: 112.0,
            q8: 116.0,
            q9: 118.0,
            entity_count: 30,
            reference_date: "2025-01-10".into(),
        }
    }

    #[test]
    fn higher_is_better_ladder() {
        let m = metric(true);
        assert_eq!(grade(Some(119.0), Some(&m)).grade, Grade::Elite);
        assert_eq!(grade(Some(113.0), Some(&m)).grade, Grade::Good);
        assert_eq!(grade(Some(102.0), Some(&m)).grade, Grade::Poor);
        assert_eq!(grade(Some(101.0), Some(&m)).grade, Grade::Bottom);
    }

    #[test]
    fn lower_is_better_ladder() {
        let m = metric(false);
        assert_eq!(grade(Some(101.0), Some(&m)).grade, Grade::Elite);
        assert_eq!(grade(Some(117.0), Some(&m)).grade, Grade::Poor);
        assert_eq!(grade(Some(119.0), Some(&m)).grade, Grade::Bottom);
    }

    #[test]
    fn missing_snapshot_is_no_data() {
        let g = grade(Some(110.0), None);
        assert_eq!(g, GradedValue::NO_DATA);
        assert_eq!(g.grade.to_string(), "n/a");
        assert_eq!(grade(None, Some(&metric(true))).grade, Grade::NoData);
    }

    #[test]
    fn score_is_clamped() {
        let m = metric(true);
        assert_eq!(grade(Some(130.0), Some(&m)).score, Some(1.0));
        assert_eq!(grade(Some(90.0), Some(&m)).score, Some(SCORE_FLOOR));
        let mid = grade(Some(110.0), Some(&m)).score.unwrap();
        assert!((mid - 0.53).abs() < 1e-9);
    }
}

use std::cmp::Ordering;

use serde::Serialize;

pub const QUANTILE_LEVELS: [f64; 6] = [0.1, 0.2, 0.4, 0.6, 0.8, 0.9];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Distribution {
    pub best: f64,
    pub worst: f64,
    pub q1: f64,
    pub q2: f64,
    pub q4: f64,
    pub q6: f64,
    pub q8: f64,
    pub q9: f64,
    pub count: usize,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median_f64(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sorted = sorted_copy(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Linear-interpolated quantile over already sorted values.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Best/worst plus the six ranking quantiles. Non-finite values are dropped
/// first; an empty remainder has no distribution.
pub fn distribution(values: &[f64], is_max: bool) -> Option<Distribution> {
    let finite = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect::<Vec<_>>();
    if finite.is_empty() {
        return None;
    }
    let sorted = sorted_copy(&finite);
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let [q1, q2, q4, q6, q8, q9] = QUANTILE_LEVELS.map(|q| quantile_sorted(&sorted, q).unwrap_or(min));
    let (best, worst) = if is_max { (max, min) } else { (min, max) };
    Some(Distribution {
        best,
        worst,
        q1,
        q2,
        q4,
        q6,
        q8,
        q9,
        count: sorted.len(),
    })
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median_f64(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_f64(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median_f64(&[]), None);
    }

    #[test]
    fn quantile_interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_sorted(&sorted, 0.0), Some(1.0));
        assert_eq!(quantile_sorted(&sorted, 1.0), Some(5.0));
        // pos = 0.1 * 4 = 0.4
        assert!((quantile_sorted(&sorted, 0.1).unwrap() - 1.4).abs() < 1e-12);
        assert!((quantile_sorted(&sorted, 0.9).unwrap() - 4.6).abs() < 1e-12);
    }

    #[test]
    fn single_value_collapses_every_quantile() {
        let d = distribution(&[7.5], true).unwrap();
        assert_eq!(d.q1, 7.5);
        assert_eq!(d.q9, 7.5);
        assert_eq!(d.best, 7.5);
        assert_eq!(d.worst, 7.5);
    }

    #[test]
    fn quantiles_ascend_for_lower_is_better_metrics() {
        let d = distribution(&[9.0, 2.0, 5.0, 1.0, 7.0], false).unwrap();
        assert!(d.q1 <= d.q2 && d.q2 <= d.q4 && d.q4 <= d.q6 && d.q6 <= d.q8 && d.q8 <= d.q9);
        assert_eq!(d.best, 1.0);
        assert_eq!(d.worst, 9.0);
    }

    #[test]
    fn nan_is_ignored() {
        let d = distribution(&[f64::NAN, 1.0, 3.0], true).unwrap();
        assert_eq!(d.count, 2);
        assert!(distribution(&[f64::NAN], true).is_none());
    }
}

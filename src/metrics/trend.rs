use chrono::NaiveDate;

use super::round_to;
use super::types::{BodyCompTrends, TrendDirection, TrendSummary};
use crate::storage::model::DailySnapshot;

pub const WEIGHT_THRESHOLD_LBS: f64 = 0.5;
pub const BODY_FAT_THRESHOLD_PCT: f64 = 0.3;
pub const LEAN_MASS_THRESHOLD_LBS: f64 = 0.5;

/// Minimum raw readings before a smoothed trend is reported.
pub const MIN_TREND_READINGS: usize = 3;

/// Body-composition windows: (days, EMA period).
pub const MONTHLY_WINDOW: (u32, usize) = (30, 10);
pub const YEARLY_WINDOW: (u32, usize) = (365, 21);

const MIN_REGRESSION_POINTS: usize = 5;
const MIN_REGRESSION_SPAN_DAYS: i64 = 14;

/// Exponential moving average with `k = 2 / (period + 1)`, seeded from the
/// first value. Empty input or a zero period returns the input unchanged.
pub fn compute_ema(values: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };
    if period == 0 {
        return values.to_vec();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = first;
    values
        .iter()
        .map(|&v| {
            ema = v * k + ema * (1.0 - k);
            ema
        })
        .collect()
}

/// Smooth `values` (oldest first) and classify the change between the first
/// and last smoothed points.
pub fn ema_trend(values: &[f64], period: usize, threshold: f64) -> Option<TrendSummary> {
    if values.len() < MIN_TREND_READINGS {
        return None;
    }
    let ema = compute_ema(values, period);
    let (first, last) = (*ema.first()?, *ema.last()?);
    let change = last - first;

    Some(TrendSummary {
        current: round_to(last, 1),
        change: round_to(change, 1),
        direction: TrendDirection::classify(change, threshold),
        readings: values.len(),
    })
}

/// Weight, body fat, and derived lean-mass trends over `snapshots`
/// (ascending by date).
///
/// Lean mass is only reported when both weight and body fat trends are, and
/// compares the smoothed current values against the first raw readings.
pub fn body_comp_trends(snapshots: &[DailySnapshot], ema_period: usize) -> BodyCompTrends {
    let weights: Vec<f64> = snapshots.iter().filter_map(|s| s.health.weight_lbs).collect();
    let body_fats: Vec<f64> = snapshots
        .iter()
        .filter_map(|s| s.health.body_fat_pct)
        .collect();

    let weight = ema_trend(&weights, ema_period, WEIGHT_THRESHOLD_LBS);
    let body_fat = ema_trend(&body_fats, ema_period, BODY_FAT_THRESHOLD_PCT);

    let lean_mass = match (&weight, &body_fat) {
        (Some(w), Some(bf)) => {
            let current = lean_mass(w.current, bf.current);
            let start = lean_mass(weights[0], body_fats[0]);
            let change = current - start;
            Some(TrendSummary {
                current: round_to(current, 1),
                change: round_to(change, 1),
                direction: TrendDirection::classify(change, LEAN_MASS_THRESHOLD_LBS),
                readings: weights.len().min(body_fats.len()),
            })
        }
        _ => None,
    };

    BodyCompTrends {
        weight,
        body_fat,
        lean_mass,
    }
}

fn lean_mass(weight: f64, body_fat_pct: f64) -> f64 {
    weight * (1.0 - body_fat_pct / 100.0)
}

/// Least-squares slope of value against elapsed days, expressed per 30
/// days and rounded to 1 dp.
///
/// Points must be in date order. Returns `None` with fewer than five points,
/// under a fourteen-day span, or when every point falls on the same day.
pub fn linear_trend_per_30_days(points: &[(NaiveDate, f64)]) -> Option<f64> {
    if points.len() < MIN_REGRESSION_POINTS {
        return None;
    }
    let first = points.first()?.0;
    let last = points.last()?.0;
    if (last - first).num_days() < MIN_REGRESSION_SPAN_DAYS {
        return None;
    }

    let n = points.len() as f64;
    let xs: Vec<f64> = points
        .iter()
        .map(|(d, _)| (*d - first).num_days() as f64)
        .collect();
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (x, (_, y)) in xs.iter().zip(points) {
        numerator += (x - x_mean) * (y - y_mean);
        denominator += (x - x_mean).powi(2);
    }
    if denominator == 0.0 {
        return None;
    }

    Some(round_to(numerator / denominator * 30.0, 1))
}

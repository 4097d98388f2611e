pub mod trend;
pub mod types;

pub use trend::{body_comp_trends, compute_ema, ema_trend, linear_trend_per_30_days};
pub use types::*;

use crate::storage::model::{DailySnapshot, SyncSource};

/// Round to `dp` decimal places, half away from zero.
pub(crate) fn round_to(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn rounded_mean(total: u64, count: usize) -> u32 {
    if count == 0 {
        return 0;
    }
    (total as f64 / count as f64).round() as u32
}

/// Per-field averages over `snapshots`.
///
/// Nutrition averages count only days something was logged. Steps count
/// days with a health sync or a non-zero step total. Weight and sleep count
/// days with a reading. Returns `None` for an empty window.
pub fn compute_averages(snapshots: &[DailySnapshot]) -> Option<Averages> {
    if snapshots.is_empty() {
        return None;
    }

    let tracked: Vec<&DailySnapshot> = snapshots
        .iter()
        .filter(|s| s.nutrition.is_tracked())
        .collect();
    let sum = |f: fn(&DailySnapshot) -> u32| tracked.iter().map(|s| u64::from(f(*s))).sum::<u64>();

    let weights: Vec<f64> = snapshots.iter().filter_map(|s| s.health.weight_lbs).collect();
    let sleeps: Vec<f64> = snapshots.iter().filter_map(|s| s.health.sleep_hours).collect();
    let steps: Vec<u32> = snapshots
        .iter()
        .filter(|s| s.health.steps > 0 || s.has_source(SyncSource::Health))
        .map(|s| s.health.steps)
        .collect();

    let total_workouts: u32 = snapshots.iter().map(|s| s.workout.workout_count).sum();
    let total_volume: f64 = snapshots.iter().map(|s| s.workout.total_volume_kg).sum();

    let weight_change = match (weights.first(), weights.last()) {
        (Some(first), Some(last)) if weights.len() >= 2 => Some(round_to(last - first, 1)),
        _ => None,
    };

    Some(Averages {
        period_days: snapshots.len(),
        nutrition_days: tracked.len(),
        avg_calories: rounded_mean(sum(|s| s.nutrition.calories), tracked.len()),
        avg_protein: rounded_mean(sum(|s| s.nutrition.protein), tracked.len()),
        avg_carbs: rounded_mean(sum(|s| s.nutrition.carbs), tracked.len()),
        avg_fat: rounded_mean(sum(|s| s.nutrition.fat), tracked.len()),
        avg_weight: mean(&weights).map(|w| round_to(w, 1)),
        weight_change,
        avg_sleep: mean(&sleeps).map(|h| round_to(h, 1)),
        avg_steps: rounded_mean(steps.iter().map(|&s| u64::from(s)).sum(), steps.len()),
        total_workouts,
        avg_volume_per_workout: if total_workouts > 0 {
            round_to(total_volume / f64::from(total_workouts), 1)
        } else {
            0.0
        },
    })
}

/// Compliance against `targets` over days with nutrition logged. `None` when
/// nothing was logged in the window.
pub fn compute_compliance(snapshots: &[DailySnapshot], targets: &Targets) -> Option<Compliance> {
    let tracked: Vec<&DailySnapshot> = snapshots
        .iter()
        .filter(|s| s.nutrition.is_tracked())
        .collect();
    if tracked.is_empty() {
        return None;
    }

    let protein_floor = f64::from(targets.protein) * 0.9;
    let calorie_low = f64::from(targets.calories) * 0.9;
    let calorie_high = f64::from(targets.calories) * 1.1;

    let protein_hits = tracked
        .iter()
        .filter(|s| f64::from(s.nutrition.protein) >= protein_floor)
        .count();
    let calorie_hits = tracked
        .iter()
        .filter(|s| {
            let c = f64::from(s.nutrition.calories);
            c >= calorie_low && c <= calorie_high
        })
        .count();

    let days = tracked.len() as f64;
    Some(Compliance {
        days_tracked: tracked.len(),
        protein_compliance: round_to(protein_hits as f64 / days, 2),
        calorie_compliance: round_to(calorie_hits as f64 / days, 2),
        protein_hits,
        calorie_hits,
    })
}

use serde::{Deserialize, Serialize};

/// Per-field means over a window of snapshots. Each mean divides by the
/// number of days that field was present, not by the window length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Averages {
    pub period_days: usize,
    pub nutrition_days: usize,

    pub avg_calories: u32,
    pub avg_protein: u32,
    pub avg_carbs: u32,
    pub avg_fat: u32,

    pub avg_weight: Option<f64>,
    /// Last weight reading minus the first. Needs two readings.
    pub weight_change: Option<f64>,
    pub avg_sleep: Option<f64>,
    pub avg_steps: u32,

    pub total_workouts: u32,
    pub avg_volume_per_workout: f64,
}

/// Daily nutrition targets compliance is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    pub protein: u32,
    pub calories: u32,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            protein: 160,
            calories: 2200,
        }
    }
}

/// Share of tracked days that hit each target band.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Compliance {
    pub days_tracked: usize,
    /// Fraction of days at or above 90% of the protein target.
    pub protein_compliance: f64,
    /// Fraction of days within 10% of the calorie target.
    pub calorie_compliance: f64,
    pub protein_hits: usize,
    pub calorie_hits: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Gaining,
    Losing,
    Stable,
}

impl TrendDirection {
    /// Classify a change against an absolute dead band.
    pub fn classify(change: f64, threshold: f64) -> Self {
        if change > threshold {
            TrendDirection::Gaining
        } else if change < -threshold {
            TrendDirection::Losing
        } else {
            TrendDirection::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Gaining => "gaining",
            TrendDirection::Losing => "losing",
            TrendDirection::Stable => "stable",
        }
    }
}

/// Smoothed trend of one body-composition series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    /// Latest smoothed value, 1 dp.
    pub current: f64,
    /// Change across the window, 1 dp.
    pub change: f64,
    pub direction: TrendDirection,
    pub readings: usize,
}

/// Trends over one window. A series with fewer than three readings is
/// omitted rather than reported as a noisy zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BodyCompTrends {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<TrendSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_fat: Option<TrendSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lean_mass: Option<TrendSummary>,
}

impl BodyCompTrends {
    pub fn is_empty(&self) -> bool {
        self.weight.is_none() && self.body_fat.is_none() && self.lean_mass.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BodyCompReport {
    pub monthly: BodyCompTrends,
    pub yearly: BodyCompTrends,
}

/// Everything the coaching layer wants about a recent window in one value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub days: u32,
    pub snapshot_count: usize,
    pub averages: Option<Averages>,
    pub compliance: Option<Compliance>,
    pub targets: Targets,
}

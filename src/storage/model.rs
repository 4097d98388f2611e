use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Snapshots ──────────────────────────────────────────────────────

/// Daily nutrition totals. The device keeps individual meals; only the
/// per-day aggregate reaches the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutritionSnapshot {
    pub calories: u32,
    pub protein: u32,
    pub carbs: u32,
    pub fat: u32,
    pub entry_count: u32,
    pub protein_per_lb: Option<f64>,
    pub caloric_balance: Option<i32>,
}

impl NutritionSnapshot {
    /// Whether anything was logged for the day.
    pub fn is_tracked(&self) -> bool {
        self.calories > 0 || self.entry_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BedtimeConsistency {
    Stable,
    Variable,
    Irregular,
}

/// Daily health metrics. `None` means "no reading", which is distinct from
/// zero: zero steps is a valid day, zero body weight is not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSnapshot {
    pub steps: u32,
    pub active_calories: u32,

    pub weight_lbs: Option<f64>,
    pub body_fat_pct: Option<f64>,
    pub lean_mass_lbs: Option<f64>,

    pub sleep_hours: Option<f64>,
    pub resting_hr: Option<u32>,
    pub hrv_ms: Option<f64>,
    pub vo2_max: Option<f64>,

    /// Fraction of time in bed spent asleep (0.0-1.0).
    pub sleep_efficiency: Option<f64>,
    pub sleep_deep_pct: Option<f64>,
    pub sleep_core_pct: Option<f64>,
    pub sleep_rem_pct: Option<f64>,
    /// Minutes from midnight.
    pub sleep_onset_minutes: Option<u32>,
    /// 7-day rolling mean.
    pub hrv_baseline_ms: Option<f64>,
    pub hrv_deviation_pct: Option<f64>,
    pub bedtime_consistency: Option<BedtimeConsistency>,

    pub quality_score: Option<f64>,
    pub quality_flags: Vec<String>,
    pub is_baseline_excluded: bool,
}

/// Per-exercise rollup for one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExerciseSummary {
    pub name: String,
    pub sets: u32,
    pub total_reps: u32,
    pub max_weight_kg: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkoutSnapshot {
    pub workout_count: u32,
    pub total_duration_minutes: u32,
    pub total_volume_kg: f64,
    pub exercises: Vec<ExerciseSummary>,
    pub workout_titles: Vec<String>,
}

/// Upstream feed that contributed to a day's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    Nutrition,
    Health,
    Hevy,
}

impl SyncSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSource::Nutrition => "nutrition",
            SyncSource::Health => "health",
            SyncSource::Hevy => "hevy",
        }
    }
}

impl fmt::Display for SyncSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "nutrition" => Ok(SyncSource::Nutrition),
            "health" => Ok(SyncSource::Health),
            "hevy" => Ok(SyncSource::Hevy),
            other => Err(Error::InvalidInput(format!("unknown sync source: {other}"))),
        }
    }
}

/// Everything known about one calendar day. One record per date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    #[serde(default)]
    pub nutrition: NutritionSnapshot,
    #[serde(default)]
    pub health: HealthSnapshot,
    #[serde(default)]
    pub workout: WorkoutSnapshot,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub sources_synced: BTreeSet<SyncSource>,
}

impl DailySnapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            nutrition: NutritionSnapshot::default(),
            health: HealthSnapshot::default(),
            workout: WorkoutSnapshot::default(),
            last_updated: Utc::now(),
            sources_synced: BTreeSet::new(),
        }
    }

    pub fn has_source(&self, source: SyncSource) -> bool {
        self.sources_synced.contains(&source)
    }
}

/// One section of a snapshot, as delivered by a single upstream feed.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotField {
    Nutrition(NutritionSnapshot),
    Health(HealthSnapshot),
    Workout(WorkoutSnapshot),
}

impl SnapshotField {
    /// The source tag a feed of this section normally carries.
    pub fn default_source(&self) -> SyncSource {
        match self {
            SnapshotField::Nutrition(_) => SyncSource::Nutrition,
            SnapshotField::Health(_) => SyncSource::Health,
            SnapshotField::Workout(_) => SyncSource::Hevy,
        }
    }

    /// Replace the matching section of `snapshot`, leaving the others alone.
    pub(crate) fn apply_to(self, snapshot: &mut DailySnapshot) {
        match self {
            SnapshotField::Nutrition(n) => snapshot.nutrition = n,
            SnapshotField::Health(h) => snapshot.health = h,
            SnapshotField::Workout(w) => snapshot.workout = w,
        }
    }
}

// ── Insights ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightCategory {
    Correlation,
    Trend,
    Anomaly,
    Milestone,
    Nudge,
}

impl InsightCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightCategory::Correlation => "correlation",
            InsightCategory::Trend => "trend",
            InsightCategory::Anomaly => "anomaly",
            InsightCategory::Milestone => "milestone",
            InsightCategory::Nudge => "nudge",
        }
    }
}

impl fmt::Display for InsightCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "correlation" => Ok(InsightCategory::Correlation),
            "trend" => Ok(InsightCategory::Trend),
            "anomaly" => Ok(InsightCategory::Anomaly),
            "milestone" => Ok(InsightCategory::Milestone),
            "nudge" => Ok(InsightCategory::Nudge),
            other => Err(Error::InvalidInput(format!(
                "unknown insight category: {other} (expected correlation, trend, anomaly, milestone, nudge)"
            ))),
        }
    }
}

/// How the user responded to a surfaced insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engagement {
    Viewed,
    Tapped,
    Dismissed,
    Acted,
}

impl Engagement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engagement::Viewed => "viewed",
            Engagement::Tapped => "tapped",
            Engagement::Dismissed => "dismissed",
            Engagement::Acted => "acted",
        }
    }
}

impl fmt::Display for Engagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engagement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "viewed" => Ok(Engagement::Viewed),
            "tapped" => Ok(Engagement::Tapped),
            "dismissed" => Ok(Engagement::Dismissed),
            "acted" => Ok(Engagement::Acted),
            other => Err(Error::InvalidInput(format!(
                "unknown engagement action: {other} (expected viewed, tapped, dismissed, acted)"
            ))),
        }
    }
}

/// An AI-generated observation about the user's data.
///
/// Append-only apart from the lifecycle fields, which only change through
/// engagement events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub created_at: DateTime<Utc>,

    pub category: InsightCategory,
    /// 1 is the highest priority, 5 the lowest.
    pub tier: u8,

    pub title: String,
    pub body: String,
    #[serde(default)]
    pub supporting_data: serde_json::Map<String, serde_json::Value>,

    pub importance: f64,
    pub confidence: f64,
    pub novelty: f64,
    pub actionability: f64,

    #[serde(default)]
    pub suggested_actions: Vec<String>,
    /// Data the insight was generated from, kept for follow-up questions.
    #[serde(default)]
    pub conversation_context: String,

    #[serde(default)]
    pub surfaced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engagement: Option<Engagement>,
    #[serde(default)]
    pub dismissed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_feedback: Option<String>,
}

impl Insight {
    /// A fresh insight with a new id and neutral scores.
    pub fn new(category: InsightCategory, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            category,
            tier: 3,
            title: title.into(),
            body: body.into(),
            supporting_data: serde_json::Map::new(),
            importance: 0.5,
            confidence: 0.5,
            novelty: 1.0,
            actionability: 0.5,
            suggested_actions: Vec::new(),
            conversation_context: String::new(),
            surfaced_at: None,
            engagement: None,
            dismissed_at: None,
            user_feedback: None,
        }
    }

    /// Force tier into 1..=5 and scores into [0, 1]. NaN scores become 0.
    pub fn clamped(mut self) -> Self {
        self.tier = self.tier.clamp(1, 5);
        for score in [
            &mut self.importance,
            &mut self.confidence,
            &mut self.novelty,
            &mut self.actionability,
        ] {
            *score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        }
        self
    }

    /// Ranking key used by listings.
    pub fn score(&self) -> f64 {
        self.importance * self.confidence
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed_at.is_some()
    }
}

// ── Aggregate root ─────────────────────────────────────────────────

pub const CONTEXT_STORE_VERSION: u32 = 1;

/// The whole persisted context: the unit of atomic rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextData {
    pub snapshots: BTreeMap<NaiveDate, DailySnapshot>,
    pub insights: Vec<Insight>,
    pub last_sync: Option<DateTime<Utc>>,
    pub version: u32,
}

impl Default for ContextData {
    fn default() -> Self {
        Self {
            snapshots: BTreeMap::new(),
            insights: Vec::new(),
            last_sync: None,
            version: CONTEXT_STORE_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_json_uses_iso_dates_and_lowercase_sources() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let mut snap = DailySnapshot::new(date);
        snap.sources_synced.insert(SyncSource::Hevy);
        snap.sources_synced.insert(SyncSource::Nutrition);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["date"], "2025-01-05");
        assert_eq!(json["sources_synced"], serde_json::json!(["nutrition", "hevy"]));
        assert!(json["health"]["weight_lbs"].is_null());
    }

    #[test]
    fn test_context_data_keys_snapshots_by_date() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let mut data = ContextData::default();
        data.snapshots.insert(date, DailySnapshot::new(date));

        let text = serde_json::to_string(&data).unwrap();
        assert!(text.contains("\"2025-01-05\":"));
        let back: ContextData = serde_json::from_str(&text).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_missing_sections_default() {
        let json = r#"{"date":"2025-01-05","last_updated":"2025-01-05T10:00:00Z","health":{"steps":1200}}"#;
        let snap: DailySnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.health.steps, 1200);
        assert_eq!(snap.health.weight_lbs, None);
        assert_eq!(snap.nutrition, NutritionSnapshot::default());
        assert!(snap.sources_synced.is_empty());
    }

    #[test]
    fn test_insight_clamped() {
        let mut insight = Insight::new(InsightCategory::Trend, "t", "b");
        insight.tier = 9;
        insight.importance = 1.7;
        insight.confidence = -0.2;
        insight.actionability = f64::NAN;
        let insight = insight.clamped();
        assert_eq!(insight.tier, 5);
        assert_eq!(insight.importance, 1.0);
        assert_eq!(insight.confidence, 0.0);
        assert_eq!(insight.actionability, 0.0);

        let mut top = Insight::new(InsightCategory::Trend, "t", "b");
        top.tier = 0;
        assert_eq!(top.clamped().tier, 1);
    }

    #[test]
    fn test_category_and_engagement_parse() {
        assert_eq!("Correlation".parse::<InsightCategory>().unwrap(), InsightCategory::Correlation);
        assert!(matches!("gossip".parse::<InsightCategory>(), Err(Error::InvalidInput(_))));
        assert_eq!("dismissed".parse::<Engagement>().unwrap(), Engagement::Dismissed);
        assert!("shared".parse::<Engagement>().is_err());
        assert_eq!("HEVY".parse::<SyncSource>().unwrap(), SyncSource::Hevy);
    }

    #[test]
    fn test_snapshot_field_default_sources() {
        assert_eq!(
            SnapshotField::Nutrition(NutritionSnapshot::default()).default_source(),
            SyncSource::Nutrition
        );
        assert_eq!(
            SnapshotField::Workout(WorkoutSnapshot::default()).default_source(),
            SyncSource::Hevy
        );
    }
}

pub mod config;
pub mod date_util;
pub mod error;
pub mod insights;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

pub use config::Settings;
pub use error::{Error, Result};
pub use insights::{InsightGenerator, ProfileContext};
pub use metrics::{
    Averages, BodyCompReport, BodyCompTrends, Compliance, ContextSummary, Targets, TrendDirection,
    TrendSummary,
};
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerHandle, SchedulerState, SchedulerStatus, TaskKind,
    TaskOutcome, TaskReport,
};
pub use storage::insights::InsightFilter;
pub use storage::model::{
    DailySnapshot, Engagement, HealthSnapshot, Insight, InsightCategory, NutritionSnapshot,
    SnapshotField, SyncSource, WorkoutSnapshot,
};
pub use storage::{resolve_data_dir, ContextStore, StoreStats};
pub use sync::{SyncReport, Workout, WorkoutSource};

use insights::chat;
use insights::llm::LlmInsightGenerator;
use scheduler::StateStore;
use sync::hevy::HevyClient;

/// Insights included in chat context when no limit is given.
pub const DEFAULT_CHAT_INSIGHTS: usize = 3;

/// Main entry point: the snapshot store, its derived views, and the
/// background scheduler over one data directory.
pub struct FitContext {
    data_dir: PathBuf,
    settings: Settings,
    store: ContextStore,
    scheduler: Arc<Scheduler>,
}

impl FitContext {
    /// Open `data_dir` with the LLM generator and Hevy client configured from
    /// `settings.json` and the environment.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let settings = Settings::load(&data_dir);
        let generator = Arc::new(LlmInsightGenerator::from_settings(&settings));
        let source = Arc::new(HevyClient::from_env()?);
        Ok(Self::with_components(data_dir, settings, generator, source))
    }

    /// Open with caller-supplied generator and workout source.
    pub fn with_components(
        data_dir: impl Into<PathBuf>,
        settings: Settings,
        generator: Arc<dyn InsightGenerator>,
        source: Arc<dyn WorkoutSource>,
    ) -> Self {
        let data_dir = data_dir.into();
        let store = ContextStore::open_with_ttl(&data_dir, settings.cache_ttl());
        let profile = ProfileContext {
            goals: settings.goals.clone(),
            targets: settings.targets(),
            recent_titles: Vec::new(),
        };
        let scheduler = Scheduler::new(
            store.clone(),
            StateStore::open(&data_dir),
            generator,
            source,
            profile,
            SchedulerConfig::from_settings(&settings),
        );
        Self {
            data_dir,
            settings,
            store,
            scheduler: Arc::new(scheduler),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Direct store access for writers (device ingest, sync tooling).
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub fn snapshot(&self, date: NaiveDate) -> Option<DailySnapshot> {
        self.store.get(date)
    }

    pub fn recent_snapshots(&self, days: u32) -> Vec<DailySnapshot> {
        self.store.recent_snapshots(days)
    }

    /// Merge several sections into one day atomically.
    pub fn ingest_day(&self, date: NaiveDate, fields: Vec<SnapshotField>) -> Result<DailySnapshot> {
        self.store.apply_day(date, fields)
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn reset(&self) -> Result<()> {
        self.store.reset()
    }

    // ── Derived metrics ────────────────────────────────────────────

    pub fn averages(&self, days: u32) -> Option<Averages> {
        metrics::compute_averages(&self.recent_snapshots(days))
    }

    pub fn compliance(&self, days: u32) -> Option<Compliance> {
        metrics::compute_compliance(&self.recent_snapshots(days), &self.settings.targets())
    }

    pub fn context_summary(&self, days: u32) -> ContextSummary {
        let snapshots = self.recent_snapshots(days);
        let targets = self.settings.targets();
        ContextSummary {
            days,
            snapshot_count: snapshots.len(),
            averages: metrics::compute_averages(&snapshots),
            compliance: metrics::compute_compliance(&snapshots, &targets),
            targets,
        }
    }

    /// Monthly and yearly smoothed body-composition trends.
    pub fn body_comp_trends(&self) -> BodyCompReport {
        let trends = |(days, ema_period): (u32, usize)| {
            metrics::body_comp_trends(&self.recent_snapshots(days), ema_period)
        };
        BodyCompReport {
            monthly: trends(metrics::trend::MONTHLY_WINDOW),
            yearly: trends(metrics::trend::YEARLY_WINDOW),
        }
    }

    /// Regression slope of weight over the last `days`, in lbs per 30 days.
    pub fn weight_rate_per_30_days(&self, days: u32) -> Option<f64> {
        let points: Vec<(NaiveDate, f64)> = self
            .recent_snapshots(days)
            .iter()
            .filter_map(|s| s.health.weight_lbs.map(|w| (s.date, w)))
            .collect();
        metrics::linear_trend_per_30_days(&points)
    }

    // ── Insights ───────────────────────────────────────────────────

    pub fn insights(&self, filter: &InsightFilter, limit: usize) -> Vec<Insight> {
        self.store.list_insights(filter, limit)
    }

    pub fn insight(&self, id: &str) -> Option<Insight> {
        self.store.get_insight(id)
    }

    pub fn record_engagement(
        &self,
        id: &str,
        action: Engagement,
        feedback: Option<String>,
    ) -> Result<Insight> {
        self.store.update_engagement(id, action, feedback)
    }

    // ── Scheduler ──────────────────────────────────────────────────

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub async fn trigger(&self, kind: TaskKind, force: bool) -> TaskOutcome {
        self.scheduler.trigger(kind, force).await
    }

    pub async fn set_interval(&self, kind: TaskKind, hours: u32) -> Result<SchedulerState> {
        self.scheduler.set_interval(kind, hours).await
    }

    /// Start the background loop on the current runtime.
    pub fn start_scheduler(&self) -> Result<SchedulerHandle> {
        Arc::clone(&self.scheduler).start()
    }

    // ── Chat context ───────────────────────────────────────────────

    /// Top-ranked undismissed insights as a text block for chat.
    pub fn insights_for_chat(&self, limit: Option<usize>) -> String {
        let limit = limit.unwrap_or(DEFAULT_CHAT_INSIGHTS);
        chat::format_insights(&self.insights(&InsightFilter::default(), limit))
    }

    pub fn weekly_summary_for_chat(&self) -> String {
        self.averages(7)
            .map(|a| chat::format_weekly_summary(&a))
            .unwrap_or_default()
    }

    pub fn body_comp_for_chat(&self) -> String {
        chat::format_body_comp(&self.body_comp_trends())
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Validate and persist one setting. Takes effect on the next `open`.
    pub fn set_setting(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.settings.clone();
        updated.set(key, value)?;
        updated.save(&self.data_dir)?;
        self.settings = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct OneInsight;

    #[async_trait]
    impl InsightGenerator for OneInsight {
        async fn generate(
            &self,
            snapshots: &[DailySnapshot],
            profile: &ProfileContext,
        ) -> Result<Vec<Insight>> {
            let mut insight = Insight::new(
                InsightCategory::Correlation,
                "Protein tracks sleep",
                format!("{} days, target {}g", snapshots.len(), profile.targets.protein),
            );
            insight.importance = 0.9;
            insight.suggested_actions = vec!["Eat earlier".into()];
            Ok(vec![insight])
        }
    }

    struct NoWorkouts;

    #[async_trait]
    impl WorkoutSource for NoWorkouts {
        async fn fetch_all(&self) -> Result<Vec<Workout>> {
            Ok(Vec::new())
        }
    }

    fn open(dir: &Path) -> FitContext {
        let settings = Settings {
            protein_target: 150,
            ..Settings::default()
        };
        FitContext::with_components(dir, settings, Arc::new(OneInsight), Arc::new(NoWorkouts))
    }

    fn days_ago(n: i64) -> NaiveDate {
        date_util::today() - chrono::Duration::days(n)
    }

    fn seed_weights(ctx: &FitContext, weights: &[f64]) {
        let n = weights.len() as i64;
        for (i, w) in weights.iter().enumerate() {
            ctx.store()
                .update_health(
                    days_ago(n - 1 - i as i64),
                    HealthSnapshot {
                        weight_lbs: Some(*w),
                        body_fat_pct: Some(20.0),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
    }

    #[test]
    fn test_context_summary_uses_settings_targets() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = open(dir.path());
        ctx.ingest_day(
            days_ago(1),
            vec![SnapshotField::Nutrition(NutritionSnapshot {
                calories: 2200,
                protein: 140,
                entry_count: 3,
                ..Default::default()
            })],
        )
        .unwrap();

        let summary = ctx.context_summary(7);
        assert_eq!(summary.snapshot_count, 1);
        assert_eq!(summary.targets.protein, 150);
        let compliance = summary.compliance.unwrap();
        // 140g is above 90% of 150g.
        assert_eq!(compliance.protein_hits, 1);
        assert_eq!(compliance.calorie_hits, 1);
        assert_eq!(summary.averages.unwrap().avg_calories, 2200);
    }

    #[test]
    fn test_body_comp_and_weight_rate() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = open(dir.path());
        let weights: Vec<f64> = (0..20).map(|i| 200.0 - f64::from(i) * 0.2).collect();
        seed_weights(&ctx, &weights);

        let report = ctx.body_comp_trends();
        let weight = report.monthly.weight.unwrap();
        assert_eq!(weight.direction, TrendDirection::Losing);
        assert_eq!(weight.readings, 20);
        assert!(report.yearly.lean_mass.is_some());

        // 0.2 lb/day down is 6 lb per 30 days.
        assert_eq!(ctx.weight_rate_per_30_days(30), Some(-6.0));
        assert!(ctx.body_comp_for_chat().starts_with("Monthly body comp trends: weight"));
    }

    #[test]
    fn test_empty_store_views() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = open(dir.path());
        assert!(ctx.averages(7).is_none());
        assert!(ctx.compliance(7).is_none());
        assert!(ctx.body_comp_trends().monthly.is_empty());
        assert_eq!(ctx.weekly_summary_for_chat(), "");
        assert_eq!(ctx.insights_for_chat(None), "");
        assert_eq!(ctx.weight_rate_per_30_days(30), None);
    }

    #[tokio::test]
    async fn test_triggered_insights_reach_chat_context() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = open(dir.path());

        let outcome = ctx.trigger(TaskKind::InsightGeneration, false).await;
        assert!(matches!(outcome, TaskOutcome::Completed(_)));
        assert_eq!(ctx.scheduler_status().insights_generated_today, 1);

        let text = ctx.insights_for_chat(None);
        assert!(text.contains("[CORRELATION] Protein tracks sleep"));
        assert!(text.contains("Suggested: Eat earlier"));

        let id = ctx.insights(&InsightFilter::default(), 1)[0].id.clone();
        ctx.record_engagement(&id, Engagement::Dismissed, Some("knew that".into()))
            .unwrap();
        assert_eq!(ctx.insights_for_chat(Some(5)), "");
        assert_eq!(ctx.insight(&id).unwrap().user_feedback.as_deref(), Some("knew that"));
    }

    #[test]
    fn test_set_setting_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = open(dir.path());
        ctx.set_setting("calorie_target", "2500").unwrap();
        assert_eq!(ctx.settings().calorie_target, 2500);
        assert_eq!(Settings::load(dir.path()).calorie_target, 2500);

        assert!(ctx.set_setting("calorie_target", "zero").is_err());
        assert_eq!(ctx.settings().calorie_target, 2500);
    }
}

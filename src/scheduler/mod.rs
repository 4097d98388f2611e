pub mod state;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::date_util;
use crate::error::{Error, Result};
use crate::insights::{InsightGenerator, ProfileContext};
use crate::storage::ContextStore;
use crate::sync::{apply_workouts, SyncReport, WorkoutSource};
pub use state::{RunningFlags, RunningGuard, SchedulerState, StateStore};

/// Recent insight titles handed to the generator for de-duplication.
const RECENT_TITLES_FOR_DEDUPE: usize = 20;

/// A background task the scheduler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    InsightGeneration,
    WorkoutSync,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::InsightGeneration, TaskKind::WorkoutSync];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::InsightGeneration => "insight_generation",
            TaskKind::WorkoutSync => "workout_sync",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "insights" | "insight_generation" => Ok(TaskKind::InsightGeneration),
            "sync" | "hevy" | "workout_sync" => Ok(TaskKind::WorkoutSync),
            other => Err(Error::InvalidInput(format!(
                "unknown task: {other} (expected insights or sync)"
            ))),
        }
    }
}

/// Result of the cadence check for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Due,
    Wait { remaining: chrono::Duration },
}

/// Due if the task never ran or `interval` has elapsed since `last_run`.
/// A `last_run` in the future waits at most one interval.
pub fn evaluate_gate(
    last_run: Option<DateTime<Utc>>,
    interval: chrono::Duration,
    now: DateTime<Utc>,
) -> Gate {
    let Some(last_run) = last_run else {
        return Gate::Due;
    };
    let elapsed = now - last_run;
    if elapsed >= interval {
        Gate::Due
    } else {
        Gate::Wait {
            remaining: (interval - elapsed).min(interval),
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskReport {
    InsightGeneration { insights_generated: usize },
    WorkoutSync(SyncReport),
}

impl TaskReport {
    fn insights_generated(&self) -> usize {
        match self {
            TaskReport::InsightGeneration { insights_generated } => *insights_generated,
            TaskReport::WorkoutSync(_) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Another run of the same task is in flight.
    AlreadyRunning,
    /// Ran too recently; not forced.
    Skipped {
        remaining: chrono::Duration,
        last_run: Option<DateTime<Utc>>,
    },
    Completed(TaskReport),
    Failed { error: String },
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::AlreadyRunning => f.write_str("already running"),
            TaskOutcome::Skipped { remaining, .. } => {
                let mins = remaining.num_minutes();
                write!(f, "skipped, next run in {}h {:02}m", mins / 60, mins % 60)
            }
            TaskOutcome::Completed(TaskReport::InsightGeneration { insights_generated }) => {
                write!(f, "completed, {insights_generated} insights generated")
            }
            TaskOutcome::Completed(TaskReport::WorkoutSync(r)) => {
                write!(f, "completed, {} workouts across {} days", r.workouts, r.days)
            }
            TaskOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Timing knobs for the background loop and insight window.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub lookback_days: u32,
    pub startup_delay: Duration,
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            startup_delay: Duration::from_secs(5),
            tick: Duration::from_secs(15 * 60),
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lookback_days: settings.lookback_days(),
            startup_delay: settings.startup_delay(),
            tick: settings.tick_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub is_generating_insights: bool,
    pub is_syncing_workouts: bool,
    pub last_insight_generation: Option<DateTime<Utc>>,
    /// Only set while the next run is still in the future.
    pub next_insight_generation: Option<DateTime<Utc>>,
    pub last_hevy_sync: Option<DateTime<Utc>>,
    pub next_hevy_sync: Option<DateTime<Utc>>,
    pub insights_generated_today: u32,
    pub generation_error: Option<String>,
    pub sync_error: Option<String>,
    pub insight_generation_interval_hours: u32,
    pub hevy_sync_interval_hours: u32,
}

/// Everything a task run needs, cloneable into a spawned task.
#[derive(Clone)]
struct TaskDeps {
    store: ContextStore,
    state: Arc<StateStore>,
    generator: Arc<dyn InsightGenerator>,
    source: Arc<dyn WorkoutSource>,
    profile: ProfileContext,
    lookback_days: u32,
}

/// Runs insight generation and workout sync in the background.
///
/// Each task is single-flight, gated by its persisted interval, and isolated:
/// a failure or panic is recorded in [`SchedulerState`] and never reaches the
/// other task or the caller's request path.
pub struct Scheduler {
    deps: TaskDeps,
    config: SchedulerConfig,
    running: RunningFlags,
    loop_running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        store: ContextStore,
        state: StateStore,
        generator: Arc<dyn InsightGenerator>,
        source: Arc<dyn WorkoutSource>,
        profile: ProfileContext,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            deps: TaskDeps {
                store,
                state: Arc::new(state),
                generator,
                source,
                profile,
                lookback_days: config.lookback_days,
            },
            config,
            running: RunningFlags::default(),
            loop_running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.deps.state.load()
    }

    pub fn is_task_running(&self, kind: TaskKind) -> bool {
        self.running.is_running(kind)
    }

    /// Run `kind` now if it is due, or unconditionally when `force` is set.
    ///
    /// Force skips the cadence check but never the single-flight guard. The
    /// run executes on its own tokio task, so it completes and records its
    /// result even if the caller stops waiting.
    pub async fn trigger(&self, kind: TaskKind, force: bool) -> TaskOutcome {
        let Some(guard) = self.running.try_acquire(kind) else {
            log::info!("{kind} already running, not starting another");
            return TaskOutcome::AlreadyRunning;
        };

        if !force {
            let state = match self.deps.state.current().await {
                Ok(state) => state,
                Err(e) => {
                    log::error!("Could not read scheduler state for {kind}: {e}");
                    return TaskOutcome::Failed {
                        error: e.to_string(),
                    };
                }
            };
            let last_run = state.last_run(kind);
            if let Gate::Wait { remaining } = evaluate_gate(last_run, state.interval(kind), Utc::now()) {
                log::debug!("{kind} not due for another {}m", remaining.num_minutes());
                return TaskOutcome::Skipped { remaining, last_run };
            }
        }

        log::info!("Starting {kind}{}", if force { " (forced)" } else { "" });
        let deps = self.deps.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run_and_record(deps, kind).await
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = if e.is_panic() {
                    format!("{kind} panicked")
                } else {
                    format!("{kind} was cancelled")
                };
                log::error!("{error}");
                let recorded = error.clone();
                if let Err(e) = self
                    .deps
                    .state
                    .update(move |s| s.record_failure(kind, recorded))
                    .await
                {
                    log::error!("Could not record {kind} failure: {e}");
                }
                TaskOutcome::Failed { error }
            }
        }
    }

    /// Trigger every task without forcing, one after another. A failure in
    /// one does not stop the next.
    pub async fn run_due(&self) -> Vec<(TaskKind, TaskOutcome)> {
        let mut outcomes = Vec::with_capacity(TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            let outcome = self.trigger(kind, false).await;
            match &outcome {
                TaskOutcome::Completed(_) => log::info!("{kind}: {outcome}"),
                TaskOutcome::Failed { .. } => log::warn!("{kind}: {outcome}"),
                _ => log::debug!("{kind}: {outcome}"),
            }
            outcomes.push((kind, outcome));
        }
        outcomes
    }

    /// Persist a new cadence for `kind`.
    pub async fn set_interval(&self, kind: TaskKind, hours: u32) -> Result<SchedulerState> {
        if hours == 0 {
            return Err(Error::InvalidInput("interval must be at least 1 hour".into()));
        }
        self.deps
            .state
            .update(move |s| s.set_interval_hours(kind, hours))
            .await
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.deps.state.load();
        let now = Utc::now();
        let next = |kind: TaskKind| {
            state
                .last_run(kind)
                .map(|last| last + state.interval(kind))
                .filter(|next| *next > now)
        };

        SchedulerStatus {
            is_running: self.loop_running.load(Ordering::Acquire),
            is_generating_insights: self.running.is_running(TaskKind::InsightGeneration),
            is_syncing_workouts: self.running.is_running(TaskKind::WorkoutSync),
            last_insight_generation: state.last_insight_generation,
            next_insight_generation: next(TaskKind::InsightGeneration),
            last_hevy_sync: state.last_hevy_sync,
            next_hevy_sync: next(TaskKind::WorkoutSync),
            insights_generated_today: state.insights_generated_on(date_util::today()),
            generation_error: state.generation_error.clone(),
            sync_error: state.sync_error.clone(),
            insight_generation_interval_hours: state.insight_generation_interval_hours,
            hevy_sync_interval_hours: state.hevy_sync_interval_hours,
        }
    }

    /// Start the background loop: wait the startup delay, then check for due
    /// tasks on every tick until stopped.
    pub fn start(self: Arc<Self>) -> Result<SchedulerHandle> {
        if self.loop_running.swap(true, Ordering::AcqRel) {
            return Err(Error::Other("scheduler loop is already running".into()));
        }

        let (shutdown_tx, mut shutdown) = broadcast::channel::<()>(1);
        let scheduler = Arc::clone(&self);
        let join = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(scheduler.config.startup_delay) => {}
                _ = shutdown.recv() => {
                    scheduler.loop_running.store(false, Ordering::Release);
                    return;
                }
            }

            log::info!(
                "Background scheduler started (tick: {}s)",
                scheduler.config.tick.as_secs()
            );
            let mut ticker = tokio::time::interval(scheduler.config.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        scheduler.run_due().await;
                    }
                }
            }

            scheduler.loop_running.store(false, Ordering::Release);
            log::info!("Background scheduler stopped");
        });

        Ok(SchedulerHandle { shutdown_tx, join })
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling new runs and wait for the loop to exit. A run already
    /// in progress finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            log::error!("Scheduler loop ended abnormally: {e}");
        }
    }
}

async fn run_and_record(deps: TaskDeps, kind: TaskKind) -> TaskOutcome {
    let result = match kind {
        TaskKind::InsightGeneration => generate_insights(&deps)
            .await
            .map(|n| TaskReport::InsightGeneration { insights_generated: n }),
        TaskKind::WorkoutSync => sync_workouts(&deps).await.map(TaskReport::WorkoutSync),
    };

    let finished = Utc::now();
    let today = date_util::today();
    let persisted = match &result {
        Ok(report) => {
            let added = report.insights_generated();
            deps.state
                .update(move |s| s.record_success(kind, finished, today, added))
                .await
        }
        Err(e) => {
            let error = e.to_string();
            deps.state.update(move |s| s.record_failure(kind, error)).await
        }
    };
    if let Err(e) = persisted {
        log::error!("Could not persist scheduler state after {kind}: {e}");
    }

    match result {
        Ok(report) => TaskOutcome::Completed(report),
        Err(e) => {
            log::error!("{kind} failed: {e}");
            TaskOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Run store I/O on the blocking pool.
async fn blocking<T, F>(what: &str, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("{what} failed: {e}")))
}

async fn generate_insights(deps: &TaskDeps) -> Result<usize> {
    let store = deps.store.clone();
    let days = deps.lookback_days;
    let (snapshots, recent_titles) = blocking("snapshot read", move || {
        (
            store.recent_snapshots(days),
            store.recent_insight_titles(RECENT_TITLES_FOR_DEDUPE),
        )
    })
    .await?;
    let profile = ProfileContext {
        recent_titles,
        ..deps.profile.clone()
    };

    let insights = deps.generator.generate(&snapshots, &profile).await?;
    let store = deps.store.clone();
    blocking("insight write", move || store.add_insights(insights)).await?
}

async fn sync_workouts(deps: &TaskDeps) -> Result<SyncReport> {
    let workouts = deps.source.fetch_all().await?;
    if workouts.is_empty() {
        log::info!("No workouts to sync");
        return Ok(SyncReport::default());
    }
    let store = deps.store.clone();
    blocking("workout write", move || apply_workouts(&store, &workouts)).await?
}

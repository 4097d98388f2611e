use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::TaskKind;
use crate::error::{Error, Result};
use crate::storage::file::JsonFile;

pub const SCHEDULER_STATE_FILE: &str = "scheduler_state.json";

/// Persisted scheduler bookkeeping (`scheduler_state.json`).
///
/// There is no "running" field. Whether a task is in flight lives only in
/// [`RunningFlags`] and is false after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerState {
    pub last_insight_generation: Option<DateTime<Utc>>,
    pub last_hevy_sync: Option<DateTime<Utc>>,

    pub insights_generated_today: u32,
    /// Local day `insights_generated_today` refers to.
    pub insights_counted_on: Option<NaiveDate>,

    pub generation_error: Option<String>,
    pub sync_error: Option<String>,

    pub insight_generation_interval_hours: u32,
    pub hevy_sync_interval_hours: u32,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            last_insight_generation: None,
            last_hevy_sync: None,
            insights_generated_today: 0,
            insights_counted_on: None,
            generation_error: None,
            sync_error: None,
            insight_generation_interval_hours: 6,
            hevy_sync_interval_hours: 1,
        }
    }
}

impl SchedulerState {
    pub fn last_run(&self, kind: TaskKind) -> Option<DateTime<Utc>> {
        match kind {
            TaskKind::InsightGeneration => self.last_insight_generation,
            TaskKind::WorkoutSync => self.last_hevy_sync,
        }
    }

    pub fn interval(&self, kind: TaskKind) -> chrono::Duration {
        let hours = match kind {
            TaskKind::InsightGeneration => self.insight_generation_interval_hours,
            TaskKind::WorkoutSync => self.hevy_sync_interval_hours,
        };
        chrono::Duration::hours(i64::from(hours))
    }

    pub fn last_error(&self, kind: TaskKind) -> Option<&str> {
        match kind {
            TaskKind::InsightGeneration => self.generation_error.as_deref(),
            TaskKind::WorkoutSync => self.sync_error.as_deref(),
        }
    }

    /// Insights counted for `today`; a count from an earlier day reads as 0.
    pub fn insights_generated_on(&self, today: NaiveDate) -> u32 {
        if self.insights_counted_on == Some(today) {
            self.insights_generated_today
        } else {
            0
        }
    }

    pub fn set_interval_hours(&mut self, kind: TaskKind, hours: u32) {
        match kind {
            TaskKind::InsightGeneration => self.insight_generation_interval_hours = hours,
            TaskKind::WorkoutSync => self.hevy_sync_interval_hours = hours,
        }
    }

    /// Stamp a successful run finishing at `now` and clear the task's error.
    pub fn record_success(
        &mut self,
        kind: TaskKind,
        now: DateTime<Utc>,
        today: NaiveDate,
        insights_added: usize,
    ) {
        match kind {
            TaskKind::InsightGeneration => {
                self.last_insight_generation = Some(now);
                self.generation_error = None;
                if self.insights_counted_on != Some(today) {
                    self.insights_generated_today = 0;
                    self.insights_counted_on = Some(today);
                }
                self.insights_generated_today = self
                    .insights_generated_today
                    .saturating_add(u32::try_from(insights_added).unwrap_or(u32::MAX));
            }
            TaskKind::WorkoutSync => {
                self.last_hevy_sync = Some(now);
                self.sync_error = None;
            }
        }
    }

    /// Record a failed run. The last-run time is left alone so the task
    /// stays due.
    pub fn record_failure(&mut self, kind: TaskKind, error: String) {
        match kind {
            TaskKind::InsightGeneration => self.generation_error = Some(error),
            TaskKind::WorkoutSync => self.sync_error = Some(error),
        }
    }
}

/// `scheduler_state.json` plus the lock that makes each update a single
/// load-merge-write.
pub struct StateStore {
    file: JsonFile<SchedulerState>,
    lock: tokio::sync::Mutex<()>,
}

impl StateStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        Self {
            file: JsonFile::new(data_dir.as_ref().join(SCHEDULER_STATE_FILE)),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn load(&self) -> SchedulerState {
        self.file.load()
    }

    /// [`load`](Self::load) on the blocking pool, for async callers.
    pub async fn current(&self) -> Result<SchedulerState> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.load())
            .await
            .map_err(|e| Error::Other(format!("scheduler state read failed: {e}")))
    }

    /// Reload, apply `f`, and write back while holding the lock. Fields `f`
    /// does not touch keep whatever is on disk, so two tasks finishing
    /// together do not overwrite each other's timestamps. File I/O runs on
    /// the blocking pool.
    pub async fn update(
        &self,
        f: impl FnOnce(&mut SchedulerState) + Send + 'static,
    ) -> Result<SchedulerState> {
        let _guard = self.lock.lock().await;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            let mut state = file.load();
            f(&mut state);
            file.save(&state)?;
            Ok(state)
        })
        .await
        .map_err(|e| Error::Other(format!("scheduler state write failed: {e}")))?
    }
}

/// In-memory "task in flight" flags, one per task kind. Never persisted.
#[derive(Debug, Default)]
pub struct RunningFlags {
    insight_generation: Arc<AtomicBool>,
    workout_sync: Arc<AtomicBool>,
}

impl RunningFlags {
    fn flag(&self, kind: TaskKind) -> &Arc<AtomicBool> {
        match kind {
            TaskKind::InsightGeneration => &self.insight_generation,
            TaskKind::WorkoutSync => &self.workout_sync,
        }
    }

    /// Claim `kind`, or `None` if a run is already in flight.
    pub fn try_acquire(&self, kind: TaskKind) -> Option<RunningGuard> {
        let flag = self.flag(kind);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard {
                flag: Arc::clone(flag),
            })
    }

    pub fn is_running(&self, kind: TaskKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }
}

/// Clears its flag when dropped, including during a panic unwind.
#[derive(Debug)]
pub struct RunningGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    #[test]
    fn test_state_json_has_no_running_flag() {
        let json = serde_json::to_value(SchedulerState::default()).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert!(keys.iter().all(|k| !k.contains("running") && !k.contains("generating")));
        assert_eq!(json["insight_generation_interval_hours"], 6);
        assert_eq!(json["hevy_sync_interval_hours"], 1);
    }

    #[test]
    fn test_legacy_running_field_is_ignored() {
        let state: SchedulerState =
            serde_json::from_str(r#"{"is_generating": true, "hevy_sync_interval_hours": 2}"#).unwrap();
        assert_eq!(state.hevy_sync_interval_hours, 2);
        assert_eq!(state.insight_generation_interval_hours, 6);
    }

    #[test]
    fn test_daily_counter_resets_on_new_day() {
        let mut state = SchedulerState::default();
        let now = Utc::now();
        state.record_success(TaskKind::InsightGeneration, now, day(1), 4);
        state.record_success(TaskKind::InsightGeneration, now, day(1), 3);
        assert_eq!(state.insights_generated_on(day(1)), 7);
        assert_eq!(state.insights_generated_on(day(2)), 0);

        state.record_success(TaskKind::InsightGeneration, now, day(2), 2);
        assert_eq!(state.insights_generated_today, 2);
    }

    #[test]
    fn test_success_clears_only_its_own_error() {
        let mut state = SchedulerState::default();
        state.record_failure(TaskKind::InsightGeneration, "llm down".into());
        state.record_failure(TaskKind::WorkoutSync, "hevy down".into());
        assert_eq!(state.last_insight_generation, None);

        state.record_success(TaskKind::WorkoutSync, Utc::now(), day(1), 0);
        assert_eq!(state.last_error(TaskKind::WorkoutSync), None);
        assert_eq!(state.last_error(TaskKind::InsightGeneration), Some("llm down"));
    }

    #[tokio::test]
    async fn test_update_merges_with_disk() {
        let dir = tempfile::tempdir().unwrap();
        let a = StateStore::open(dir.path());
        let b = StateStore::open(dir.path());

        let when = Utc::now();
        a.update(move |s| s.record_success(TaskKind::WorkoutSync, when, day(1), 0))
            .await
            .unwrap();
        b.update(|s| s.set_interval_hours(TaskKind::InsightGeneration, 12))
            .await
            .unwrap();

        let state = a.current().await.unwrap();
        assert_eq!(state.last_hevy_sync, Some(when));
        assert_eq!(state.insight_generation_interval_hours, 12);
    }

    #[test]
    fn test_running_flag_single_holder() {
        let flags = RunningFlags::default();
        let guard = flags.try_acquire(TaskKind::InsightGeneration).unwrap();
        assert!(flags.is_running(TaskKind::InsightGeneration));
        assert!(flags.try_acquire(TaskKind::InsightGeneration).is_none());
        assert!(flags.try_acquire(TaskKind::WorkoutSync).is_some());

        drop(guard);
        assert!(!flags.is_running(TaskKind::InsightGeneration));
        assert!(flags.try_acquire(TaskKind::InsightGeneration).is_some());
    }

    #[test]
    fn test_running_flag_cleared_on_panic() {
        let flags = RunningFlags::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = flags.try_acquire(TaskKind::WorkoutSync).unwrap();
            panic!("task blew up");
        }));
        assert!(result.is_err());
        assert!(!flags.is_running(TaskKind::WorkoutSync));
    }
}

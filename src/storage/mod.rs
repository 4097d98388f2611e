pub mod file;
pub mod insights;
pub mod model;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::date_util;
use crate::error::{Error, Result};
use file::JsonFile;
use model::{ContextData, DailySnapshot, SnapshotField, SyncSource};

pub const CONTEXT_FILE: &str = "context_store.json";

/// Long enough to absorb a burst of request-path reads, short enough that
/// background writes from another handle show up promptly.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Handle to the daily context store (`context_store.json`).
///
/// One mutex owned by the store guards both the read cache and every file
/// operation, so a reader never sees a half-written file and two writers
/// never interleave a read-modify-write. Clones share the same lock and
/// cache. Separate `open` calls on the same directory do not: their writes
/// never fail or corrupt the file, and each reloads from disk first, but two
/// handles writing at the same instant are last-writer-wins. Share one
/// handle (clone it) between concurrent writers.
#[derive(Clone)]
pub struct ContextStore {
    inner: Arc<Inner>,
}

struct Inner {
    file: JsonFile<ContextData>,
    ttl: Duration,
    cache: Mutex<Option<Cached>>,
}

struct Cached {
    data: Arc<ContextData>,
    loaded_at: Instant,
}

/// Summary counts for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub snapshot_count: usize,
    pub insight_count: usize,
    pub active_insight_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl ContextStore {
    /// Open the store in `data_dir` with the default cache TTL. Nothing is
    /// read until first use.
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        Self::open_with_ttl(data_dir, DEFAULT_CACHE_TTL)
    }

    pub fn open_with_ttl(data_dir: impl AsRef<Path>, ttl: Duration) -> Self {
        let path = data_dir.as_ref().join(CONTEXT_FILE);
        Self {
            inner: Arc::new(Inner {
                file: JsonFile::new(path),
                ttl,
                cache: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        self.inner.file.path()
    }

    /// The data on disk is authoritative, so a panic in another holder
    /// leaves nothing in the cache worth protecting.
    fn lock(&self) -> MutexGuard<'_, Option<Cached>> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current aggregate, served from cache while it is within the TTL.
    pub(crate) fn read(&self) -> Arc<ContextData> {
        let mut cache = self.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < self.inner.ttl {
                return Arc::clone(&cached.data);
            }
        }

        log::debug!("Context cache miss, loading {}", self.path().display());
        let data = Arc::new(self.inner.file.load());
        *cache = Some(Cached {
            data: Arc::clone(&data),
            loaded_at: Instant::now(),
        });
        data
    }

    /// Apply one logical mutation under the lock: reload from disk, mutate,
    /// rewrite the whole file, then cache the written value. If `f` or the
    /// write fails, nothing is cached and the error is returned.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut ContextData) -> Result<R>) -> Result<R> {
        let mut cache = self.lock();

        let mut data = self.inner.file.load();
        let out = f(&mut data)?;
        data.last_sync = Some(Utc::now());

        self.inner.file.save(&data)?;
        *cache = Some(Cached {
            data: Arc::new(data),
            loaded_at: Instant::now(),
        });
        Ok(out)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub fn get(&self, date: NaiveDate) -> Option<DailySnapshot> {
        self.read().snapshots.get(&date).cloned()
    }

    /// Insert or replace the whole record for `snapshot.date`.
    pub fn upsert_snapshot(&self, mut snapshot: DailySnapshot) -> Result<()> {
        snapshot.last_updated = Utc::now();
        self.mutate(move |data| {
            data.snapshots.insert(snapshot.date, snapshot);
            Ok(())
        })
    }

    /// Atomically replace one section of a day's record and tag its source.
    ///
    /// Other sections and previously recorded sources are kept, so feeds
    /// that race on the same date never clobber each other.
    pub fn update_field(
        &self,
        date: NaiveDate,
        field: SnapshotField,
        source: SyncSource,
    ) -> Result<DailySnapshot> {
        self.mutate(move |data| {
            let snapshot = data
                .snapshots
                .entry(date)
                .or_insert_with(|| DailySnapshot::new(date));
            field.apply_to(snapshot);
            snapshot.sources_synced.insert(source);
            snapshot.last_updated = Utc::now();
            Ok(snapshot.clone())
        })
    }

    pub fn update_nutrition(
        &self,
        date: NaiveDate,
        nutrition: model::NutritionSnapshot,
    ) -> Result<DailySnapshot> {
        self.update_field(date, SnapshotField::Nutrition(nutrition), SyncSource::Nutrition)
    }

    pub fn update_health(
        &self,
        date: NaiveDate,
        health: model::HealthSnapshot,
    ) -> Result<DailySnapshot> {
        self.update_field(date, SnapshotField::Health(health), SyncSource::Health)
    }

    pub fn update_workout(
        &self,
        date: NaiveDate,
        workout: model::WorkoutSnapshot,
    ) -> Result<DailySnapshot> {
        self.update_field(date, SnapshotField::Workout(workout), SyncSource::Hevy)
    }

    /// Apply several sections to one date in a single critical section,
    /// each tagged with its default source. Used by the device day-sync,
    /// which delivers nutrition and health together.
    pub fn apply_day(&self, date: NaiveDate, fields: Vec<SnapshotField>) -> Result<DailySnapshot> {
        if fields.is_empty() {
            return Err(Error::InvalidInput(format!("no sections to apply for {date}")));
        }
        self.mutate(move |data| {
            let snapshot = data
                .snapshots
                .entry(date)
                .or_insert_with(|| DailySnapshot::new(date));
            for field in fields {
                snapshot.sources_synced.insert(field.default_source());
                field.apply_to(snapshot);
            }
            snapshot.last_updated = Utc::now();
            Ok(snapshot.clone())
        })
    }

    /// Snapshots with `start <= date <= end`, oldest first.
    pub fn range_query(&self, start: NaiveDate, end: NaiveDate) -> Vec<DailySnapshot> {
        if start > end {
            return Vec::new();
        }
        self.read()
            .snapshots
            .range(start..=end)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Snapshots for the last `days` days including today, oldest first.
    pub fn recent_snapshots(&self, days: u32) -> Vec<DailySnapshot> {
        self.recent_snapshots_from(date_util::today(), days)
    }

    pub fn recent_snapshots_from(&self, today: NaiveDate, days: u32) -> Vec<DailySnapshot> {
        let (start, end) = date_util::window_ending(today, days);
        self.range_query(start, end)
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Clear every snapshot and insight.
    pub fn reset(&self) -> Result<()> {
        log::warn!("Resetting context store at {}", self.path().display());
        let mut cache = self.lock();
        let data = ContextData::default();
        self.inner.file.save(&data)?;
        *cache = Some(Cached {
            data: Arc::new(data),
            loaded_at: Instant::now(),
        });
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let data = self.read();
        StoreStats {
            snapshot_count: data.snapshots.len(),
            insight_count: data.insights.len(),
            active_insight_count: data.insights.iter().filter(|i| !i.is_dismissed()).count(),
            first_date: data.snapshots.keys().next().copied(),
            last_date: data.snapshots.keys().next_back().copied(),
            last_sync: data.last_sync,
        }
    }
}

/// Resolve the data directory: explicit path, then `FITCONTEXT_DATA_DIR`,
/// then `~/.fitcontext`.
pub fn resolve_data_dir(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var("FITCONTEXT_DATA_DIR") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let dir = dirs::home_dir()
        .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
        .join(".fitcontext");
    Ok(dir)
}

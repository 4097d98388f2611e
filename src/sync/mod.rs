pub mod hevy;
pub mod rate_limit;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::storage::model::{ExerciseSummary, WorkoutSnapshot};
use crate::storage::ContextStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutSet {
    pub reps: u32,
    pub weight_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutExercise {
    pub name: String,
    pub sets: Vec<WorkoutSet>,
    pub notes: String,
}

/// One logged training session from an external tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workout {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub exercises: Vec<WorkoutExercise>,
    /// Sum of weight × reps over every set.
    pub total_volume_kg: f64,
    pub notes: String,
}

/// Where workout history comes from. The scheduler pulls it; nothing on the
/// request path does.
#[async_trait]
pub trait WorkoutSource: Send + Sync {
    /// Full available history, newest first as the provider returns it.
    async fn fetch_all(&self) -> Result<Vec<Workout>>;
}

/// Outcome of writing fetched workouts into the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub workouts: usize,
    pub days: usize,
}

/// Roll workouts up into one `WorkoutSnapshot` per local calendar day.
pub fn aggregate_workouts_by_day(workouts: &[Workout]) -> BTreeMap<NaiveDate, WorkoutSnapshot> {
    aggregate_workouts_by_day_in(workouts, &Local)
}

/// As [`aggregate_workouts_by_day`], bucketing by calendar day in `tz`.
pub fn aggregate_workouts_by_day_in<Tz: TimeZone>(
    workouts: &[Workout],
    tz: &Tz,
) -> BTreeMap<NaiveDate, WorkoutSnapshot> {
    let mut daily: BTreeMap<NaiveDate, WorkoutSnapshot> = BTreeMap::new();

    for workout in workouts {
        let date = workout.start_time.with_timezone(tz).date_naive();
        let day = daily.entry(date).or_default();

        day.workout_count += 1;
        day.total_duration_minutes += workout.duration_minutes;
        day.total_volume_kg += workout.total_volume_kg;
        day.workout_titles.push(workout.title.clone());

        for exercise in &workout.exercises {
            day.exercises.push(ExerciseSummary {
                name: exercise.name.clone(),
                sets: exercise.sets.len() as u32,
                total_reps: exercise.sets.iter().map(|s| s.reps).sum(),
                max_weight_kg: exercise
                    .sets
                    .iter()
                    .map(|s| s.weight_kg)
                    .fold(0.0, f64::max),
            });
        }
    }

    daily
}

/// Write workouts into the store, one workout section per day. Days not in
/// `workouts` are left alone.
pub fn apply_workouts(store: &ContextStore, workouts: &[Workout]) -> Result<SyncReport> {
    let daily = aggregate_workouts_by_day(workouts);
    let days = daily.len();
    for (date, snapshot) in daily {
        store.update_workout(date, snapshot)?;
    }
    log::info!("Synced {} workouts across {days} days", workouts.len());
    Ok(SyncReport {
        workouts: workouts.len(),
        days,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn workout(id: &str, start: &str, sets: &[(u32, f64)]) -> Workout {
        let sets: Vec<WorkoutSet> = sets
            .iter()
            .map(|&(reps, weight_kg)| WorkoutSet { reps, weight_kg })
            .collect();
        let total_volume_kg = sets.iter().map(|s| s.weight_kg * f64::from(s.reps)).sum();
        Workout {
            id: id.to_string(),
            title: format!("Session {id}"),
            start_time: DateTime::parse_from_rfc3339(start).unwrap().with_timezone(&Utc),
            duration_minutes: 45,
            exercises: vec![WorkoutExercise {
                name: "Squat".into(),
                sets,
                notes: String::new(),
            }],
            total_volume_kg,
            notes: String::new(),
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_aggregate_by_day() {
        let workouts = vec![
            workout("a", "2025-02-01T09:00:00Z", &[(5, 100.0), (5, 110.0)]),
            workout("b", "2025-02-01T18:00:00Z", &[(10, 60.0)]),
            workout("c", "2025-02-03T07:30:00Z", &[(12, 0.0)]),
        ];
        let daily = aggregate_workouts_by_day_in(&workouts, &Utc);

        assert_eq!(daily.len(), 2);
        let first = &daily[&d(2025, 2, 1)];
        assert_eq!(first.workout_count, 2);
        assert_eq!(first.total_duration_minutes, 90);
        assert_eq!(first.total_volume_kg, 1050.0 + 600.0);
        assert_eq!(first.workout_titles, vec!["Session a", "Session b"]);
        assert_eq!(first.exercises[0].sets, 2);
        assert_eq!(first.exercises[0].total_reps, 10);
        assert_eq!(first.exercises[0].max_weight_kg, 110.0);

        let bodyweight = &daily[&d(2025, 2, 3)];
        assert_eq!(bodyweight.exercises[0].max_weight_kg, 0.0);
        assert_eq!(bodyweight.total_volume_kg, 0.0);
    }

    #[test]
    fn test_aggregate_uses_given_timezone() {
        let workouts = vec![workout("late", "2025-02-01T23:30:00Z", &[(5, 100.0)])];
        let east = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let daily = aggregate_workouts_by_day_in(&workouts, &east);
        assert!(daily.contains_key(&d(2025, 2, 2)));
    }

    #[test]
    fn test_apply_workouts_tags_hevy_and_keeps_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::open(dir.path());
        // Midday UTC lands on the same calendar day in every offset up to ±11h.
        let workouts = vec![workout("a", "2025-02-01T12:00:00Z", &[(5, 100.0)])];
        let date = aggregate_workouts_by_day(&workouts)
            .keys()
            .next()
            .copied()
            .unwrap();

        store
            .update_nutrition(
                date,
                crate::storage::model::NutritionSnapshot {
                    calories: 2000,
                    ..Default::default()
                },
            )
            .unwrap();
        let report = apply_workouts(&store, &workouts).unwrap();
        assert_eq!(report, SyncReport { workouts: 1, days: 1 });

        let snap = store.get(date).unwrap();
        assert_eq!(snap.workout.workout_count, 1);
        assert_eq!(snap.nutrition.calories, 2000);
        assert!(snap.has_source(crate::storage::model::SyncSource::Hevy));
    }
}

//! Test utilities and helpers for unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Mock data factories
//! - Time helpers
//! - Helper assertions

use crate::models::{CompletedExercise, CompletedWorkout, MuscleCategory, SetEntry};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use sqlx::SqlitePool;

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

/// Working sets from (weight, reps) pairs
pub fn mock_sets(sets: &[(f64, u32)]) -> Vec<SetEntry> {
  sets.iter().map(|&(w, r)| SetEntry::new(w, r)).collect()
}

/// An exercise named after its id
pub fn mock_exercise(exercise_id: &str, category: MuscleCategory, sets: &[(f64, u32)]) -> CompletedExercise {
  CompletedExercise::new(exercise_id, exercise_id, category, mock_sets(sets))
}

/// A 45-minute workout finishing at `finished_at`
pub fn mock_workout_at(id: &str, finished_at: DateTime<Utc>, exercises: Vec<CompletedExercise>) -> CompletedWorkout {
  CompletedWorkout::new(
    id,
    format!("Workout {}", id),
    finished_at - Duration::minutes(45),
    finished_at,
    exercises,
  )
}

/// A workout finishing N days ago with one chest exercise
pub fn mock_workout(id: &str, days_ago: i64, sets: &[(f64, u32)]) -> CompletedWorkout {
  mock_workout_at(
    id,
    datetime_days_ago(days_ago),
    vec![mock_exercise("bench", MuscleCategory::Chest, sets)],
  )
}

/// ---------------------------------------------------------------------------
/// Time Helpers
/// ---------------------------------------------------------------------------

/// Create a DateTime N days ago from now
pub fn datetime_days_ago(days: i64) -> DateTime<Utc> {
  Utc::now() - Duration::days(days)
}

/// Noon on a local calendar day, as UTC. Noon keeps DST shifts on the same day.
pub fn local_noon(date: NaiveDate) -> DateTime<Utc> {
  let naive = date.and_hms_opt(12, 0, 0).expect("valid time");
  Local
    .from_local_datetime(&naive)
    .earliest()
    .expect("noon exists locally")
    .with_timezone(&Utc)
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('completed_workouts', 'exercise_records', 'personal_records', 'sync_state')"
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 4, "Expected 4 tables, got {}", tables.len());

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_mock_factories_create_valid_data() {
    let workout = mock_workout("w1", 1, &[(60.0, 10), (60.0, 8)]);
    assert_eq!(workout.total_sets, 2);
    assert_eq!(workout.total_volume, 1080.0);
    assert_eq!(workout.duration_seconds, 45 * 60);
    assert_eq!(workout.exercises[0].exercise_id, "bench");
  }

  #[test]
  fn test_local_noon_stays_on_date() {
    let date = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
    assert_eq!(local_noon(date).with_timezone(&Local).date_naive(), date);
  }
}

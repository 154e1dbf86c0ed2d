//! SQLite persistence for workouts and their derived history
//!
//! Completed workouts are stored one row each with the full payload as JSON.
//! Exercise records and personal records are written together as a snapshot
//! in one transaction so a restart always sees a consistent pair.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::history::HistoryAggregator;
use crate::models::{CompletedWorkout, ExerciseRecord, PersonalRecord, SyncState, MAX_RECORD_ENTRIES};

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Corrupt row: {0}")]
  Corrupt(String),

  #[error("IO error: {0}")]
  Io(String),
}

impl Serialize for StorageError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StorageError::Corrupt(format!("Bad timestamp '{}': {}", value, e)))
}

/// ---------------------------------------------------------------------------
/// Completed Workouts
/// ---------------------------------------------------------------------------

async fn upsert_workout(
  conn: &mut SqliteConnection,
  workout: &CompletedWorkout,
  synced: bool,
) -> Result<(), StorageError> {
  let payload = serde_json::to_string(workout)?;

  sqlx::query(
    r#"
    INSERT INTO completed_workouts (id, name, started_at, finished_at, payload_json, synced)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id) DO UPDATE SET
      name = excluded.name,
      started_at = excluded.started_at,
      finished_at = excluded.finished_at,
      payload_json = excluded.payload_json,
      synced = excluded.synced
    "#,
  )
  .bind(&workout.id)
  .bind(&workout.name)
  .bind(format_timestamp(&workout.started_at))
  .bind(format_timestamp(&workout.finished_at))
  .bind(&payload)
  .bind(synced)
  .execute(conn)
  .await?;

  Ok(())
}

async fn insert_missing_workouts(
  conn: &mut SqliteConnection,
  workouts: &[CompletedWorkout],
) -> Result<u64, StorageError> {
  let mut inserted = 0;

  for workout in workouts {
    let payload = serde_json::to_string(workout)?;
    let result = sqlx::query(
      r#"
      INSERT OR IGNORE INTO completed_workouts (id, name, started_at, finished_at, payload_json, synced)
      VALUES (?1, ?2, ?3, ?4, ?5, 1)
      "#,
    )
    .bind(&workout.id)
    .bind(&workout.name)
    .bind(format_timestamp(&workout.started_at))
    .bind(format_timestamp(&workout.finished_at))
    .bind(&payload)
    .execute(&mut *conn)
    .await?;
    inserted += result.rows_affected();
  }

  Ok(inserted)
}

async fn delete_workout_row(conn: &mut SqliteConnection, workout_id: &str) -> Result<bool, StorageError> {
  let result = sqlx::query("DELETE FROM completed_workouts WHERE id = ?1")
    .bind(workout_id)
    .execute(conn)
    .await?;
  Ok(result.rows_affected() > 0)
}

/// Insert or replace one workout
pub async fn save_workout(
  pool: &SqlitePool,
  workout: &CompletedWorkout,
  synced: bool,
) -> Result<(), StorageError> {
  let mut tx = pool.begin().await?;
  upsert_workout(&mut *tx, workout, synced).await?;
  tx.commit().await?;
  Ok(())
}

/// Store workouts that came from the cloud. Existing rows are left alone.
pub async fn import_workouts(
  pool: &SqlitePool,
  workouts: &[CompletedWorkout],
) -> Result<u64, StorageError> {
  let mut tx = pool.begin().await?;
  let inserted = insert_missing_workouts(&mut *tx, workouts).await?;
  tx.commit().await?;
  Ok(inserted)
}

/// All workouts, most recent first
pub async fn load_workouts(pool: &SqlitePool) -> Result<Vec<CompletedWorkout>, StorageError> {
  let rows = sqlx::query("SELECT payload_json FROM completed_workouts ORDER BY finished_at DESC")
    .fetch_all(pool)
    .await?;

  let mut workouts = Vec::with_capacity(rows.len());
  for row in rows {
    let payload: String = row.get("payload_json");
    workouts.push(serde_json::from_str(&payload)?);
  }
  Ok(workouts)
}

pub async fn delete_workout(pool: &SqlitePool, workout_id: &str) -> Result<bool, StorageError> {
  let mut tx = pool.begin().await?;
  let deleted = delete_workout_row(&mut *tx, workout_id).await?;
  tx.commit().await?;
  Ok(deleted)
}

pub async fn unsynced_workout_ids(pool: &SqlitePool) -> Result<Vec<String>, StorageError> {
  let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM completed_workouts WHERE synced = 0 ORDER BY finished_at")
    .fetch_all(pool)
    .await?;
  Ok(ids)
}

pub async fn mark_synced(pool: &SqlitePool, workout_ids: &[String]) -> Result<(), StorageError> {
  let mut tx = pool.begin().await?;
  for id in workout_ids {
    sqlx::query("UPDATE completed_workouts SET synced = 1 WHERE id = ?1")
      .bind(id)
      .execute(&mut *tx)
      .await?;
  }
  tx.commit().await?;
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Derived History Snapshot
/// ---------------------------------------------------------------------------

/// Replace stored exercise records and personal records with the aggregator's
async fn write_snapshot(conn: &mut SqliteConnection, history: &HistoryAggregator) -> Result<(), StorageError> {
  sqlx::query("DELETE FROM exercise_records").execute(&mut *conn).await?;
  for record in history.exercise_records() {
    sqlx::query("INSERT INTO exercise_records (exercise_id, record_json) VALUES (?1, ?2)")
      .bind(&record.exercise_id)
      .bind(serde_json::to_string(record)?)
      .execute(&mut *conn)
      .await?;
  }

  sqlx::query("DELETE FROM personal_records").execute(&mut *conn).await?;
  for (position, pr) in history.personal_records_in_creation_order().iter().enumerate() {
    sqlx::query(
      r#"
      INSERT INTO personal_records (
        exercise_id, position, exercise_name, max_weight,
        max_reps_at_weight, estimated_one_rep_max, achieved_at
      )
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
      "#,
    )
    .bind(&pr.exercise_id)
    .bind(position as i64)
    .bind(&pr.exercise_name)
    .bind(pr.max_weight)
    .bind(pr.max_reps_at_weight as i64)
    .bind(pr.estimated_one_rep_max)
    .bind(format_timestamp(&pr.achieved_at))
    .execute(&mut *conn)
    .await?;
  }

  Ok(())
}

pub async fn save_snapshot(pool: &SqlitePool, history: &HistoryAggregator) -> Result<(), StorageError> {
  let mut tx = pool.begin().await?;
  write_snapshot(&mut *tx, history).await?;
  tx.commit().await?;
  debug!("Saved history snapshot");
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Atomic Writes: workout rows and the snapshot derived from them
/// ---------------------------------------------------------------------------

/// Save a newly completed workout together with the aggregator that includes it
pub async fn commit_workout(
  pool: &SqlitePool,
  workout: &CompletedWorkout,
  synced: bool,
  history: &HistoryAggregator,
) -> Result<(), StorageError> {
  let mut tx = pool.begin().await?;
  upsert_workout(&mut *tx, workout, synced).await?;
  write_snapshot(&mut *tx, history).await?;
  tx.commit().await?;
  debug!(workout_id = %workout.id, "Committed workout with snapshot");
  Ok(())
}

/// Import merged workouts together with the aggregator rebuilt from them
pub async fn commit_import(
  pool: &SqlitePool,
  workouts: &[CompletedWorkout],
  history: &HistoryAggregator,
) -> Result<u64, StorageError> {
  let mut tx = pool.begin().await?;
  let inserted = insert_missing_workouts(&mut *tx, workouts).await?;
  write_snapshot(&mut *tx, history).await?;
  tx.commit().await?;
  debug!(inserted, "Committed import with snapshot");
  Ok(inserted)
}

/// Delete a workout together with the aggregator rebuilt without it
pub async fn commit_deletion(
  pool: &SqlitePool,
  workout_id: &str,
  history: &HistoryAggregator,
) -> Result<bool, StorageError> {
  let mut tx = pool.begin().await?;
  let deleted = delete_workout_row(&mut *tx, workout_id).await?;
  write_snapshot(&mut *tx, history).await?;
  tx.commit().await?;
  Ok(deleted)
}

pub async fn load_exercise_records(pool: &SqlitePool) -> Result<Vec<ExerciseRecord>, StorageError> {
  let rows = sqlx::query("SELECT record_json FROM exercise_records ORDER BY exercise_id")
    .fetch_all(pool)
    .await?;

  let mut records = Vec::with_capacity(rows.len());
  for row in rows {
    let json: String = row.get("record_json");
    records.push(serde_json::from_str(&json)?);
  }
  Ok(records)
}

/// Personal records in creation order
pub async fn load_personal_records(pool: &SqlitePool) -> Result<Vec<PersonalRecord>, StorageError> {
  let rows = sqlx::query(
    r#"
    SELECT exercise_id, exercise_name, max_weight, max_reps_at_weight,
           estimated_one_rep_max, achieved_at
    FROM personal_records
    ORDER BY position
    "#,
  )
  .fetch_all(pool)
  .await?;

  let mut records = Vec::with_capacity(rows.len());
  for row in rows {
    let achieved_at: String = row.get("achieved_at");
    let reps: i64 = row.get("max_reps_at_weight");
    records.push(PersonalRecord {
      exercise_id: row.get("exercise_id"),
      exercise_name: row.get("exercise_name"),
      max_weight: row.get("max_weight"),
      max_reps_at_weight: reps.max(0) as u32,
      achieved_at: parse_timestamp(&achieved_at)?,
      estimated_one_rep_max: row.get("estimated_one_rep_max"),
    });
  }
  Ok(records)
}

/// Restore an aggregator from disk.
///
/// When the snapshot does not cover the stored workouts (first run after an
/// import, or rows written outside `commit_*`) everything is rebuilt from the
/// workouts.
pub async fn load_history(pool: &SqlitePool) -> Result<HistoryAggregator, StorageError> {
  let workouts = load_workouts(pool).await?;
  let records = load_exercise_records(pool).await?;
  let prs = load_personal_records(pool).await?;

  if !snapshot_matches(&workouts, &records) {
    warn!(workouts = workouts.len(), "History snapshot out of date, rebuilding");
    return Ok(HistoryAggregator::rebuild(workouts));
  }

  Ok(HistoryAggregator::from_parts(workouts, records, prs))
}

/// Every record entry points at a stored workout, and every exercise of every
/// workout has its entry unless the cap has already evicted sessions that old.
fn snapshot_matches(workouts: &[CompletedWorkout], records: &[ExerciseRecord]) -> bool {
  let workout_ids: HashSet<&str> = workouts.iter().map(|w| w.id.as_str()).collect();
  let orphaned = records
    .iter()
    .flat_map(|r| &r.records)
    .any(|entry| !workout_ids.contains(entry.workout_id.as_str()));
  if orphaned {
    return false;
  }

  let by_exercise: HashMap<&str, &ExerciseRecord> =
    records.iter().map(|r| (r.exercise_id.as_str(), r)).collect();

  workouts.iter().all(|workout| {
    workout.exercises.iter().all(|exercise| match by_exercise.get(exercise.exercise_id.as_str()) {
      Some(record) => {
        record.records.iter().any(|entry| entry.workout_id == workout.id)
          || (record.records.len() >= MAX_RECORD_ENTRIES
            && record
              .records
              .last()
              .map_or(false, |oldest| workout.finished_at <= oldest.date))
      }
      None => false,
    })
  })
}

/// Bulk clear of workouts and everything derived from them
pub async fn clear_history(pool: &SqlitePool) -> Result<(), StorageError> {
  let mut tx = pool.begin().await?;
  sqlx::query("DELETE FROM completed_workouts").execute(&mut *tx).await?;
  sqlx::query("DELETE FROM exercise_records").execute(&mut *tx).await?;
  sqlx::query("DELETE FROM personal_records").execute(&mut *tx).await?;
  tx.commit().await?;
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Sync State
/// ---------------------------------------------------------------------------

pub async fn load_sync_state(pool: &SqlitePool) -> Result<SyncState, StorageError> {
  let row = sqlx::query("SELECT last_sync_at, last_remote_count FROM sync_state WHERE id = 1")
    .fetch_optional(pool)
    .await?;

  match row {
    Some(row) => {
      let last_sync_at: Option<String> = row.get("last_sync_at");
      Ok(SyncState {
        last_sync_at: last_sync_at.as_deref().map(parse_timestamp).transpose()?,
        last_remote_count: row.get("last_remote_count"),
      })
    }
    None => Ok(SyncState::default()),
  }
}

pub async fn save_sync_state(pool: &SqlitePool, state: &SyncState) -> Result<(), StorageError> {
  sqlx::query(
    r#"
    INSERT INTO sync_state (id, last_sync_at, last_remote_count)
    VALUES (1, ?1, ?2)
    ON CONFLICT(id) DO UPDATE SET
      last_sync_at = excluded.last_sync_at,
      last_remote_count = excluded.last_remote_count
    "#,
  )
  .bind(state.last_sync_at.as_ref().map(format_timestamp))
  .bind(state.last_remote_count)
  .execute(pool)
  .await?;
  Ok(())
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::MuscleCategory;
  use crate::test_utils::*;

  #[tokio::test]
  async fn test_workout_roundtrip_most_recent_first() {
    let pool = setup_test_db().await;

    save_workout(&pool, &mock_workout("old", 3, &[(60.0, 10)]), false).await.expect("save old");
    save_workout(&pool, &mock_workout("new", 1, &[(62.5, 8)]), false).await.expect("save new");

    let workouts = load_workouts(&pool).await.expect("load");
    assert_eq!(workouts.len(), 2);
    assert_eq!(workouts[0].id, "new");
    assert_eq!(workouts[0].exercises[0].sets[0].weight, 62.5);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_snapshot_roundtrip_preserves_pr_order() {
    let pool = setup_test_db().await;
    let mut history = HistoryAggregator::new();
    history.ingest(mock_workout_at(
      "w1",
      datetime_days_ago(1),
      vec![
        mock_exercise("row", MuscleCategory::Back, &[(70.0, 8)]),
        mock_exercise("press", MuscleCategory::Shoulders, &[(70.0, 5)]),
      ],
    ));
    save_workout(&pool, &history.workouts()[0], true).await.expect("save workout");
    save_snapshot(&pool, &history).await.expect("save snapshot");

    let restored = load_history(&pool).await.expect("load history");
    assert_eq!(restored.workouts(), history.workouts());
    assert_eq!(
      restored.exercise_history("row"),
      history.exercise_history("row")
    );
    let ids: Vec<&str> = restored
      .all_personal_records()
      .iter()
      .map(|pr| pr.exercise_id.as_str())
      .collect();
    assert_eq!(ids, vec!["row", "press"]);
    assert_eq!(
      restored.personal_record("row").unwrap().achieved_at,
      history.personal_record("row").unwrap().achieved_at
    );

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_missing_snapshot_rebuilds_from_workouts() {
    let pool = setup_test_db().await;
    save_workout(&pool, &mock_workout("w1", 2, &[(80.0, 5)]), false).await.expect("save");

    let history = load_history(&pool).await.expect("load");
    assert_eq!(history.personal_record("bench").unwrap().max_weight, 80.0);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_lagging_snapshot_is_rebuilt_on_load() {
    let pool = setup_test_db().await;

    let mut history = HistoryAggregator::new();
    let first = mock_workout("w1", 2, &[(60.0, 10)]);
    history.ingest(first.clone());
    commit_workout(&pool, &first, false, &history).await.expect("commit w1");

    // Row written without its snapshot
    save_workout(&pool, &mock_workout("w2", 1, &[(100.0, 5)]), false).await.expect("save w2");

    let restored = load_history(&pool).await.expect("load");
    assert_eq!(restored.workouts().len(), 2);
    assert_eq!(restored.exercise_history("bench").unwrap().records.len(), 2);
    assert_eq!(restored.personal_record("bench").unwrap().max_weight, 100.0);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_snapshot_pointing_at_deleted_workout_is_rebuilt() {
    let pool = setup_test_db().await;

    let mut history = HistoryAggregator::new();
    for workout in [mock_workout("w1", 2, &[(60.0, 10)]), mock_workout("w2", 1, &[(100.0, 5)])] {
      history.ingest(workout.clone());
      commit_workout(&pool, &workout, false, &history).await.expect("commit");
    }

    // Row removed without rewriting the snapshot
    assert!(delete_workout(&pool, "w2").await.unwrap());

    let restored = load_history(&pool).await.expect("load");
    assert_eq!(restored.exercise_history("bench").unwrap().records.len(), 1);
    assert_eq!(restored.personal_record("bench").unwrap().max_weight, 60.0);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_commit_import_and_deletion_keep_snapshot_in_step() {
    let pool = setup_test_db().await;
    let workouts = vec![mock_workout("a", 3, &[(70.0, 8)]), mock_workout("b", 1, &[(75.0, 8)])];

    let history = HistoryAggregator::rebuild(workouts.clone());
    assert_eq!(commit_import(&pool, &workouts, &history).await.expect("import"), 2);
    assert_eq!(load_exercise_records(&pool).await.unwrap()[0].records.len(), 2);

    let mut without_b = history.clone();
    assert!(without_b.remove_workout("b"));
    assert!(commit_deletion(&pool, "b", &without_b).await.expect("delete"));

    let restored = load_history(&pool).await.expect("load");
    assert_eq!(restored, without_b);
    assert_eq!(load_personal_records(&pool).await.unwrap()[0].max_weight, 70.0);

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_snapshot_matches_tolerates_evicted_sessions() {
    let workouts: Vec<CompletedWorkout> = (0..MAX_RECORD_ENTRIES as i64 + 5)
      .map(|i| mock_workout(&format!("w{}", i), i + 1, &[(60.0, 10)]))
      .collect();
    let history = HistoryAggregator::rebuild(workouts);
    let records: Vec<ExerciseRecord> = history.exercise_records().cloned().collect();

    assert_eq!(records[0].records.len(), MAX_RECORD_ENTRIES);
    assert!(snapshot_matches(history.workouts(), &records));
    assert!(!snapshot_matches(history.workouts(), &[]));
  }

  #[tokio::test]
  async fn test_import_skips_existing_and_tracks_sync_flags() {
    let pool = setup_test_db().await;
    save_workout(&pool, &mock_workout("local", 2, &[(80.0, 5)]), false).await.expect("save");

    let inserted = import_workouts(
      &pool,
      &[mock_workout("local", 2, &[(999.0, 1)]), mock_workout("remote", 1, &[(85.0, 5)])],
    )
    .await
    .expect("import");
    assert_eq!(inserted, 1);

    let workouts = load_workouts(&pool).await.expect("load");
    let local = workouts.iter().find(|w| w.id == "local").unwrap();
    assert_eq!(local.exercises[0].sets[0].weight, 80.0);

    assert_eq!(unsynced_workout_ids(&pool).await.unwrap(), vec!["local".to_string()]);
    mark_synced(&pool, &["local".to_string()]).await.expect("mark");
    assert!(unsynced_workout_ids(&pool).await.unwrap().is_empty());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_delete_and_clear() {
    let pool = setup_test_db().await;
    save_workout(&pool, &mock_workout("w1", 2, &[(80.0, 5)]), false).await.expect("save");
    save_workout(&pool, &mock_workout("w2", 1, &[(80.0, 5)]), false).await.expect("save");

    assert!(delete_workout(&pool, "w1").await.unwrap());
    assert!(!delete_workout(&pool, "w1").await.unwrap());

    let history = load_history(&pool).await.unwrap();
    save_snapshot(&pool, &history).await.unwrap();
    clear_history(&pool).await.expect("clear");

    assert!(load_workouts(&pool).await.unwrap().is_empty());
    assert!(load_exercise_records(&pool).await.unwrap().is_empty());
    assert!(load_personal_records(&pool).await.unwrap().is_empty());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_sync_state_roundtrip() {
    let pool = setup_test_db().await;

    let initial = load_sync_state(&pool).await.expect("load");
    assert_eq!(initial, SyncState::default());

    let state = SyncState {
      last_sync_at: Some(datetime_days_ago(0)),
      last_remote_count: 12,
    };
    save_sync_state(&pool, &state).await.expect("save");

    let reloaded = load_sync_state(&pool).await.expect("reload");
    assert_eq!(reloaded.last_remote_count, 12);
    assert_eq!(reloaded.last_sync_at, state.last_sync_at);

    teardown_test_db(pool).await;
  }
}

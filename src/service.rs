//! Workout Log Service
//!
//! One `WorkoutLog` per user session. It owns the in-memory aggregator and
//! writes every change through to SQLite before it becomes visible, with the
//! cloud as a best-effort mirror.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::achievements::AchievementSummary;
use crate::cloud::{merge_workouts, CloudClient, CloudError};
use crate::config::{AppConfig, ConfigError};
use crate::db::{self, DbPool};
use crate::history::{HistoryAggregator, IngestReport};
use crate::models::{CompletedWorkout, ProfileId, SyncState};
use crate::recommendation::{self, Recommendation, RecommendationPolicy, RepRange};
use crate::storage::{self, StorageError};

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorkoutLogError {
  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Cloud(#[from] CloudError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("Cloud sync is not configured")]
  CloudDisabled,
}

impl Serialize for WorkoutLogError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// Result of a cloud sync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
  pub fetched: usize,
  /// Remote workouts that were new locally
  pub imported: u64,
  /// Local workouts uploaded because the cloud lacked them
  pub pushed: usize,
  pub total_workouts: usize,
}

/// ---------------------------------------------------------------------------
/// Workout Log
/// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WorkoutLog {
  db: DbPool,
  history: HistoryAggregator,
  cloud: Option<(CloudClient, String)>,
  active_profile: Option<ProfileId>,
  rep_range: RepRange,
  policy: RecommendationPolicy,
}

impl WorkoutLog {
  /// Open the database at the configured path and restore history
  pub async fn open(config: &AppConfig) -> Result<Self, WorkoutLogError> {
    let pool = db::initialize_db(&config.database_path).await?;
    Self::with_pool(pool, config).await
  }

  /// Restore history from an already-migrated pool
  pub async fn with_pool(pool: DbPool, config: &AppConfig) -> Result<Self, WorkoutLogError> {
    let history = storage::load_history(&pool).await?;

    let cloud = match (&config.cloud, &config.user_id) {
      (Some(cloud_config), Some(user_id)) => {
        Some((CloudClient::new(cloud_config.clone())?, user_id.clone()))
      }
      (Some(_), None) => {
        warn!("Cloud URL configured without LIFTLOG_USER_ID, sync disabled");
        None
      }
      _ => None,
    };

    info!(
      workouts = history.workouts().len(),
      cloud = cloud.is_some(),
      "Workout log ready"
    );

    Ok(Self {
      db: pool,
      history,
      cloud,
      active_profile: config.active_profile.clone(),
      rep_range: config.rep_range,
      policy: config.policy.clone(),
    })
  }

  pub fn pool(&self) -> &DbPool {
    &self.db
  }

  /// The whole log, across profiles
  pub fn history(&self) -> &HistoryAggregator {
    &self.history
  }

  /// The log as the active profile sees it
  pub fn profile_view(&self) -> Cow<'_, HistoryAggregator> {
    match &self.active_profile {
      Some(profile) => Cow::Owned(self.history.for_profile(profile)),
      None => Cow::Borrowed(&self.history),
    }
  }

  pub fn active_profile(&self) -> Option<&ProfileId> {
    self.active_profile.as_ref()
  }

  pub fn set_active_profile(&mut self, profile: Option<ProfileId>) {
    self.active_profile = profile;
  }

  pub fn rep_range(&self) -> RepRange {
    self.rep_range
  }

  pub fn set_rep_range(&mut self, range: RepRange) {
    debug!(%range, "Rep range updated");
    self.rep_range = range;
  }

  pub fn policy(&self) -> &RecommendationPolicy {
    &self.policy
  }

  // ---------------------------------------------------------------------------
  // Mutations
  // ---------------------------------------------------------------------------

  /// Record a finished workout.
  ///
  /// The aggregator only changes once the workout and snapshot are on disk.
  pub async fn complete_workout(
    &mut self,
    mut workout: CompletedWorkout,
  ) -> Result<IngestReport, WorkoutLogError> {
    if self.history.workout(&workout.id).is_some() {
      warn!(workout_id = %workout.id, "Workout already recorded, ignoring");
      return Ok(IngestReport::default());
    }

    workout.recompute_totals();

    let mut next = self.history.clone();
    let report = next.ingest(workout.clone());

    storage::commit_workout(&self.db, &workout, false, &next).await?;
    self.history = next;

    info!(
      workout_id = %workout.id,
      exercises = report.exercises_recorded,
      new_prs = report.new_personal_records.len(),
      "Workout completed"
    );

    if let Some((client, user_id)) = &self.cloud {
      match client.save_workout(user_id, &workout).await {
        Ok(()) => storage::mark_synced(&self.db, &[workout.id.clone()]).await?,
        Err(e) => warn!(workout_id = %workout.id, "Cloud save failed, will retry on next sync: {}", e),
      }
    }

    Ok(report)
  }

  /// Delete one workout and rebuild everything derived from it
  pub async fn delete_workout(&mut self, workout_id: &str) -> Result<bool, WorkoutLogError> {
    let mut next = self.history.clone();
    if !next.remove_workout(workout_id) {
      return Ok(false);
    }

    storage::commit_deletion(&self.db, workout_id, &next).await?;
    self.history = next;

    info!(workout_id, "Workout deleted");
    Ok(true)
  }

  /// Drop all workouts, records and personal records
  pub async fn clear_history(&mut self) -> Result<(), WorkoutLogError> {
    storage::clear_history(&self.db).await?;
    self.history.clear();
    info!("History cleared");
    Ok(())
  }

  /// Merge the cloud copy into the local log.
  ///
  /// Records and PRs are rebuilt from the merged list in chronological order,
  /// then any local workout the cloud lacks is uploaded.
  pub async fn sync_from_cloud(&mut self) -> Result<SyncReport, WorkoutLogError> {
    let (client, user_id) = self.cloud.as_ref().ok_or(WorkoutLogError::CloudDisabled)?;

    let remote = client.fetch_workouts(user_id).await?;
    let fetched = remote.len();
    let remote_ids: HashSet<String> = remote.iter().map(|w| w.id.clone()).collect();

    let mut merged = merge_workouts(self.history.workouts().to_vec(), remote);
    for workout in &mut merged {
      workout.recompute_totals();
    }

    let next = HistoryAggregator::rebuild(merged.clone());
    let imported = storage::commit_import(&self.db, &merged, &next).await?;
    storage::save_sync_state(
      &self.db,
      &SyncState {
        last_sync_at: Some(Utc::now()),
        last_remote_count: fetched as i64,
      },
    )
    .await?;
    self.history = next;

    let unsynced = storage::unsynced_workout_ids(&self.db).await?;
    let already_remote: Vec<String> = unsynced
      .iter()
      .filter(|id| remote_ids.contains(*id))
      .cloned()
      .collect();
    storage::mark_synced(&self.db, &already_remote).await?;

    let mut pushed = Vec::new();
    for workout in self.history.workouts().iter().filter(|w| !remote_ids.contains(&w.id)) {
      match client.save_workout(user_id, workout).await {
        Ok(()) => pushed.push(workout.id.clone()),
        Err(e) => warn!(workout_id = %workout.id, "Failed to push workout: {}", e),
      }
    }
    storage::mark_synced(&self.db, &pushed).await?;

    let report = SyncReport {
      fetched,
      imported,
      pushed: pushed.len(),
      total_workouts: self.history.workouts().len(),
    };

    info!(
      fetched = report.fetched,
      imported = report.imported,
      pushed = report.pushed,
      "Cloud sync complete"
    );

    Ok(report)
  }

  // ---------------------------------------------------------------------------
  // Reads
  // ---------------------------------------------------------------------------

  /// Today's suggestion for one exercise, from the active profile's history
  pub fn today_recommendation(&self, exercise_id: &str) -> Option<Recommendation> {
    let record = match &self.active_profile {
      Some(profile) => Cow::Owned(self.history.exercise_history_for_profile(exercise_id, profile)?),
      None => Cow::Borrowed(self.history.exercise_history(exercise_id)?),
    };
    recommendation::today_recommendation(
      Some(record.records.as_slice()),
      record.category,
      self.rep_range,
      &self.policy,
    )
  }

  pub fn achievements(&self, today: NaiveDate) -> AchievementSummary {
    AchievementSummary::compute(&self.profile_view(), today)
  }

  pub async fn sync_state(&self) -> Result<SyncState, WorkoutLogError> {
    Ok(storage::load_sync_state(&self.db).await?)
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

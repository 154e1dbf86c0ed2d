use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workout::{sanitize_weight, CompletedExercise, MuscleCategory, SetEntry};

/// Most recent sessions kept per exercise. Older entries are evicted by age.
pub const MAX_RECORD_ENTRIES: usize = 50;

/// Epley estimate: weight * (1 + reps / 30)
pub fn estimate_one_rep_max(weight: f64, reps: u32) -> f64 {
  let weight = sanitize_weight(weight);
  if reps == 0 {
    return 0.0;
  }
  weight * (1.0 + reps as f64 / 30.0)
}

/// ---------------------------------------------------------------------------
/// Exercise Record Entry: one exercise within one workout
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRecordEntry {
  pub workout_id: String,
  pub date: DateTime<Utc>,
  pub max_weight: f64,
  /// Best rep count achieved at `max_weight`
  pub max_reps_at_weight: u32,
  pub total_volume: f64,
  pub total_sets: u32,
  pub total_reps: u32,
  pub sets: Vec<SetEntry>,
}

impl ExerciseRecordEntry {
  /// Summarize one exercise's sets.
  ///
  /// The heaviest weight wins; among sets at that weight the highest rep count
  /// wins. Sets with no reps never count as the best weight. Volume counts
  /// every set, warmups and dropsets included.
  pub fn from_exercise(workout_id: &str, date: DateTime<Utc>, exercise: &CompletedExercise) -> Self {
    let mut max_weight = 0.0_f64;
    let mut max_reps_at_weight = 0_u32;
    let mut total_volume = 0.0;
    let mut total_reps = 0_u32;

    for set in &exercise.sets {
      let weight = sanitize_weight(set.weight);
      total_volume += weight * set.reps as f64;
      total_reps = total_reps.saturating_add(set.reps);

      if set.reps == 0 {
        continue;
      }
      if weight > max_weight {
        max_weight = weight;
        max_reps_at_weight = set.reps;
      } else if weight == max_weight && set.reps > max_reps_at_weight {
        max_reps_at_weight = set.reps;
      }
    }

    Self {
      workout_id: workout_id.to_string(),
      date,
      max_weight,
      max_reps_at_weight,
      total_volume,
      total_sets: exercise.sets.len() as u32,
      total_reps,
      sets: exercise.sets.clone(),
    }
  }

  pub fn average_reps(&self) -> f64 {
    if self.total_sets == 0 {
      0.0
    } else {
      self.total_reps as f64 / self.total_sets as f64
    }
  }

  pub fn min_reps(&self) -> u32 {
    self.sets.iter().map(|s| s.reps).min().unwrap_or(0)
  }
}

/// ---------------------------------------------------------------------------
/// Exercise Record: per-exercise history, most recent first
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRecord {
  pub exercise_id: String,
  pub exercise_name: String,
  pub category: MuscleCategory,
  pub records: Vec<ExerciseRecordEntry>,
}

impl ExerciseRecord {
  pub fn new(exercise_id: &str, exercise_name: &str, category: MuscleCategory) -> Self {
    Self {
      exercise_id: exercise_id.to_string(),
      exercise_name: exercise_name.to_string(),
      category,
      records: Vec::new(),
    }
  }

  /// Insert keeping most-recent-first order, then evict beyond the cap.
  /// An entry dated the same as an existing one goes in front of it.
  pub fn push_entry(&mut self, entry: ExerciseRecordEntry) {
    let position = self
      .records
      .iter()
      .position(|existing| existing.date <= entry.date)
      .unwrap_or(self.records.len());
    self.records.insert(position, entry);
    self.records.truncate(MAX_RECORD_ENTRIES);
  }

  pub fn latest(&self) -> Option<&ExerciseRecordEntry> {
    self.records.first()
  }
}

/// ---------------------------------------------------------------------------
/// Personal Record
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalRecord {
  pub exercise_id: String,
  pub exercise_name: String,
  pub max_weight: f64,
  pub max_reps_at_weight: u32,
  pub achieved_at: DateTime<Utc>,
  pub estimated_one_rep_max: f64,
}

impl PersonalRecord {
  pub fn from_entry(exercise_id: &str, exercise_name: &str, entry: &ExerciseRecordEntry) -> Self {
    Self {
      exercise_id: exercise_id.to_string(),
      exercise_name: exercise_name.to_string(),
      max_weight: entry.max_weight,
      max_reps_at_weight: entry.max_reps_at_weight,
      achieved_at: entry.date,
      estimated_one_rep_max: estimate_one_rep_max(entry.max_weight, entry.max_reps_at_weight),
    }
  }

  /// Strictly heavier, or the same weight for strictly more reps
  pub fn is_beaten_by(&self, entry: &ExerciseRecordEntry) -> bool {
    entry.max_weight > self.max_weight
      || (entry.max_weight == self.max_weight && entry.max_reps_at_weight > self.max_reps_at_weight)
  }

  /// Replace with the entry's best if it beats the record. Returns whether it did.
  pub fn update_from(&mut self, entry: &ExerciseRecordEntry) -> bool {
    if !self.is_beaten_by(entry) {
      return false;
    }
    self.max_weight = entry.max_weight;
    self.max_reps_at_weight = entry.max_reps_at_weight;
    self.achieved_at = entry.date;
    self.estimated_one_rep_max = estimate_one_rep_max(entry.max_weight, entry.max_reps_at_weight);
    true
  }
}

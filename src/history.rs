//! Workout History Aggregator
//!
//! Owns everything derived from completed workouts:
//! - per-exercise record history (most recent first, capped)
//! - personal records (monotonic: heavier, or same weight for more reps)
//! - rollups: streaks, rolling 7-day category load, week/month summaries
//!
//! All mutation goes through `ingest`, `remove_workout` and `clear`. Reads are
//! pure. Profile-scoped views are separate aggregators rebuilt from each
//! workout's profile view.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{
    CompletedExercise, CompletedWorkout, ExerciseRecord, ExerciseRecordEntry, MuscleCategory, PersonalRecord,
    ProfileId,
};

/// Length of the rolling window used for category load
pub const ROLLING_WINDOW_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
/// Ingest result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub exercises_recorded: usize,
    /// Exercise ids whose personal record was created or improved
    pub new_personal_records: Vec<String>,
}

// ---------------------------------------------------------------------------
/// Rollup types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsPeriod {
    /// Calendar week starting Monday
    Week,
    /// Calendar month
    Month,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub workouts: u32,
    pub total_sets: u32,
    pub total_volume: f64,
    pub total_duration_seconds: i64,
}

impl PeriodSummary {
    fn add(&mut self, workout: &CompletedWorkout) {
        self.workouts += 1;
        self.total_sets += workout.total_sets;
        self.total_volume += workout.total_volume;
        self.total_duration_seconds += workout.duration_seconds;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: MuscleCategory,
    pub sets: u32,
    /// Share of all sets, 0-100
    pub percentage: f64,
}

// ---------------------------------------------------------------------------
/// History Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryAggregator {
    /// Most recent first
    workouts: Vec<CompletedWorkout>,
    exercise_records: BTreeMap<String, ExerciseRecord>,
    /// Creation order; display order is derived on read
    personal_records: Vec<PersonalRecord>,
}

impl HistoryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore previously persisted state as-is
    pub fn from_parts(
        mut workouts: Vec<CompletedWorkout>,
        exercise_records: Vec<ExerciseRecord>,
        personal_records: Vec<PersonalRecord>,
    ) -> Self {
        workouts.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        for workout in &mut workouts {
            workout.recompute_totals();
        }
        Self {
            workouts,
            exercise_records: exercise_records
                .into_iter()
                .map(|r| (r.exercise_id.clone(), r))
                .collect(),
            personal_records,
        }
    }

    /// Recompute everything from scratch by ingesting in chronological order.
    /// Used after a cloud merge or a deletion so PRs hold regardless of the
    /// order workouts originally arrived in.
    pub fn rebuild(mut workouts: Vec<CompletedWorkout>) -> Self {
        workouts.sort_by(|a, b| a.finished_at.cmp(&b.finished_at));
        let mut aggregator = Self::new();
        for workout in workouts {
            aggregator.ingest(workout);
        }
        aggregator
    }

    /// Fold one completed workout into records, PRs and the workout list.
    /// Stored totals are recomputed from the sets, whatever the source sent.
    pub fn ingest(&mut self, mut workout: CompletedWorkout) -> IngestReport {
        let mut report = IngestReport::default();

        if self.workouts.iter().any(|w| w.id == workout.id) {
            warn!(workout_id = %workout.id, "Workout already ingested, skipping");
            return report;
        }
        workout.recompute_totals();

        for exercise in &workout.exercises {
            let entry =
                ExerciseRecordEntry::from_exercise(&workout.id, workout.finished_at, exercise);

            if self.update_personal_record(&exercise.exercise_id, &exercise.name, &entry) {
                report.new_personal_records.push(exercise.exercise_id.clone());
            }

            let record = self
                .exercise_records
                .entry(exercise.exercise_id.clone())
                .or_insert_with(|| {
                    ExerciseRecord::new(&exercise.exercise_id, &exercise.name, exercise.category)
                });
            record.exercise_name = exercise.name.clone();
            record.category = exercise.category;
            record.push_entry(entry);
            report.exercises_recorded += 1;
        }

        debug!(
            workout_id = %workout.id,
            exercises = report.exercises_recorded,
            new_prs = report.new_personal_records.len(),
            "Ingested workout"
        );

        let position = self
            .workouts
            .iter()
            .position(|w| w.finished_at <= workout.finished_at)
            .unwrap_or(self.workouts.len());
        self.workouts.insert(position, workout);

        report
    }

    /// A session qualifies for a PR once its best set has at least one rep
    fn update_personal_record(
        &mut self,
        exercise_id: &str,
        exercise_name: &str,
        entry: &ExerciseRecordEntry,
    ) -> bool {
        if entry.max_reps_at_weight == 0 {
            return false;
        }
        match self
            .personal_records
            .iter_mut()
            .find(|pr| pr.exercise_id == exercise_id)
        {
            Some(pr) => pr.update_from(entry),
            None => {
                self.personal_records
                    .push(PersonalRecord::from_entry(exercise_id, exercise_name, entry));
                true
            }
        }
    }

    /// Delete one workout and recompute derived state. Returns false if unknown.
    pub fn remove_workout(&mut self, workout_id: &str) -> bool {
        if !self.workouts.iter().any(|w| w.id == workout_id) {
            return false;
        }
        let remaining: Vec<CompletedWorkout> = self
            .workouts
            .drain(..)
            .filter(|w| w.id != workout_id)
            .collect();
        *self = Self::rebuild(remaining);
        true
    }

    /// Bulk clear. The only way personal records go away.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn workouts(&self) -> &[CompletedWorkout] {
        &self.workouts
    }

    pub fn workout(&self, workout_id: &str) -> Option<&CompletedWorkout> {
        self.workouts.iter().find(|w| w.id == workout_id)
    }

    pub fn is_empty(&self) -> bool {
        self.workouts.is_empty()
    }

    pub fn exercise_history(&self, exercise_id: &str) -> Option<&ExerciseRecord> {
        self.exercise_records.get(exercise_id)
    }

    pub fn exercise_records(&self) -> impl Iterator<Item = &ExerciseRecord> {
        self.exercise_records.values()
    }

    pub fn personal_record(&self, exercise_id: &str) -> Option<&PersonalRecord> {
        self.personal_records
            .iter()
            .find(|pr| pr.exercise_id == exercise_id)
    }

    /// Heaviest first; equal weights keep creation order (stable sort)
    pub fn all_personal_records(&self) -> Vec<&PersonalRecord> {
        let mut records: Vec<&PersonalRecord> = self.personal_records.iter().collect();
        records.sort_by(|a, b| b.max_weight.total_cmp(&a.max_weight));
        records
    }

    /// Personal records in creation order, as persisted
    pub fn personal_records_in_creation_order(&self) -> &[PersonalRecord] {
        &self.personal_records
    }

    /// Consecutive training days ending today, or yesterday if today is
    /// still empty. Zero once yesterday has no workout either.
    pub fn workout_streak(&self, today: NaiveDate) -> u32 {
        let dates: BTreeSet<NaiveDate> = self.workouts.iter().map(|w| w.local_date()).collect();

        let mut day = if dates.contains(&today) {
            today
        } else {
            match today.pred_opt() {
                Some(yesterday) if dates.contains(&yesterday) => yesterday,
                _ => return 0,
            }
        };

        let mut streak = 0;
        while dates.contains(&day) {
            streak += 1;
            match day.pred_opt() {
                Some(prev) => day = prev,
                None => break,
            }
        }
        streak
    }

    /// Streak anchored on the device's current date
    pub fn current_streak(&self) -> u32 {
        self.workout_streak(Local::now().date_naive())
    }

    /// Sets per category over the trailing 7 days
    pub fn weekly_category_sets(&self, now: DateTime<Utc>) -> BTreeMap<MuscleCategory, u32> {
        let window_start = now - Duration::days(ROLLING_WINDOW_DAYS);
        let mut totals = BTreeMap::new();

        for workout in self
            .workouts
            .iter()
            .filter(|w| w.finished_at > window_start && w.finished_at <= now)
        {
            for exercise in &workout.exercises {
                *totals.entry(exercise.category).or_insert(0) += exercise.sets.len() as u32;
            }
        }

        totals
    }

    /// When each category was last trained
    pub fn category_last_performed(&self) -> BTreeMap<MuscleCategory, DateTime<Utc>> {
        let mut last = BTreeMap::new();
        for workout in &self.workouts {
            for exercise in &workout.exercises {
                last.entry(exercise.category)
                    .and_modify(|at: &mut DateTime<Utc>| {
                        if workout.finished_at > *at {
                            *at = workout.finished_at;
                        }
                    })
                    .or_insert(workout.finished_at);
            }
        }
        last
    }

    /// Totals for the calendar week or month containing `now` (local time)
    pub fn period_summary(&self, period: StatsPeriod, now: DateTime<Utc>) -> PeriodSummary {
        let today = now.with_timezone(&Local).date_naive();
        let start = match period {
            StatsPeriod::Week => {
                today - Duration::days(today.weekday().num_days_from_monday() as i64)
            }
            StatsPeriod::Month => today.with_day(1).unwrap_or(today),
        };
        let end = match period {
            StatsPeriod::Week => start + Duration::days(7),
            StatsPeriod::Month => start
                .checked_add_months(chrono::Months::new(1))
                .unwrap_or(start + Duration::days(31)),
        };

        let mut summary = PeriodSummary::default();
        for workout in &self.workouts {
            let date = workout.local_date();
            if date >= start && date < end {
                summary.add(workout);
            }
        }
        summary
    }

    pub fn lifetime_totals(&self) -> PeriodSummary {
        let mut summary = PeriodSummary::default();
        for workout in &self.workouts {
            summary.add(workout);
        }
        summary
    }

    /// Share of all logged sets per category, largest first
    pub fn category_distribution(&self) -> Vec<CategoryShare> {
        let mut counts: BTreeMap<MuscleCategory, u32> = BTreeMap::new();
        for workout in &self.workouts {
            for exercise in &workout.exercises {
                *counts.entry(exercise.category).or_insert(0) += exercise.sets.len() as u32;
            }
        }

        let total: u32 = counts.values().sum();
        let mut shares: Vec<CategoryShare> = counts
            .into_iter()
            .filter(|(_, sets)| *sets > 0)
            .map(|(category, sets)| CategoryShare {
                category,
                sets,
                percentage: sets as f64 / total as f64 * 100.0,
            })
            .collect();
        shares.sort_by(|a, b| b.sets.cmp(&a.sets));
        shares
    }

    /// One exercise's record as a profile sees it, without rebuilding the
    /// rest of the history. Matches `for_profile(profile).exercise_history(id)`.
    pub fn exercise_history_for_profile(
        &self,
        exercise_id: &str,
        profile: &ProfileId,
    ) -> Option<ExerciseRecord> {
        let mut record: Option<ExerciseRecord> = None;

        for workout in self.workouts.iter().rev() {
            for exercise in workout.exercises.iter().filter(|e| e.exercise_id == exercise_id) {
                let sets: Vec<_> = exercise
                    .sets
                    .iter()
                    .filter(|s| s.owner.belongs_to(profile))
                    .cloned()
                    .collect();
                if sets.is_empty() {
                    continue;
                }
                let view = CompletedExercise {
                    sets,
                    ..exercise.clone()
                };

                let record = record.get_or_insert_with(|| {
                    ExerciseRecord::new(exercise_id, &exercise.name, exercise.category)
                });
                record.exercise_name = exercise.name.clone();
                record.category = exercise.category;
                record.push_entry(ExerciseRecordEntry::from_exercise(
                    &workout.id,
                    workout.finished_at,
                    &view,
                ));
            }
        }

        record
    }

    /// The history as one profile sees it on a shared device
    pub fn for_profile(&self, profile: &ProfileId) -> HistoryAggregator {
        let views: Vec<CompletedWorkout> = self
            .workouts
            .iter()
            .filter_map(|w| w.view_for_profile(profile))
            .collect();
        Self::rebuild(views)
    }
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------

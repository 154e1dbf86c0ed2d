use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::history::HistoryAggregator;

/// ---------------------------------------------------------------------------
/// Milestones
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
  WorkoutCount,
  Streak,
  LifetimeVolume,
  PersonalRecords,
}

struct Milestone {
  id: &'static str,
  title: &'static str,
  description: &'static str,
  kind: AchievementKind,
  target: f64,
}

const MILESTONES: &[Milestone] = &[
  Milestone {
    id: "first_workout",
    title: "First Rep",
    description: "Complete your first workout",
    kind: AchievementKind::WorkoutCount,
    target: 1.0,
  },
  Milestone {
    id: "workouts_10",
    title: "Getting Consistent",
    description: "Complete 10 workouts",
    kind: AchievementKind::WorkoutCount,
    target: 10.0,
  },
  Milestone {
    id: "workouts_50",
    title: "Regular",
    description: "Complete 50 workouts",
    kind: AchievementKind::WorkoutCount,
    target: 50.0,
  },
  Milestone {
    id: "workouts_100",
    title: "Centurion",
    description: "Complete 100 workouts",
    kind: AchievementKind::WorkoutCount,
    target: 100.0,
  },
  Milestone {
    id: "streak_3",
    title: "On a Roll",
    description: "Train 3 days in a row",
    kind: AchievementKind::Streak,
    target: 3.0,
  },
  Milestone {
    id: "streak_7",
    title: "Full Week",
    description: "Train 7 days in a row",
    kind: AchievementKind::Streak,
    target: 7.0,
  },
  Milestone {
    id: "streak_30",
    title: "Unbreakable",
    description: "Train 30 days in a row",
    kind: AchievementKind::Streak,
    target: 30.0,
  },
  Milestone {
    id: "volume_10t",
    title: "Ten Tonnes",
    description: "Lift 10,000 kg in total",
    kind: AchievementKind::LifetimeVolume,
    target: 10_000.0,
  },
  Milestone {
    id: "volume_100t",
    title: "Hundred Tonnes",
    description: "Lift 100,000 kg in total",
    kind: AchievementKind::LifetimeVolume,
    target: 100_000.0,
  },
  Milestone {
    id: "first_pr",
    title: "Personal Best",
    description: "Set your first personal record",
    kind: AchievementKind::PersonalRecords,
    target: 1.0,
  },
  Milestone {
    id: "prs_10",
    title: "Record Breaker",
    description: "Hold personal records on 10 exercises",
    kind: AchievementKind::PersonalRecords,
    target: 10.0,
  },
];

/// ---------------------------------------------------------------------------
/// Evaluation
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
  pub id: String,
  pub title: String,
  pub description: String,
  pub kind: AchievementKind,
  pub target: f64,
  pub current: f64,
  pub unlocked: bool,
  /// current / target, clamped to [0, 1]
  pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementSummary {
  pub current_streak: u32,
  pub longest_streak: u32,
  pub unlocked_count: usize,
  pub achievements: Vec<Achievement>,
}

impl AchievementSummary {
  /// Evaluate every milestone against the aggregator's current state.
  ///
  /// Streak milestones use the longest streak ever, so they stay unlocked
  /// after a streak ends.
  pub fn compute(history: &HistoryAggregator, today: NaiveDate) -> Self {
    let current_streak = history.workout_streak(today);
    let longest_streak = longest_streak(history).max(current_streak);
    let totals = history.lifetime_totals();
    let pr_count = history.personal_records_in_creation_order().len();

    let achievements: Vec<Achievement> = MILESTONES
      .iter()
      .map(|m| {
        let current = match m.kind {
          AchievementKind::WorkoutCount => totals.workouts as f64,
          AchievementKind::Streak => longest_streak as f64,
          AchievementKind::LifetimeVolume => totals.total_volume,
          AchievementKind::PersonalRecords => pr_count as f64,
        };
        Achievement {
          id: m.id.to_string(),
          title: m.title.to_string(),
          description: m.description.to_string(),
          kind: m.kind,
          target: m.target,
          current,
          unlocked: current >= m.target,
          progress: (current / m.target).clamp(0.0, 1.0),
        }
      })
      .collect();

    Self {
      current_streak,
      longest_streak,
      unlocked_count: achievements.iter().filter(|a| a.unlocked).count(),
      achievements,
    }
  }

  /// Unlocked milestones first, then by how close the rest are
  pub fn to_prioritized_list(&self) -> Vec<&Achievement> {
    let mut list: Vec<&Achievement> = self.achievements.iter().collect();
    list.sort_by(|a, b| {
      b.unlocked
        .cmp(&a.unlocked)
        .then_with(|| b.progress.total_cmp(&a.progress))
    });
    list
  }

  pub fn get(&self, id: &str) -> Option<&Achievement> {
    self.achievements.iter().find(|a| a.id == id)
  }
}

/// Longest run of consecutive local calendar days with a workout
fn longest_streak(history: &HistoryAggregator) -> u32 {
  let dates: BTreeSet<NaiveDate> = history.workouts().iter().map(|w| w.local_date()).collect();

  let mut longest = 0;
  let mut run = 0;
  let mut previous: Option<NaiveDate> = None;

  for date in dates {
    run = match previous.and_then(|p| p.succ_opt()) {
      Some(next) if next == date => run + 1,
      _ => 1,
    };
    longest = longest.max(run);
    previous = Some(date);
  }

  longest
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

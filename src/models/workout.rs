use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// ---------------------------------------------------------------------------
/// Profiles
/// ---------------------------------------------------------------------------

/// Identifies one person on a shared device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub String);

impl ProfileId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ProfileId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Who performed a set.
///
/// Stored as a nullable `profile_id`: sets logged before multi-profile
/// support have no owner and count for every profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<ProfileId>", into = "Option<ProfileId>")]
pub enum SetOwner {
  #[default]
  Shared,
  Profile(ProfileId),
}

impl SetOwner {
  pub fn belongs_to(&self, profile: &ProfileId) -> bool {
    match self {
      SetOwner::Shared => true,
      SetOwner::Profile(owner) => owner == profile,
    }
  }
}

impl From<Option<ProfileId>> for SetOwner {
  fn from(value: Option<ProfileId>) -> Self {
    match value {
      Some(id) if !id.0.is_empty() => SetOwner::Profile(id),
      _ => SetOwner::Shared,
    }
  }
}

impl From<SetOwner> for Option<ProfileId> {
  fn from(value: SetOwner) -> Self {
    match value {
      SetOwner::Shared => None,
      SetOwner::Profile(id) => Some(id),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Muscle Categories
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MuscleCategory {
  Chest,
  Back,
  Shoulders,
  Legs,
  Arms,
  Core,
  Cardio,
  FullBody,
  Other,
}

impl MuscleCategory {
  pub const ALL: [MuscleCategory; 9] = [
    MuscleCategory::Chest,
    MuscleCategory::Back,
    MuscleCategory::Shoulders,
    MuscleCategory::Legs,
    MuscleCategory::Arms,
    MuscleCategory::Core,
    MuscleCategory::Cardio,
    MuscleCategory::FullBody,
    MuscleCategory::Other,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      MuscleCategory::Chest => "chest",
      MuscleCategory::Back => "back",
      MuscleCategory::Shoulders => "shoulders",
      MuscleCategory::Legs => "legs",
      MuscleCategory::Arms => "arms",
      MuscleCategory::Core => "core",
      MuscleCategory::Cardio => "cardio",
      MuscleCategory::FullBody => "full_body",
      MuscleCategory::Other => "other",
    }
  }

  /// Smallest sensible load jump in kg. Large compound groups move in 5 kg steps.
  pub fn weight_increment(&self) -> f64 {
    match self {
      MuscleCategory::Legs | MuscleCategory::Back => 5.0,
      _ => 2.5,
    }
  }
}

impl std::fmt::Display for MuscleCategory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for MuscleCategory {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "chest" => Ok(Self::Chest),
      "back" => Ok(Self::Back),
      "shoulders" | "shoulder" => Ok(Self::Shoulders),
      "legs" | "leg" => Ok(Self::Legs),
      "arms" | "arm" => Ok(Self::Arms),
      "core" | "abs" => Ok(Self::Core),
      "cardio" => Ok(Self::Cardio),
      "full_body" | "fullbody" => Ok(Self::FullBody),
      "other" => Ok(Self::Other),
      _ => Err(format!("Unknown muscle category: {}", s)),
    }
  }
}

impl From<String> for MuscleCategory {
  fn from(value: String) -> Self {
    value.parse().unwrap_or(MuscleCategory::Other)
  }
}

impl From<MuscleCategory> for String {
  fn from(value: MuscleCategory) -> Self {
    value.as_str().to_string()
  }
}

/// ---------------------------------------------------------------------------
/// Sets, Exercises, Workouts
/// ---------------------------------------------------------------------------

/// A single performed set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetEntry {
  /// Load in kg; null, negative and non-finite values read as 0
  #[serde(default, deserialize_with = "lenient_weight")]
  pub weight: f64,
  #[serde(default, deserialize_with = "lenient_reps")]
  pub reps: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rpe: Option<f32>,
  #[serde(default)]
  pub is_warmup: bool,
  #[serde(default)]
  pub is_dropset: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub recorded_at: Option<DateTime<Utc>>,
  #[serde(rename = "profile_id", default)]
  pub owner: SetOwner,
}

impl SetEntry {
  pub fn new(weight: f64, reps: u32) -> Self {
    Self {
      weight: sanitize_weight(weight),
      reps,
      rpe: None,
      is_warmup: false,
      is_dropset: false,
      recorded_at: None,
      owner: SetOwner::Shared,
    }
  }

  pub fn owned_by(mut self, profile: ProfileId) -> Self {
    self.owner = SetOwner::Profile(profile);
    self
  }

  pub fn volume(&self) -> f64 {
    sanitize_weight(self.weight) * self.reps as f64
  }
}

/// One exercise as performed inside a workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedExercise {
  pub exercise_id: String,
  pub name: String,
  pub category: MuscleCategory,
  #[serde(default)]
  pub sets: Vec<SetEntry>,
}

impl CompletedExercise {
  pub fn new(
    exercise_id: impl Into<String>,
    name: impl Into<String>,
    category: MuscleCategory,
    sets: Vec<SetEntry>,
  ) -> Self {
    Self {
      exercise_id: exercise_id.into(),
      name: name.into(),
      category,
      sets,
    }
  }

  pub fn volume(&self) -> f64 {
    self.sets.iter().map(SetEntry::volume).sum()
  }
}

/// A finished session. Immutable once recorded, apart from deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWorkout {
  pub id: String,
  /// Everyone who took part in a shared session; empty for single-person data
  #[serde(default)]
  pub profile_ids: Vec<ProfileId>,
  pub name: String,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  #[serde(default)]
  pub duration_seconds: i64,
  #[serde(default)]
  pub exercises: Vec<CompletedExercise>,
  #[serde(default)]
  pub total_sets: u32,
  #[serde(default, deserialize_with = "lenient_weight")]
  pub total_volume: f64,
}

impl CompletedWorkout {
  /// Build a workout with duration and totals derived from its parts
  pub fn new(
    id: impl Into<String>,
    name: impl Into<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    exercises: Vec<CompletedExercise>,
  ) -> Self {
    let mut workout = Self {
      id: id.into(),
      profile_ids: Vec::new(),
      name: name.into(),
      started_at,
      finished_at,
      duration_seconds: (finished_at - started_at).num_seconds().max(0),
      exercises,
      total_sets: 0,
      total_volume: 0.0,
    };
    workout.recompute_totals();
    workout
  }

  pub fn recompute_totals(&mut self) {
    self.total_sets = self.exercises.iter().map(|e| e.sets.len() as u32).sum();
    self.total_volume = self.exercises.iter().map(CompletedExercise::volume).sum();
  }

  /// Calendar day the workout was finished on, in device local time
  pub fn local_date(&self) -> NaiveDate {
    self.finished_at.with_timezone(&Local).date_naive()
  }

  /// This workout as seen by one profile.
  ///
  /// Keeps only the sets the profile performed (plus unowned sets), drops
  /// exercises left empty and recomputes totals. Returns None when nothing
  /// in the session belongs to the profile.
  pub fn view_for_profile(&self, profile: &ProfileId) -> Option<CompletedWorkout> {
    let exercises: Vec<CompletedExercise> = self
      .exercises
      .iter()
      .filter_map(|exercise| {
        let sets: Vec<SetEntry> = exercise
          .sets
          .iter()
          .filter(|s| s.owner.belongs_to(profile))
          .cloned()
          .collect();
        if sets.is_empty() {
          None
        } else {
          Some(CompletedExercise {
            sets,
            ..exercise.clone()
          })
        }
      })
      .collect();

    if exercises.is_empty() {
      return None;
    }

    let mut view = CompletedWorkout {
      exercises,
      profile_ids: vec![profile.clone()],
      ..self.clone()
    };
    view.recompute_totals();
    Some(view)
  }
}

/// ---------------------------------------------------------------------------
/// Lenient numeric decoding
/// ---------------------------------------------------------------------------

pub(crate) fn sanitize_weight(weight: f64) -> f64 {
  if weight.is_finite() && weight > 0.0 {
    weight
  } else {
    0.0
  }
}

fn lenient_weight<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
  D: Deserializer<'de>,
{
  let value: Option<f64> = Option::deserialize(deserializer)?;
  Ok(value.map(sanitize_weight).unwrap_or(0.0))
}

fn lenient_reps<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
  D: Deserializer<'de>,
{
  let value: Option<f64> = Option::deserialize(deserializer)?;
  Ok(match value {
    Some(r) if r.is_finite() && r > 0.0 => r.min(u32::MAX as f64) as u32,
    _ => 0,
  })
}

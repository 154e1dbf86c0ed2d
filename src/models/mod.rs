pub mod workout;
pub mod history;
pub mod sync;

pub use history::{ExerciseRecord, ExerciseRecordEntry, PersonalRecord, MAX_RECORD_ENTRIES};
pub use sync::SyncState;
pub use workout::{CompletedExercise, CompletedWorkout, MuscleCategory, ProfileId, SetEntry, SetOwner};

pub mod achievements;
pub mod cloud;
pub mod config;
pub mod db;
pub mod history;
pub mod models;
pub mod recommendation;
pub mod service;
pub mod storage;

#[cfg(test)]
mod test_utils;

pub use achievements::{Achievement, AchievementKind, AchievementSummary};
pub use cloud::{merge_workouts, CloudClient, CloudConfig, CloudError};
pub use config::{AppConfig, ConfigError};
pub use history::{HistoryAggregator, IngestReport, PeriodSummary, StatsPeriod};
pub use recommendation::{
  today_recommendation, Recommendation, RecommendationPolicy, RecommendationType, RepRange,
};
pub use service::{SyncReport, WorkoutLog, WorkoutLogError};
pub use storage::StorageError;

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .try_init();
}

/// Entry point for an embedding shell: load `.env`, start logging, open the log
pub async fn open_from_env() -> Result<WorkoutLog, WorkoutLogError> {
  // Load environment variables from .env file
  dotenvy::dotenv().ok();
  init_tracing();

  let config = AppConfig::from_env()?;
  WorkoutLog::open(&config).await
}

use serde::{Serialize, Serializer};
use std::env;
use std::path::PathBuf;
use tracing::debug;

use crate::cloud::{CloudConfig, CloudError};
use crate::models::ProfileId;
use crate::recommendation::{RecommendationPolicy, RepRange};

const DB_FILE_NAME: &str = "liftlog.db";

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Invalid value for {var}: {value}")]
  Invalid { var: String, value: String },

  #[error("Cloud configuration error: {0}")]
  Cloud(#[from] CloudError),
}

impl Serialize for ConfigError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// App Configuration
/// ---------------------------------------------------------------------------

/// Everything the workout log needs at startup, read from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
  pub database_path: PathBuf,
  /// Cloud account; sync stays disabled without it
  pub user_id: Option<String>,
  /// Profile whose sets the aggregates are filtered to; None means the whole log
  pub active_profile: Option<ProfileId>,
  pub rep_range: RepRange,
  pub policy: RecommendationPolicy,
  /// None when LIFTLOG_CLOUD_URL is not set
  pub cloud: Option<CloudConfig>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      database_path: default_db_path(),
      user_id: None,
      active_profile: None,
      rep_range: RepRange::default(),
      policy: RecommendationPolicy::default(),
      cloud: None,
    }
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    let database_path = non_empty_var("LIFTLOG_DB_PATH")
      .map(PathBuf::from)
      .unwrap_or_else(default_db_path);

    let user_id = non_empty_var("LIFTLOG_USER_ID");
    let active_profile = non_empty_var("LIFTLOG_PROFILE_ID").map(ProfileId::new);

    let rep_range = match non_empty_var("LIFTLOG_REP_RANGE") {
      Some(raw) => raw.parse::<RepRange>().map_err(|_| invalid("LIFTLOG_REP_RANGE", &raw))?,
      None => RepRange::default(),
    };

    let mut policy = RecommendationPolicy::default();
    if let Some(raw) = non_empty_var("LIFTLOG_CONSISTENCY_MARGIN") {
      policy.consistency_margin = raw
        .trim()
        .parse()
        .map_err(|_| invalid("LIFTLOG_CONSISTENCY_MARGIN", &raw))?;
    }
    if let Some(raw) = non_empty_var("LIFTLOG_FATIGUE_DROP_PCT") {
      policy.fatigue_drop_pct = raw
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|pct| pct.is_finite() && *pct >= 0.0)
        .ok_or_else(|| invalid("LIFTLOG_FATIGUE_DROP_PCT", &raw))?;
    }

    let cloud = match non_empty_var("LIFTLOG_CLOUD_URL") {
      Some(_) => Some(CloudConfig::from_env()?),
      None => None,
    };

    debug!(
      db = %database_path.display(),
      %rep_range,
      cloud = cloud.is_some(),
      "Loaded configuration"
    );

    Ok(Self {
      database_path,
      user_id,
      active_profile,
      rep_range,
      policy,
      cloud,
    })
  }
}

/// Platform data directory, falling back to the working directory
pub fn default_db_path() -> PathBuf {
  match dirs::data_dir() {
    Some(dir) => dir.join("liftlog").join(DB_FILE_NAME),
    None => PathBuf::from(DB_FILE_NAME),
  }
}

fn non_empty_var(name: &str) -> Option<String> {
  env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn invalid(var: &str, value: &str) -> ConfigError {
  ConfigError::Invalid {
    var: var.to_string(),
    value: value.to_string(),
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  const ALL_VARS: [&str; 9] = [
    "LIFTLOG_DB_PATH",
    "LIFTLOG_USER_ID",
    "LIFTLOG_PROFILE_ID",
    "LIFTLOG_REP_RANGE",
    "LIFTLOG_CONSISTENCY_MARGIN",
    "LIFTLOG_FATIGUE_DROP_PCT",
    "LIFTLOG_CLOUD_URL",
    "LIFTLOG_CLOUD_API_KEY",
    "LIFTLOG_CLOUD_TIMEOUT_SECS",
  ];

  fn with_env<F: FnOnce()>(set: &[(&str, &str)], f: F) {
    let vars: Vec<(&str, Option<&str>)> = ALL_VARS
      .iter()
      .map(|name| {
        let value = set.iter().find(|(k, _)| k == name).map(|(_, v)| *v);
        (*name, value)
      })
      .collect();
    temp_env::with_vars(vars, f);
  }

  #[test]
  #[serial]
  fn test_defaults_when_env_empty() {
    with_env(&[], || {
      let config = AppConfig::from_env().expect("defaults load");
      assert_eq!(config.user_id, None);
      assert_eq!(config.active_profile, None);
      assert_eq!(config.rep_range, RepRange::hypertrophy());
      assert_eq!(config.policy, RecommendationPolicy::default());
      assert!(config.cloud.is_none());
      assert!(config.database_path.ends_with(DB_FILE_NAME));
    });
  }

  #[test]
  #[serial]
  fn test_reads_all_overrides() {
    with_env(
      &[
        ("LIFTLOG_DB_PATH", "/tmp/custom.db"),
        ("LIFTLOG_USER_ID", "user-42"),
        ("LIFTLOG_PROFILE_ID", "p-1"),
        ("LIFTLOG_REP_RANGE", "strength"),
        ("LIFTLOG_CONSISTENCY_MARGIN", "1"),
        ("LIFTLOG_FATIGUE_DROP_PCT", "25"),
        ("LIFTLOG_CLOUD_URL", "https://cloud.example.com"),
      ],
      || {
        let config = AppConfig::from_env().expect("config loads");
        assert_eq!(config.database_path, PathBuf::from("/tmp/custom.db"));
        assert_eq!(config.user_id.as_deref(), Some("user-42"));
        assert_eq!(config.active_profile, Some(ProfileId::new("p-1")));
        assert_eq!(config.rep_range, RepRange::strength());
        assert_eq!(config.policy.consistency_margin, 1);
        assert_eq!(config.policy.fatigue_drop_pct, 25.0);
        assert!(config.cloud.is_some());
      },
    );
  }

  #[test]
  #[serial]
  fn test_custom_rep_range() {
    with_env(&[("LIFTLOG_REP_RANGE", "6-10")], || {
      let config = AppConfig::from_env().expect("config loads");
      assert_eq!(config.rep_range, RepRange { min: 6, max: 10 });
    });
  }

  #[test]
  #[serial]
  fn test_invalid_values_are_rejected() {
    with_env(&[("LIFTLOG_REP_RANGE", "12-8")], || {
      match AppConfig::from_env() {
        Err(ConfigError::Invalid { var, value }) => {
          assert_eq!(var, "LIFTLOG_REP_RANGE");
          assert_eq!(value, "12-8");
        }
        other => panic!("Expected invalid rep range, got {:?}", other),
      }
    });

    with_env(&[("LIFTLOG_FATIGUE_DROP_PCT", "-5")], || {
      assert!(matches!(AppConfig::from_env(), Err(ConfigError::Invalid { .. })));
    });

    with_env(&[("LIFTLOG_CONSISTENCY_MARGIN", "two")], || {
      assert!(matches!(AppConfig::from_env(), Err(ConfigError::Invalid { .. })));
    });
  }

  #[test]
  #[serial]
  fn test_bad_cloud_url_surfaces_cloud_error() {
    with_env(&[("LIFTLOG_CLOUD_URL", "not a url")], || {
      assert!(matches!(AppConfig::from_env(), Err(ConfigError::Cloud(_))));
    });
  }
}

use reqwest::Client;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::env;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};
use url::Url;

use crate::models::CompletedWorkout;

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const LOG_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct CloudConfig {
  pub base_url: Url,
  pub api_key: Option<String>,
  pub timeout: StdDuration,
}

impl CloudConfig {
  pub fn new(base_url: &str) -> Result<Self, CloudError> {
    Ok(Self {
      base_url: parse_base_url(base_url)?,
      api_key: None,
      timeout: StdDuration::from_secs(DEFAULT_TIMEOUT_SECS),
    })
  }

  pub fn from_env() -> Result<Self, CloudError> {
    let base_url = env::var("LIFTLOG_CLOUD_URL")
      .map_err(|_| CloudError::MissingConfig("LIFTLOG_CLOUD_URL".into()))?;

    let timeout_secs = match env::var("LIFTLOG_CLOUD_TIMEOUT_SECS") {
      Ok(raw) => raw
        .trim()
        .parse::<u64>()
        .map_err(|_| CloudError::MissingConfig(format!("LIFTLOG_CLOUD_TIMEOUT_SECS={}", raw)))?,
      Err(_) => DEFAULT_TIMEOUT_SECS,
    };

    Ok(Self {
      base_url: parse_base_url(&base_url)?,
      api_key: env::var("LIFTLOG_CLOUD_API_KEY").ok().filter(|k| !k.is_empty()),
      timeout: StdDuration::from_secs(timeout_secs),
    })
  }
}

/// Base URLs are stored with a trailing slash
fn parse_base_url(raw: &str) -> Result<Url, CloudError> {
  let mut normalized = raw.trim().to_string();
  if !normalized.ends_with('/') {
    normalized.push('/');
  }
  Url::parse(&normalized).map_err(|e| CloudError::MissingConfig(format!("LIFTLOG_CLOUD_URL: {}", e)))
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
  #[error("Missing configuration: {0}")]
  MissingConfig(String),

  #[error("HTTP request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("Cloud API error ({0}): {1}")]
  Api(u16, String),

  #[error("Failed to parse cloud response: {0}")]
  Parse(String),

  #[error("Not authenticated with cloud backend")]
  NotAuthenticated,
}

impl Serialize for CloudError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Cloud Client
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CloudClient {
  client: Client,
  config: CloudConfig,
}

impl CloudClient {
  pub fn new(config: CloudConfig) -> Result<Self, CloudError> {
    let client = Client::builder().timeout(config.timeout).build()?;
    Ok(Self { client, config })
  }

  fn workouts_url(&self, user_id: &str) -> Result<Url, CloudError> {
    let mut url = self.config.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| CloudError::MissingConfig("LIFTLOG_CLOUD_URL cannot be a base".into()))?
      .pop_if_empty()
      .extend(["users", user_id, "workouts"]);
    Ok(url)
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.config.api_key {
      Some(key) => request.header("Authorization", format!("Bearer {}", key)),
      None => request,
    }
  }

  /// Fetch every workout the backend holds for this user
  pub async fn fetch_workouts(&self, user_id: &str) -> Result<Vec<CompletedWorkout>, CloudError> {
    let url = self.workouts_url(user_id)?;
    debug!(%url, "Fetching workouts from cloud");

    let response = self.authorize(self.client.get(url)).send().await?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
      return Err(CloudError::NotAuthenticated);
    }
    if !status.is_success() {
      let error_text = response.text().await.unwrap_or_default();
      return Err(CloudError::Api(status.as_u16(), error_text));
    }

    let response_text = response.text().await?;
    let workouts: Vec<CompletedWorkout> = serde_json::from_str(&response_text).map_err(|e| {
      warn!(
        "Failed to parse cloud workouts (first {} chars): {}",
        LOG_PREVIEW_CHARS,
        preview(&response_text)
      );
      CloudError::Parse(e.to_string())
    })?;

    debug!(count = workouts.len(), "Fetched workouts from cloud");
    Ok(workouts)
  }

  /// Upload one completed workout
  pub async fn save_workout(&self, user_id: &str, workout: &CompletedWorkout) -> Result<(), CloudError> {
    let url = self.workouts_url(user_id)?;
    debug!(%url, workout_id = %workout.id, "Saving workout to cloud");

    let response = self.authorize(self.client.post(url)).json(workout).send().await?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
      return Err(CloudError::NotAuthenticated);
    }
    if !status.is_success() {
      let error_text = response.text().await.unwrap_or_default();
      return Err(CloudError::Api(status.as_u16(), error_text));
    }

    Ok(())
  }
}

/// Leading characters of a response body, cut on a char boundary
fn preview(text: &str) -> &str {
  match text.char_indices().nth(LOG_PREVIEW_CHARS) {
    Some((end, _)) => &text[..end],
    None => text,
  }
}

/// ---------------------------------------------------------------------------
/// Merge
/// ---------------------------------------------------------------------------

/// Union of local and remote keyed on workout id, oldest first.
///
/// The local copy wins when both sides hold the same id.
pub fn merge_workouts(
  local: Vec<CompletedWorkout>,
  remote: Vec<CompletedWorkout>,
) -> Vec<CompletedWorkout> {
  let mut seen: HashSet<String> = local.iter().map(|w| w.id.clone()).collect();
  let mut merged = local;

  for workout in remote {
    if seen.insert(workout.id.clone()) {
      merged.push(workout);
    }
  }

  merged.sort_by(|a, b| a.finished_at.cmp(&b.finished_at));
  merged
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

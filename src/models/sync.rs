use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping for the last cloud merge
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
  pub last_sync_at: Option<DateTime<Utc>>,
  pub last_remote_count: i64,
}

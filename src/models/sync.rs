use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::session::{ReadingSession, SessionPatch};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SyncAction {
    Update,
}

/// A mutation that could not be delivered while offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    pub session_id: String,
    pub action: SyncAction,
    pub data: SessionPatch,
    pub retry_count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SyncQueueItem {
    pub fn update(session_id: String, data: SessionPatch) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            action: SyncAction::Update,
            data,
            retry_count: 0,
            last_attempt: None,
            error: None,
        }
    }
}

/// Server-reported divergence, held only while the explicit resolve path
/// is pending. Never persisted; rebuilt from the server if the tab reloads.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictInfo {
    pub session_id: String,
    pub server_session: Option<ReadingSession>,
    pub conflicts: Vec<Value>,
}

/// The user's choice submitted through the explicit resolution path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub session_id: String,
    pub session_state: Value,
    pub expected_updated_at: DateTime<Utc>,
}

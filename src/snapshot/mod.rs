use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::models::{DrawingState, SavedReadingState, SnapshotDraft};
use crate::storage::KeyValueStorage;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Snapshots older than this are indistinguishable from no snapshot.
pub const SNAPSHOT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

fn storage_key(reading_id: &str) -> String {
    format!("incomplete-reading-{reading_id}")
}

/// Per-reading progress snapshot cache used to offer "resume" after a reload.
///
/// Every operation degrades to "no incomplete reading" on storage trouble;
/// nothing here returns an error to the drawing UI.
pub struct SnapshotCache {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl SnapshotCache {
    /// Binds the cache to one reading id and runs the load-on-mount pass:
    /// a malformed, mis-shaped, or expired entry is deleted immediately.
    pub fn new(storage: Arc<dyn KeyValueStorage>, reading_id: &str) -> Self {
        let cache = Self {
            storage,
            key: storage_key(reading_id),
        };
        cache.validate_entry();
        cache
    }

    /// Stamps the draft with the current time and writes it. A draft whose
    /// flow already reached `complete` clears the entry instead: a finished
    /// reading must never look resumable.
    pub fn save_state(&self, draft: SnapshotDraft) {
        if draft.drawing_state == DrawingState::Complete {
            self.clear_state();
            return;
        }

        let state = draft.into_state(Utc::now().timestamp_millis());
        let serialized = match serde_json::to_string(&state) {
            Ok(serialized) => serialized,
            Err(err) => {
                log_warn!("failed to serialize snapshot for {}: {err}", self.key);
                return;
            }
        };

        if let Err(err) = self.storage.set(&self.key, &serialized) {
            log_warn!("failed to write snapshot for {}: {err}", self.key);
        }
    }

    /// Single-use restore: returns the saved state and deletes it, so a
    /// reading can only be resumed once per snapshot.
    pub fn restore_state(&self) -> Option<SavedReadingState> {
        let state = self.load_valid()?;
        self.clear_state();
        log_info!("restored snapshot for {}", self.key);
        Some(state)
    }

    /// Deletes the entry without returning it. Safe to call when empty.
    pub fn clear_state(&self) {
        if let Err(err) = self.storage.remove(&self.key) {
            log_warn!("failed to clear snapshot for {}: {err}", self.key);
        }
    }

    pub fn has_incomplete_reading(&self) -> bool {
        self.load_valid().is_some()
    }

    /// Reads and validates the entry, deleting it when invalid or expired.
    fn load_valid(&self) -> Option<SavedReadingState> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                log_warn!("failed to read snapshot for {}: {err}", self.key);
                return None;
            }
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => {
                log_warn!("snapshot for {} is not valid JSON; discarding", self.key);
                self.clear_state();
                return None;
            }
        };

        if !has_valid_shape(&value) {
            log_warn!("snapshot for {} has the wrong shape; discarding", self.key);
            self.clear_state();
            return None;
        }

        let state: SavedReadingState = match serde_json::from_value(value) {
            Ok(state) => state,
            Err(_) => {
                self.clear_state();
                return None;
            }
        };

        let age_ms = Utc::now().timestamp_millis() - state.timestamp;
        if age_ms > SNAPSHOT_TTL_MS {
            log_info!("snapshot for {} expired ({age_ms}ms old); discarding", self.key);
            self.clear_state();
            return None;
        }

        Some(state)
    }

    fn validate_entry(&self) {
        let _ = self.load_valid();
    }
}

fn has_valid_shape(value: &Value) -> bool {
    value.get("spreadType").is_some_and(Value::is_string)
        && value.get("drawingState").is_some_and(Value::is_string)
        && value.get("shuffledDeck").is_some_and(Value::is_array)
        && value.get("drawnCards").is_some_and(Value::is_array)
        && value.get("revealedIndices").is_some_and(Value::is_array)
        && value.get("timestamp").is_some_and(Value::is_number)
}

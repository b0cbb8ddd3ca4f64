use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConflictInfo, ReadingSession, SyncQueueItem};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AutoSaveStatus {
    Idle,
    Saving,
    Saved,
    Error,
    Offline,
}

impl Default for AutoSaveStatus {
    fn default() -> Self {
        AutoSaveStatus::Idle
    }
}

/// Everything the session store tracks for one browser tab. The persisted
/// subset is `PersistedStore`; the rest is rebuilt at runtime.
#[derive(Debug, Clone)]
pub struct StoreState {
    pub active_session: Option<ReadingSession>,
    pub sync_queue: Vec<SyncQueueItem>,
    /// Items that exhausted their retry budget; surfaced to the UI, never
    /// retried again.
    pub abandoned: Vec<SyncQueueItem>,
    pub auto_save_enabled: bool,
    pub auto_save_status: AutoSaveStatus,
    /// Bumped on every status transition so a delayed saved-to-idle revert
    /// can tell whether a newer transition already happened.
    pub status_epoch: u64,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub conflict: Option<ConflictInfo>,
    pub incomplete_sessions: Vec<ReadingSession>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            active_session: None,
            sync_queue: Vec::new(),
            abandoned: Vec::new(),
            auto_save_enabled: true,
            auto_save_status: AutoSaveStatus::Idle,
            status_epoch: 0,
            last_saved_at: None,
            last_error: None,
            conflict: None,
            incomplete_sessions: Vec::new(),
        }
    }
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transitions the auto-save status and returns the new epoch.
    pub fn set_status(&mut self, status: AutoSaveStatus) -> u64 {
        self.auto_save_status = status;
        self.status_epoch = self.status_epoch.wrapping_add(1);
        self.status_epoch
    }

    pub fn remove_incomplete(&mut self, session_id: &str) {
        self.incomplete_sessions.retain(|s| s.id != session_id);
    }

    /// Replaces the incomplete-list entry (and the active session, when the
    /// ids match) with a fresher copy from the server.
    pub fn adopt_session(&mut self, session: ReadingSession) {
        if let Some(slot) = self
            .incomplete_sessions
            .iter_mut()
            .find(|s| s.id == session.id)
        {
            *slot = session.clone();
        }
        if self
            .active_session
            .as_ref()
            .is_some_and(|active| active.id == session.id)
        {
            self.active_session = Some(session);
        }
    }
}

/// The durable subset written to client storage. Loading/saving flags and
/// conflict state are transient by design.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStore {
    pub active_session: Option<ReadingSession>,
    pub sync_queue: Vec<SyncQueueItem>,
    pub auto_save_enabled: bool,
}

impl PersistedStore {
    pub fn capture(state: &StoreState) -> Self {
        Self {
            active_session: state.active_session.clone(),
            sync_queue: state.sync_queue.clone(),
            auto_save_enabled: state.auto_save_enabled,
        }
    }

    pub fn apply(self, state: &mut StoreState) {
        state.active_session = self.active_session;
        state.sync_queue = self.sync_queue;
        state.auto_save_enabled = self.auto_save_enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_bump_epoch() {
        let mut state = StoreState::new();
        let first = state.set_status(AutoSaveStatus::Saving);
        let second = state.set_status(AutoSaveStatus::Saved);
        assert_ne!(first, second);
        assert_eq!(state.auto_save_status, AutoSaveStatus::Saved);
    }

    #[test]
    fn persisted_subset_excludes_transient_fields() {
        let mut state = StoreState::new();
        state.set_status(AutoSaveStatus::Error);
        state.last_error = Some("boom".into());

        let captured = PersistedStore::capture(&state);
        let mut restored = StoreState::new();
        captured.apply(&mut restored);

        assert_eq!(restored.auto_save_status, AutoSaveStatus::Idle);
        assert_eq!(restored.last_error, None);
        assert!(restored.conflict.is_none());
    }
}

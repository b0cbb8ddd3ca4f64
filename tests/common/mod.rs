#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use arcana_sessions::{
    CompletionReceipt, ConflictResolution, MemoryStorage, NewSession, ReadingSession,
    RemoteError, SessionFilter, SessionPage, SessionPatch, SessionService, SessionStatus,
    SessionStore, SessionStoreConfig, SyncOutcome, SyncQueueItem, WatchNetworkMonitor,
};

/// Scripted stand-in for the remote session API.
pub struct RemoteStub {
    sessions: Mutex<HashMap<String, ReadingSession>>,
    update_errors: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    update_delay: Mutex<Option<Duration>>,
    sync_outcome: Mutex<Option<SyncOutcome>>,
    pub update_calls: Mutex<Vec<(String, SessionPatch)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    counter: AtomicUsize,
}

impl RemoteStub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            update_errors: Mutex::new(HashMap::new()),
            update_delay: Mutex::new(None),
            sync_outcome: Mutex::new(None),
            update_calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
        })
    }

    pub fn insert_session(&self, session: ReadingSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn session(&self, id: &str) -> Option<ReadingSession> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn remove_session(&self, id: &str) {
        self.sessions.lock().unwrap().remove(id);
    }

    /// Queues an error returned by the next `update` call for `id`.
    pub fn fail_next_update(&self, id: &str, err: RemoteError) {
        self.update_errors
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn set_update_delay(&self, delay: Option<Duration>) {
        *self.update_delay.lock().unwrap() = delay;
    }

    pub fn set_sync_outcome(&self, outcome: SyncOutcome) {
        *self.sync_outcome.lock().unwrap() = Some(outcome);
    }

    pub fn update_call_count(&self) -> usize {
        self.update_calls.lock().unwrap().len()
    }

    fn bump_token(session: &mut ReadingSession) {
        session.updated_at =
            session.updated_at.max(Utc::now()) + ChronoDuration::milliseconds(1);
    }

    fn apply_patch(session: &mut ReadingSession, patch: &SessionPatch) {
        if let Some(state) = &patch.session_state {
            session.session_state = state.clone();
        }
        if let Some(status) = patch.status {
            session.status = status;
        }
        if let Some(ts) = patch.last_accessed_at {
            session.last_accessed_at = ts;
        }
    }

    fn do_update(
        &self,
        id: &str,
        patch: &SessionPatch,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<ReadingSession, RemoteError> {
        if let Some(err) = self
            .update_errors
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(id).ok_or(RemoteError::NotFound)?;
        if session.updated_at != expected_updated_at {
            return Err(RemoteError::Conflict);
        }
        Self::apply_patch(session, patch);
        Self::bump_token(session);
        Ok(session.clone())
    }
}

#[async_trait]
impl SessionService for RemoteStub {
    async fn create(&self, new: NewSession) -> Result<ReadingSession, RemoteError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let session = ReadingSession {
            id: format!("s{n}"),
            session_state: new.session_state,
            status: new.status,
            updated_at: now,
            last_accessed_at: now,
        };
        self.insert_session(session.clone());
        Ok(session)
    }

    async fn get_by_id(&self, id: &str) -> Result<ReadingSession, RemoteError> {
        self.session(id).ok_or(RemoteError::NotFound)
    }

    async fn update(
        &self,
        id: &str,
        patch: SessionPatch,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<ReadingSession, RemoteError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.update_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.update_calls
            .lock()
            .unwrap()
            .push((id.to_string(), patch.clone()));

        let result = self.do_update(id, &patch, expected_updated_at);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.sessions
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or(RemoteError::NotFound)
    }

    async fn complete(
        &self,
        id: &str,
        interpretation: Option<Value>,
    ) -> Result<CompletionReceipt, RemoteError> {
        let mut sessions = self.sessions.lock().unwrap();
        let mut session = sessions.remove(id).ok_or(RemoteError::NotFound)?;
        session.status = SessionStatus::Complete;
        Self::bump_token(&mut session);
        Ok(CompletionReceipt {
            session,
            interpretation,
        })
    }

    async fn list(&self, filter: SessionFilter) -> Result<SessionPage, RemoteError> {
        let sessions: Vec<ReadingSession> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| filter.status.map_or(true, |status| s.status == status))
            .cloned()
            .collect();
        let total = sessions.len() as u64;
        Ok(SessionPage { sessions, total })
    }

    async fn sync_offline(&self, batch: Vec<SyncQueueItem>) -> Result<SyncOutcome, RemoteError> {
        if let Some(outcome) = self.sync_outcome.lock().unwrap().take() {
            return Ok(outcome);
        }

        let mut sessions = self.sessions.lock().unwrap();
        let mut last = None;
        for item in &batch {
            if let Some(session) = sessions.get_mut(&item.session_id) {
                Self::apply_patch(session, &item.data);
                Self::bump_token(session);
                last = Some(session.clone());
            }
        }
        match last {
            Some(session) => Ok(SyncOutcome::Ok { session }),
            None => Err(RemoteError::Other(anyhow::anyhow!("empty sync batch"))),
        }
    }

    async fn resolve_conflict(
        &self,
        resolution: ConflictResolution,
    ) -> Result<ReadingSession, RemoteError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&resolution.session_id)
            .ok_or(RemoteError::NotFound)?;
        session.session_state = resolution.session_state;
        Self::bump_token(session);
        Ok(session.clone())
    }
}

pub fn test_config() -> SessionStoreConfig {
    SessionStoreConfig {
        auto_save_interval: Duration::from_secs(3600),
        remote_timeout: Duration::from_secs(5),
        saved_revert_delay: Duration::from_millis(40),
        max_sync_retries: 8,
        sync_backoff_base: Duration::from_millis(10),
        sync_backoff_cap: Duration::from_secs(300),
    }
}

pub struct Harness {
    pub store: SessionStore,
    pub remote: Arc<RemoteStub>,
    pub storage: Arc<MemoryStorage>,
    pub monitor: Arc<WatchNetworkMonitor>,
}

pub fn harness_with(config: SessionStoreConfig, online: bool) -> Harness {
    let remote = RemoteStub::new();
    let storage = Arc::new(MemoryStorage::new());
    let monitor = Arc::new(WatchNetworkMonitor::new(online));
    let store = SessionStore::new(
        remote.clone(),
        storage.clone(),
        monitor.clone(),
        config,
    );
    Harness {
        store,
        remote,
        storage,
        monitor,
    }
}

pub fn harness(online: bool) -> Harness {
    harness_with(test_config(), online)
}

pub fn spread_state(spread: &str) -> Value {
    json!({
        "spreadType": spread,
        "question": "what should I focus on?",
        "drawnCards": [],
    })
}

pub fn new_session(spread: &str) -> NewSession {
    NewSession {
        session_state: spread_state(spread),
        status: SessionStatus::Active,
    }
}

/// Polls until `check` passes or half a second elapses.
pub async fn wait_for<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..50 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 500ms");
}

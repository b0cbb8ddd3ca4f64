use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::models::{
    ConflictInfo, ConflictResolution, NewSession, ReadingSession, SessionFilter, SessionPage,
    SessionPatch, SessionStatus, SyncQueueItem,
};
use crate::network::NetworkMonitor;
use crate::remote::{CompletionReceipt, RemoteError, SessionService, SyncOutcome};
use crate::storage::KeyValueStorage;

use super::state::{AutoSaveStatus, PersistedStore, StoreState};

const STORE_KEY: &str = "session-store";
const LAST_ACTIVE_KEY: &str = "last-active-session";

/// Errors surfaced to callers of the session store. Offline is recoverable
/// (the mutation is already queued); Remote is the generic category the UI
/// may react to with a retry affordance.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no connectivity; change queued for sync")]
    Offline,
    #[error(transparent)]
    Remote(RemoteError),
}

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub auto_save_interval: Duration,
    /// Deadline applied to every remote call so a hung request cannot
    /// freeze the saving state.
    pub remote_timeout: Duration,
    /// How long the `saved` status lingers before reverting to idle.
    pub saved_revert_delay: Duration,
    pub max_sync_retries: u32,
    pub sync_backoff_base: Duration,
    pub sync_backoff_cap: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            auto_save_interval: Duration::from_secs(30),
            remote_timeout: Duration::from_secs(10),
            saved_revert_delay: Duration::from_secs(2),
            max_sync_retries: 8,
            sync_backoff_base: Duration::from_secs(1),
            sync_backoff_cap: Duration::from_secs(300),
        }
    }
}

struct BackgroundTasks {
    ticker: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

/// How a queued item left the queue: applied on the server, or dropped
/// because the session is gone.
enum Delivery {
    Applied,
    Dropped,
}

/// Orchestrator for the single active reading session: remote CRUD, the
/// auto-save status machine, the offline sync queue, and conflict state.
/// Explicitly constructed with its collaborators injected; no globals.
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<Mutex<StoreState>>,
    remote: Arc<dyn SessionService>,
    storage: Arc<dyn KeyValueStorage>,
    network: Arc<dyn NetworkMonitor>,
    config: SessionStoreConfig,
    /// One async lock per session id so a given session never has two
    /// update requests in flight at once.
    update_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    tasks: Arc<Mutex<Option<BackgroundTasks>>>,
    cancel: CancellationToken,
}

impl SessionStore {
    pub fn new(
        remote: Arc<dyn SessionService>,
        storage: Arc<dyn KeyValueStorage>,
        network: Arc<dyn NetworkMonitor>,
        config: SessionStoreConfig,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::new())),
            remote,
            storage,
            network,
            config,
            update_locks: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    /// Restores the persisted subset (active session, sync queue, auto-save
    /// flag) from storage. Transient fields stay at their defaults.
    pub async fn hydrate(&self) {
        let raw = match self.storage.get(STORE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(err) => {
                warn!("failed to read persisted session store: {err}");
                return;
            }
        };

        match serde_json::from_str::<PersistedStore>(&raw) {
            Ok(record) => {
                let mut state = self.state.lock().await;
                record.apply(&mut state);
                info!(
                    "restored session store (active: {}, queued: {})",
                    state.active_session.is_some(),
                    state.sync_queue.len()
                );
            }
            Err(err) => {
                warn!("persisted session store is corrupt ({err}); starting fresh");
                let _ = self.storage.remove(STORE_KEY);
            }
        }
    }

    /// Spawns the auto-save ticker and the connectivity watcher. Calling
    /// this again is a no-op, so repeated initialization cannot
    /// double-register listeners.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return;
        }

        let ticker = {
            let store = self.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let mut interval = time::interval(store.config.auto_save_interval);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => store.trigger_auto_save().await,
                    }
                }
            })
        };

        let watcher = {
            let store = self.clone();
            let cancel = self.cancel.clone();
            let mut rx = self.network.subscribe();
            tokio::spawn(async move {
                let mut was_online = *rx.borrow();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let online = *rx.borrow();
                            if online && !was_online {
                                info!("connectivity restored; draining sync queue");
                                store.process_sync_queue().await;
                            }
                            was_online = online;
                        }
                    }
                }
            })
        };

        *tasks = Some(BackgroundTasks { ticker, watcher });
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(tasks) = self.tasks.lock().await.take() {
            let _ = tasks.ticker.await;
            let _ = tasks.watcher.await;
        }
    }

    pub async fn state_snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }

    pub async fn active_session(&self) -> Option<ReadingSession> {
        self.state.lock().await.active_session.clone()
    }

    pub async fn auto_save_status(&self) -> AutoSaveStatus {
        self.state.lock().await.auto_save_status
    }

    pub async fn set_auto_save_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        state.auto_save_enabled = enabled;
        self.persist_locked(&state);
    }

    /// Durable pointer used to offer "resume" on the next visit. Purged on
    /// an ownership mismatch so a foreign session is never re-resumed.
    pub fn last_active_session_id(&self) -> Option<String> {
        self.storage.get(LAST_ACTIVE_KEY).ok().flatten()
    }

    pub async fn create_session(&self, new: NewSession) -> Result<ReadingSession, StoreError> {
        match self.with_timeout(self.remote.create(new)).await {
            Ok(session) => {
                let mut state = self.state.lock().await;
                state.active_session = Some(session.clone());
                state.last_saved_at = Some(Utc::now());
                state.last_error = None;
                if session.status.is_incomplete() {
                    state.incomplete_sessions.push(session.clone());
                }
                self.persist_locked(&state);
                drop(state);
                self.write_last_active(&session.id);
                info!("started reading session {}", session.id);
                Ok(session)
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.last_error = Some(format!("failed to start reading: {err}"));
                Err(StoreError::Remote(err))
            }
        }
    }

    /// Read-through fetch. Never touches the active session; failures are
    /// recorded for observability and reported as absence.
    pub async fn get_session(&self, id: &str) -> Option<ReadingSession> {
        match self.with_timeout(self.remote.get_by_id(id)).await {
            Ok(session) => Some(session),
            Err(err) => {
                debug!("get_session({id}) failed: {err}");
                self.state.lock().await.last_error = Some(err.to_string());
                None
            }
        }
    }

    /// Saves a partial update. `Ok(None)` means the session no longer
    /// exists (or belongs to someone else) and local state was cleared;
    /// `Ok(Some(..))` carries the authoritative copy after the write or
    /// after silent conflict reconciliation.
    pub async fn update_session(
        &self,
        id: &str,
        patch: SessionPatch,
    ) -> Result<Option<ReadingSession>, StoreError> {
        let lock = self.update_lock(id).await;
        let _guard = lock.lock().await;

        {
            let mut state = self.state.lock().await;
            if state.auto_save_enabled {
                state.set_status(AutoSaveStatus::Saving);
            }
        }

        if !self.network.is_online() {
            return Err(self.queue_offline(id, patch).await);
        }

        let token = match self.concurrency_token(id).await {
            Ok(token) => token,
            Err(err) => return self.handle_update_failure(id, patch, err).await,
        };

        match self
            .with_timeout(self.remote.update(id, patch.clone(), token))
            .await
        {
            Ok(updated) => {
                let mut state = self.state.lock().await;
                state.adopt_session(updated.clone());
                state.last_saved_at = Some(Utc::now());
                state.last_error = None;
                // the status indicator only moves while auto-save owns it
                if state.auto_save_enabled {
                    let epoch = state.set_status(AutoSaveStatus::Saved);
                    self.persist_locked(&state);
                    drop(state);
                    self.schedule_saved_revert(epoch);
                } else {
                    self.persist_locked(&state);
                }
                Ok(Some(updated))
            }
            Err(err) => self.handle_update_failure(id, patch, err).await,
        }
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let outcome = self.with_timeout(self.remote.delete(id)).await;
        match outcome {
            // already gone counts as deleted
            Ok(()) | Err(RemoteError::NotFound) => {
                let mut state = self.state.lock().await;
                if state.active_session.as_ref().is_some_and(|s| s.id == id) {
                    state.active_session = None;
                    self.remove_last_active();
                }
                state.remove_incomplete(id);
                self.persist_locked(&state);
                info!("deleted reading session {id}");
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.last_error = Some(err.to_string());
                Err(StoreError::Remote(err))
            }
        }
    }

    /// Finishes a reading. Auto-save is disabled before the remote call so
    /// a save already in flight cannot re-create an active status after
    /// completion; it is re-enabled only if the call fails.
    pub async fn complete_session(
        &self,
        id: &str,
        interpretation: Option<Value>,
    ) -> Result<CompletionReceipt, StoreError> {
        {
            let mut state = self.state.lock().await;
            state.auto_save_enabled = false;
            self.persist_locked(&state);
        }

        match self.with_timeout(self.remote.complete(id, interpretation)).await {
            Ok(receipt) => {
                let mut state = self.state.lock().await;
                if state.active_session.as_ref().is_some_and(|s| s.id == id) {
                    state.active_session = None;
                    self.remove_last_active();
                }
                state.remove_incomplete(id);
                state.set_status(AutoSaveStatus::Idle);
                self.persist_locked(&state);
                info!("completed reading session {id}");
                Ok(receipt)
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.auto_save_enabled = true;
                state.last_error = Some(err.to_string());
                self.persist_locked(&state);
                Err(StoreError::Remote(err))
            }
        }
    }

    /// Scheduled entry point: saves the active session's current state with
    /// a refreshed last-accessed timestamp. No-op without an active session
    /// or with auto-save disabled.
    pub async fn trigger_auto_save(&self) {
        let (id, patch) = {
            let state = self.state.lock().await;
            if !state.auto_save_enabled {
                return;
            }
            let Some(session) = state.active_session.as_ref() else {
                return;
            };
            (
                session.id.clone(),
                SessionPatch {
                    session_state: Some(session.session_state.clone()),
                    status: None,
                    last_accessed_at: Some(Utc::now()),
                },
            )
        };

        match self.update_session(&id, patch).await {
            Ok(_) => {}
            Err(StoreError::Offline) => debug!("auto-save deferred for {id}; offline"),
            Err(err) => warn!("auto-save failed for {id}: {err}"),
        }
    }

    /// Drains the sync queue in insertion order. Delivered items are
    /// dropped; failing items keep their relative order with an incremented
    /// retry count, and items past the retry budget move to the abandoned
    /// list. Retried items wait out an exponential backoff window first.
    pub async fn process_sync_queue(&self) {
        let pending = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.sync_queue)
        };
        if pending.is_empty() {
            return;
        }
        info!("draining sync queue ({} items)", pending.len());

        let now = Utc::now();
        let mut still_failing = Vec::new();
        let mut abandoned = Vec::new();
        let mut delivered = 0usize;

        for mut item in pending {
            if !self.item_due(&item, now) {
                still_failing.push(item);
                continue;
            }

            match self.deliver(&item).await {
                Ok(Delivery::Applied) => delivered += 1,
                Ok(Delivery::Dropped) => {}
                Err(err) => {
                    item.retry_count += 1;
                    item.last_attempt = Some(Utc::now());
                    item.error = Some(err.to_string());
                    if item.retry_count > self.config.max_sync_retries {
                        warn!(
                            "abandoning queued update for session {} after {} attempts",
                            item.session_id, item.retry_count
                        );
                        abandoned.push(item);
                    } else {
                        still_failing.push(item);
                    }
                }
            }
        }

        let mut state = self.state.lock().await;
        // mutations queued while we were draining go after the survivors
        let queued_meanwhile = std::mem::take(&mut state.sync_queue);
        state.sync_queue = still_failing;
        state.sync_queue.extend(queued_meanwhile);
        state.abandoned.extend(abandoned);

        if delivered > 0 && state.sync_queue.is_empty() {
            state.last_saved_at = Some(Utc::now());
            let epoch = state.set_status(AutoSaveStatus::Saved);
            self.persist_locked(&state);
            drop(state);
            self.schedule_saved_revert(epoch);
        } else {
            self.persist_locked(&state);
        }
    }

    /// Sends the whole queue through the batch offline-sync endpoint. A
    /// conflict outcome parks the divergence for `resolve_conflict`.
    pub async fn sync_offline_batch(&self) -> Result<(), StoreError> {
        let batch = { self.state.lock().await.sync_queue.clone() };
        if batch.is_empty() {
            return Ok(());
        }

        match self.with_timeout(self.remote.sync_offline(batch.clone())).await {
            Ok(SyncOutcome::Ok { session }) => {
                let mut state = self.state.lock().await;
                state.sync_queue.clear();
                state.adopt_session(session);
                state.last_saved_at = Some(Utc::now());
                let epoch = state.set_status(AutoSaveStatus::Saved);
                self.persist_locked(&state);
                drop(state);
                self.schedule_saved_revert(epoch);
                Ok(())
            }
            Ok(SyncOutcome::Conflict { conflicts, session }) => {
                let session_id = session
                    .as_ref()
                    .map(|s| s.id.clone())
                    .or_else(|| batch.first().map(|item| item.session_id.clone()))
                    .unwrap_or_default();
                info!("offline sync reported a conflict for session {session_id}");
                let mut state = self.state.lock().await;
                state.conflict = Some(ConflictInfo {
                    session_id,
                    server_session: session,
                    conflicts,
                });
                Ok(())
            }
            Err(RemoteError::Offline) => {
                self.state.lock().await.set_status(AutoSaveStatus::Offline);
                Err(StoreError::Offline)
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.last_error = Some(err.to_string());
                state.set_status(AutoSaveStatus::Error);
                Err(StoreError::Remote(err))
            }
        }
    }

    /// Explicit resolution path for callers that surfaced the conflict to
    /// the user instead of letting `update_session` auto-resolve.
    pub async fn resolve_conflict(
        &self,
        resolution: ConflictResolution,
    ) -> Result<ReadingSession, StoreError> {
        match self.with_timeout(self.remote.resolve_conflict(resolution)).await {
            Ok(session) => {
                let mut state = self.state.lock().await;
                state.conflict = None;
                // the resolution supersedes anything still queued for this
                // session; a later drain must not replay the rejected payloads
                state.sync_queue.retain(|item| item.session_id != session.id);
                state.active_session = Some(session.clone());
                self.persist_locked(&state);
                drop(state);
                self.write_last_active(&session.id);
                Ok(session)
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                state.last_error = Some(err.to_string());
                Err(StoreError::Remote(err))
            }
        }
    }

    pub async fn list_sessions(&self, filter: SessionFilter) -> Result<SessionPage, StoreError> {
        match self.with_timeout(self.remote.list(filter)).await {
            Ok(page) => Ok(page),
            Err(err) => {
                self.state.lock().await.last_error = Some(err.to_string());
                Err(StoreError::Remote(err))
            }
        }
    }

    /// Refreshes the known incomplete-sessions list (active + paused).
    pub async fn load_incomplete_sessions(&self) -> Result<Vec<ReadingSession>, StoreError> {
        let mut sessions = Vec::new();
        for status in [SessionStatus::Active, SessionStatus::Paused] {
            let filter = SessionFilter {
                status: Some(status),
                ..Default::default()
            };
            match self.with_timeout(self.remote.list(filter)).await {
                Ok(page) => sessions.extend(page.sessions),
                Err(err) => {
                    self.state.lock().await.last_error = Some(err.to_string());
                    return Err(StoreError::Remote(err));
                }
            }
        }

        let mut state = self.state.lock().await;
        state.incomplete_sessions = sessions.clone();
        Ok(sessions)
    }

    /// Ordered failure policy for a failed save; first match wins.
    async fn handle_update_failure(
        &self,
        id: &str,
        patch: SessionPatch,
        err: RemoteError,
    ) -> Result<Option<ReadingSession>, StoreError> {
        match err {
            // the session vanished through normal lifecycle; not an error
            RemoteError::NotFound => {
                info!("session {id} no longer exists; clearing local copy");
                self.clear_session_locally(id).await;
                Ok(None)
            }
            RemoteError::Forbidden => {
                warn!("session {id} belongs to another user; clearing local copy");
                self.clear_session_locally(id).await;
                self.remove_last_active();
                Ok(None)
            }
            RemoteError::Conflict => match self.with_timeout(self.remote.get_by_id(id)).await {
                Ok(fresh) => {
                    warn!(
                        "session {id} changed remotely; adopting server copy and discarding the local patch"
                    );
                    let mut state = self.state.lock().await;
                    state.adopt_session(fresh.clone());
                    state.last_error = None;
                    state.set_status(AutoSaveStatus::Idle);
                    self.persist_locked(&state);
                    Ok(Some(fresh))
                }
                Err(fetch_err) => {
                    let mut state = self.state.lock().await;
                    state.last_error =
                        Some(format!("failed to reload conflicting session: {fetch_err}"));
                    state.set_status(AutoSaveStatus::Error);
                    Err(StoreError::Remote(RemoteError::Conflict))
                }
            },
            RemoteError::Offline => Err(self.queue_offline(id, patch).await),
            other => {
                let mut state = self.state.lock().await;
                state.last_error = Some(other.to_string());
                state.set_status(AutoSaveStatus::Error);
                Err(StoreError::Remote(other))
            }
        }
    }

    async fn clear_session_locally(&self, id: &str) {
        let mut state = self.state.lock().await;
        if state.active_session.as_ref().is_some_and(|s| s.id == id) {
            state.active_session = None;
        }
        state.remove_incomplete(id);
        state.set_status(AutoSaveStatus::Idle);
        self.persist_locked(&state);
    }

    async fn queue_offline(&self, id: &str, patch: SessionPatch) -> StoreError {
        let item = SyncQueueItem::update(id.to_string(), patch);
        let mut state = self.state.lock().await;
        state.sync_queue.push(item);
        state.set_status(AutoSaveStatus::Offline);
        self.persist_locked(&state);
        info!(
            "queued update for session {id} while offline ({} pending)",
            state.sync_queue.len()
        );
        StoreError::Offline
    }

    /// Replays one queued mutation with the same failure policy as the live
    /// save path: a conflict adopts the server copy, and a session that is
    /// gone or belongs to another user drops the item and clears the local
    /// copy instead of burning retries on it.
    async fn deliver(&self, item: &SyncQueueItem) -> Result<Delivery, RemoteError> {
        let token = match self.concurrency_token(&item.session_id).await {
            Ok(token) => token,
            Err(err) => return self.deliver_failure(&item.session_id, err).await,
        };
        match self
            .with_timeout(self.remote.update(&item.session_id, item.data.clone(), token))
            .await
        {
            Ok(updated) => {
                self.state.lock().await.adopt_session(updated);
                Ok(Delivery::Applied)
            }
            Err(RemoteError::Conflict) => {
                match self.with_timeout(self.remote.get_by_id(&item.session_id)).await {
                    Ok(fresh) => {
                        warn!(
                            "queued update for session {} conflicted; server copy wins",
                            item.session_id
                        );
                        self.state.lock().await.adopt_session(fresh);
                        Ok(Delivery::Applied)
                    }
                    Err(err) => self.deliver_failure(&item.session_id, err).await,
                }
            }
            Err(err) => self.deliver_failure(&item.session_id, err).await,
        }
    }

    async fn deliver_failure(
        &self,
        id: &str,
        err: RemoteError,
    ) -> Result<Delivery, RemoteError> {
        match err {
            RemoteError::NotFound => {
                info!("session {id} no longer exists; dropping its queued update");
                self.clear_session_locally(id).await;
                Ok(Delivery::Dropped)
            }
            RemoteError::Forbidden => {
                warn!("session {id} belongs to another user; dropping its queued update");
                self.clear_session_locally(id).await;
                self.remove_last_active();
                Ok(Delivery::Dropped)
            }
            other => Err(other),
        }
    }

    fn item_due(&self, item: &SyncQueueItem, now: DateTime<Utc>) -> bool {
        if item.retry_count == 0 {
            return true;
        }
        let Some(last) = item.last_attempt else {
            return true;
        };
        let exp = item.retry_count.saturating_sub(1).min(20);
        let backoff = self
            .config
            .sync_backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.config.sync_backoff_cap);
        now.signed_duration_since(last)
            .to_std()
            .map(|elapsed| elapsed >= backoff)
            .unwrap_or(true)
    }

    /// Current optimistic-concurrency token for a session: the active copy
    /// when it matches, otherwise a fresh read.
    async fn concurrency_token(&self, id: &str) -> Result<DateTime<Utc>, RemoteError> {
        let active = { self.state.lock().await.active_session.clone() };
        if let Some(session) = active {
            if session.id == id {
                return Ok(session.updated_at);
            }
        }
        let fetched = self.with_timeout(self.remote.get_by_id(id)).await?;
        Ok(fetched.updated_at)
    }

    async fn update_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.update_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reverts `saved` to `idle` after the configured delay, unless a newer
    /// status transition happened in the meantime.
    fn schedule_saved_revert(&self, epoch: u64) {
        let store = self.clone();
        tokio::spawn(async move {
            time::sleep(store.config.saved_revert_delay).await;
            let mut state = store.state.lock().await;
            if state.status_epoch == epoch && state.auto_save_status == AutoSaveStatus::Saved {
                state.auto_save_status = AutoSaveStatus::Idle;
            }
        });
    }

    fn persist_locked(&self, state: &StoreState) {
        let record = PersistedStore::capture(state);
        match serde_json::to_string(&record) {
            Ok(serialized) => {
                if let Err(err) = self.storage.set(STORE_KEY, &serialized) {
                    warn!("failed to persist session store: {err}");
                }
            }
            Err(err) => warn!("failed to serialize session store: {err}"),
        }
    }

    fn write_last_active(&self, id: &str) {
        if let Err(err) = self.storage.set(LAST_ACTIVE_KEY, id) {
            warn!("failed to record last active session: {err}");
        }
    }

    fn remove_last_active(&self) {
        if let Err(err) = self.storage.remove(LAST_ACTIVE_KEY) {
            warn!("failed to purge last active session: {err}");
        }
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match time::timeout(self.config.remote_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }
}

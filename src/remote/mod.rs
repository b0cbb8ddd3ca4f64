use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{
    ConflictResolution, NewSession, ReadingSession, SessionFilter, SessionPage, SessionPatch,
    SyncQueueItem,
};

/// Failure kinds the store's branching logic switches on. Mirrors the
/// HTTP-ish codes the session API reports, but transport-agnostic.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("session not found")]
    NotFound,
    #[error("session belongs to another user")]
    Forbidden,
    #[error("session was modified remotely")]
    Conflict,
    #[error("network unavailable")]
    Offline,
    #[error("remote call exceeded its deadline")]
    Timeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result object of the `complete` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReceipt {
    pub session: ReadingSession,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<Value>,
}

/// Outcome of the batch offline-sync endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum SyncOutcome {
    Ok {
        session: ReadingSession,
    },
    Conflict {
        #[serde(default)]
        conflicts: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<ReadingSession>,
    },
}

/// The remote session API. Implemented elsewhere by the transport layer;
/// injected here so the store can be driven by test doubles.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn create(&self, new: NewSession) -> Result<ReadingSession, RemoteError>;

    async fn get_by_id(&self, id: &str) -> Result<ReadingSession, RemoteError>;

    /// `expected_updated_at` is the optimistic-concurrency token; a stale
    /// token yields `RemoteError::Conflict`.
    async fn update(
        &self,
        id: &str,
        patch: SessionPatch,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<ReadingSession, RemoteError>;

    async fn delete(&self, id: &str) -> Result<(), RemoteError>;

    async fn complete(
        &self,
        id: &str,
        interpretation: Option<Value>,
    ) -> Result<CompletionReceipt, RemoteError>;

    async fn list(&self, filter: SessionFilter) -> Result<SessionPage, RemoteError>;

    async fn sync_offline(&self, batch: Vec<SyncQueueItem>) -> Result<SyncOutcome, RemoteError>;

    async fn resolve_conflict(
        &self,
        resolution: ConflictResolution,
    ) -> Result<ReadingSession, RemoteError>;
}

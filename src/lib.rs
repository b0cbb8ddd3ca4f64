pub mod models;
pub mod network;
pub mod remote;
pub mod snapshot;
pub mod storage;
pub mod store;
mod utils;

pub use models::{
    ConflictInfo, ConflictResolution, DrawingState, NewSession, ReadingSession, SavedReadingState,
    SessionFilter, SessionPage, SessionPatch, SessionStatus, SnapshotDraft, SyncAction,
    SyncQueueItem,
};
pub use network::{NetworkMonitor, WatchNetworkMonitor};
pub use remote::{CompletionReceipt, RemoteError, SessionService, SyncOutcome};
pub use snapshot::{SnapshotCache, SNAPSHOT_TTL_MS};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use store::{AutoSaveStatus, SessionStore, SessionStoreConfig, StoreError, StoreState};

/// Initializes logging from `RUST_LOG` with an info default. Safe to call
/// more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

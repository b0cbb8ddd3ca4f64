pub mod session;
pub mod snapshot;
pub mod sync;

pub use session::{
    NewSession, ReadingSession, SessionFilter, SessionPage, SessionPatch, SessionStatus,
};
pub use snapshot::{DrawingState, SavedReadingState, SnapshotDraft};
pub use sync::{ConflictInfo, ConflictResolution, SyncAction, SyncQueueItem};

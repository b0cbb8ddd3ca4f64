use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DrawingState {
    Idle,
    Shuffling,
    Selecting,
    Flipping,
    Complete,
}

/// A local, short-lived snapshot of draw progress, independent of the
/// remote-backed session. Card payloads stay opaque JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedReadingState {
    pub spread_type: String,
    pub drawing_state: DrawingState,
    pub shuffled_deck: Vec<Value>,
    pub drawn_cards: Vec<Value>,
    pub revealed_indices: Vec<u32>,
    /// Snapshot creation time, ms since epoch. Drives the 24h expiry.
    pub timestamp: i64,
}

/// What the drawing UI hands the cache; the cache stamps the timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDraft {
    pub spread_type: String,
    pub drawing_state: DrawingState,
    pub shuffled_deck: Vec<Value>,
    pub drawn_cards: Vec<Value>,
    pub revealed_indices: Vec<u32>,
}

impl SnapshotDraft {
    pub fn into_state(self, timestamp: i64) -> SavedReadingState {
        SavedReadingState {
            spread_type: self.spread_type,
            drawing_state: self.drawing_state,
            shuffled_deck: self.shuffled_deck,
            drawn_cards: self.drawn_cards,
            revealed_indices: self.revealed_indices,
            timestamp,
        }
    }
}

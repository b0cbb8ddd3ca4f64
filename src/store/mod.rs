pub mod controller;
pub mod state;

pub use controller::{SessionStore, SessionStoreConfig, StoreError};
pub use state::{AutoSaveStatus, PersistedStore, StoreState};

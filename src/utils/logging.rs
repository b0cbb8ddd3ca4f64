//! Conditional logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! A module that wants switchable logging defines the flag and uses the
//! crate-root macros:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::log_info;
//! log_info!("only emitted when ENABLE_LOGS is true");
//! ```

/// Conditional info logging; checks `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional warn logging; checks `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional error logging; checks `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

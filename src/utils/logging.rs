//! Conditional logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! Each module that uses these defines its own switch:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! ```
//! and imports the macros from the crate root:
//! ```rust,ignore
//! use crate::{log_info, log_warn};
//! ```
//! Noisy paths (the deduplicator drops hundreds of signals per hour) can be
//! silenced per module without touching the global `RUST_LOG` filter.

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::trace!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Macro for conditional info logging.
/// Checks the `ENABLE_LOGS` const in the calling module.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Macro for conditional warn logging.
/// Checks the `ENABLE_LOGS` const in the calling module.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Macro for conditional error logging.
/// Checks the `ENABLE_LOGS` const in the calling module.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

//! In-house utilities shared by the Weft messaging fabric crates.
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Implements an opinionated retry pacer over the exponential backoff.
mod backoff {
    pub mod config;
    pub mod wrapper;
}
pub use self::backoff::{config::BackoffConfig, wrapper::RetryPacer};

/// Exposes serde helpers for human-readable durations in configuration.
pub mod human_duration;

//! Synchronization primitives used across the Weft messaging fabric.
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes a request-response channel between asynchronous tasks.
mod hatch;
pub use self::hatch::{Fetcher, Hatch};

/// Exposes a one-shot barrier.
mod latch;
pub use self::latch::{Gate, Latch};

//! Process-wide facades shared by every Weft component: the global fabric
//! context (a single cancellation point for the whole process) and the
//! spindown registry that gives background workloads a chance to clean up
//! before the process exits.
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Fabric context.
mod context;
pub use self::context::{FabricContext, TerminationCause};

/// Spindown registry & tokens.
mod spindown;
pub use self::spindown::{token::SpindownToken, FabricSpindown};

/// Globally recognized field name that, when present in a `tracing` macro
/// call, should trigger an event for an external alerting system.
pub const ALERT_FIELD_NAME: &str = "alert";

/// [Terminates](FabricContext::terminate) the global [`FabricContext`] and
/// waits for [`FabricSpindown`] to complete.
///
/// This is the global shutdown-and-clean-up routine for all workloads that
/// integrate with the Weft family via [`FabricContext`] and
/// [`FabricSpindown`]. Await on this function as the last thing before
/// returning from the main application logic.
pub async fn weft_shutdown() {
    // Terminate the global fabric context
    FabricContext::terminate();

    // Wait for the registered spindown workloads to finish
    FabricSpindown::completed().await;
}

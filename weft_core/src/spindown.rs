use self::registry::SpindownRegistry;
use crate::SpindownToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

mod registry;
pub mod token;

// Global singleton spindown registry
static GLOBAL: OnceLock<SpindownRegistry> = OnceLock::new();

// The shutdown budget, in milliseconds, applied when the registry is first
// touched
const DEFAULT_BUDGET_MS: u64 = 2_000;
static BUDGET_MS: AtomicU64 = AtomicU64::new(DEFAULT_BUDGET_MS);

/// Facade for the process-global spindown registry.
///
/// Background workloads of the fabric — a broker connection keeper, a
/// consumer pump, a correlation proxy — [register](FabricSpindown::register)
/// here and receive a [`SpindownToken`]. When the process shuts down, the
/// main task [waits](FabricSpindown::completed) for every registered
/// workload to punch its token out within the **shutdown budget**, which
/// gives the workloads their window to close connections, cancel pending
/// requests, and drain in-flight deliveries instead of being killed
/// mid-operation.
///
/// This facade does **not** tell the workloads to begin spinning down; that
/// is the job of the global [`FabricContext`](crate::FabricContext), which
/// each workload is expected to watch.
pub struct FabricSpindown;

impl FabricSpindown {
    /// Informs the global spindown registry that a workload with the given
    /// human-readable name will need to be awaited during spindown.
    ///
    /// The returned [`SpindownToken`] must be used by the workload to signal
    /// back once it has gracefully completed; dropping the token counts.
    pub fn register(name: impl AsRef<str>) -> SpindownToken {
        Self::registry().register(name.as_ref())
    }

    /// Adjusts the shutdown budget: how long [`completed`](Self::completed)
    /// waits for the registered workloads before giving up on the
    /// stragglers.
    ///
    /// Must be called before any interaction with the registry (such as
    /// [registering](Self::register) a workload); later calls have no
    /// effect.
    pub fn set_shutdown_budget(budget: Duration) {
        BUDGET_MS.store(budget.as_millis() as u64, Ordering::Relaxed);
    }

    /// Collects all previously [registered](FabricSpindown::register)
    /// workloads and waits, within the shutdown budget, for them to signal
    /// completion. Performed in repeated cycles: workloads registered while
    /// earlier ones are draining are awaited in the next cycle, under the
    /// same shared budget.
    pub async fn completed() {
        let _ = Self::registry().drained().await;
    }

    /// Retrieves the global (singleton) [`SpindownRegistry`], lazily
    /// initialized with the budget configured at that moment.
    fn registry() -> &'static SpindownRegistry {
        GLOBAL.get_or_init(|| {
            let budget = Duration::from_millis(BUDGET_MS.load(Ordering::Relaxed));

            SpindownRegistry::new(budget)
        })
    }
}

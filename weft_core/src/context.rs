use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// Process-wide singleton behind the facade
static STATE: OnceLock<ContextState> = OnceLock::new();

/// The shared state of the fabric context: the root cancellation token plus
/// the cause recorded by whichever party terminated first.
struct ContextState {
    token: CancellationToken,
    cause: OnceLock<TerminationCause>,
}

/// Why the fabric context was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationCause {
    /// Termination was requested programmatically, e.g. by
    /// [`weft_shutdown`](crate::weft_shutdown) or by a single-shot worker
    /// that finished its one task.
    Requested,
    /// An OS shutdown signal was intercepted (see
    /// [`FabricContext::auto_terminate`]).
    Signal,
}

/// Facade representing the global (singleton) fabric context.
///
/// The context starts alive and terminates exactly once; the first party to
/// terminate it also records the [`TerminationCause`]. Consumer pumps,
/// connection keepers, and correlation proxies treat the context as the
/// central "should I still be working" reference: they either
/// [wait](FabricContext::terminated) on it directly or derive a
/// [child token](FabricContext::child_token) that doubles as their own
/// disposal signal.
pub struct FabricContext;

impl FabricContext {
    /// Internal chokepoint for the lazily initialized [`ContextState`].
    fn state() -> &'static ContextState {
        STATE.get_or_init(|| ContextState {
            token: CancellationToken::new(),
            cause: OnceLock::new(),
        })
    }

    /// Returns a [`CancellationToken`] that fires when the global context
    /// terminates, and can additionally be cancelled on its own without
    /// affecting the context.
    ///
    /// Subscriptions and handlers use such linked tokens as their scoped
    /// lifetimes: disposal cancels just the one token, fabric termination
    /// cancels them all.
    pub fn child_token() -> CancellationToken {
        Self::state().token.child_token()
    }

    /// Blocks until the global fabric context is terminated. Completes
    /// immediately when the context has already been terminated; any number
    /// of tasks may wait concurrently.
    pub async fn terminated() {
        Self::state().token.cancelled().await;
    }

    /// Terminates the global fabric context, recording a
    /// [programmatic](TerminationCause::Requested) cause. Repeated calls
    /// produce no additional effect.
    pub fn terminate() {
        Self::terminate_with(TerminationCause::Requested);
    }

    /// Reports why the context was terminated, or [`None`] while it is
    /// still alive.
    pub fn termination_cause() -> Option<TerminationCause> {
        Self::state().cause.get().copied()
    }

    /// Reports whether the context has been terminated as of this moment.
    /// Not suitable for waiting; for that, use
    /// [`FabricContext::terminated`].
    pub fn is_terminated() -> bool {
        Self::state().token.is_cancelled()
    }

    /// Reports whether the context has **not** yet been terminated as of
    /// this moment.
    pub fn is_alive() -> bool {
        !Self::is_terminated()
    }

    /// Schedules listening for OS shutdown signals, which
    /// [replaces](FabricContext::watch_shutdown_signals) the default
    /// shutdown behavior of this entire OS process: the first intercepted
    /// signal terminates the context (with the
    /// [`Signal`](TerminationCause::Signal) cause) instead of killing the
    /// process.
    ///
    /// Repeated calls produce no additional effect. This method must be
    /// awaited to ensure that signal listening has started by the time the
    /// returned future completes.
    pub async fn auto_terminate() {
        // Guard against multiple calls to this method
        static CALLED: AtomicBool = AtomicBool::new(false);

        if CALLED.swap(true, Ordering::Relaxed) {
            return;
        }

        tokio::spawn(Self::watch_shutdown_signals());

        // Yield to the runtime to give the task above time to start working
        tokio::task::yield_now().await;
    }

    /// The single termination chokepoint: records the cause exactly once,
    /// and only the recording party cancels the token.
    fn terminate_with(cause: TerminationCause) {
        let state = Self::state();

        if state.cause.set(cause).is_ok() {
            info!(?cause, "Terminating fabric context");

            state.token.cancel();
        }
    }

    /// Hijacks the OS shutdown signals for the rest of the process
    /// lifetime. The first signal terminates the context; a repeated signal
    /// means the operator is done waiting, so the process exits immediately
    /// with a non-zero status code.
    ///
    /// This is a one-way street: the original shutdown behavior cannot be
    /// restored.
    async fn watch_shutdown_signals() -> ! {
        Self::next_shutdown_signal().await;

        info!("Shutdown signal intercepted");
        Self::terminate_with(TerminationCause::Signal);

        Self::next_shutdown_signal().await;

        warn!("Repeated shutdown signal intercepted; exiting");
        std::process::exit(1);
    }

    /// Waits for the next OS shutdown signal (`SIGINT`/`SIGTERM`) on a Unix
    /// platform.
    #[cfg(unix)]
    async fn next_shutdown_signal() {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).unwrap();
        let mut sigterm = signal(SignalKind::terminate()).unwrap();

        tokio::select! {
            biased; // no need to pay for randomized branch checking
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    /// Waits for the next `ctrl_c` action on a non-Unix platform.
    #[cfg(not(unix))]
    async fn next_shutdown_signal() {
        tokio::signal::ctrl_c().await.unwrap();
    }
}

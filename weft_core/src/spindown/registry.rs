use crate::SpindownToken;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use scopeguard::defer;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::select;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Thread-safe growable storage for registered workloads, with the ability
/// to wait for all of them to signal back completion.
pub(crate) struct SpindownRegistry {
    registry: Mutex<Vec<Workload>>,
    timeout: Duration,
}

impl SpindownRegistry {
    /// Internal constructor.
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            registry: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// Adds a workload with the given name (which needs not be unique) and
    /// returns the corresponding [`SpindownToken`].
    pub(crate) fn register(&self, name: &str) -> SpindownToken {
        let workload = Workload::new(name);
        let token = workload.token();

        self.registry.lock().push(workload);

        token
    }

    /// Waits until all previously registered workloads have signaled
    /// completion, or until the shared shutdown budget runs out.
    ///
    /// Returns the count of workloads that drained in time, or a
    /// [`SpindownTimeout`] naming how many did not.
    pub(crate) async fn drained(&self) -> Result<usize, SpindownTimeout> {
        info!("Spindown initiated");

        // Create a notification mechanism for the shared spindown timeout
        let notify_in = Arc::new(Notify::new());
        let notify_out = Arc::clone(&notify_in);

        // Start the spindown timer
        let timeout = self.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            notify_in.notify_one();
        });

        // Abort the timer in the end, no matter the outcome
        defer! { timer.abort() }

        // Spin down in cycles: workloads registered during a cycle are
        // collected in the next one
        let mut count = 0usize;
        loop {
            // Take the currently registered workloads, leaving an empty
            // vector in their place
            let workloads = {
                let mut registry = self.registry.lock();
                std::mem::take(&mut *registry)
            };

            count += workloads.len();

            // Claim success once there are no more registered workloads
            if workloads.is_empty() {
                info!("Spindown completed");
                return Ok(count);
            }

            info!(
                "Waiting for {} registered workload(s) to complete",
                workloads.len(),
            );

            // Perform a single spindown cycle
            if let Err(timed_out) = Self::spin_down_once(workloads, &notify_out).await {
                return Err(SpindownTimeout {
                    spun_down: count - timed_out,
                    timed_out,
                });
            }
        }
    }

    /// Awaits one batch of workloads; an error carries the count of
    /// workloads that did not complete before the shared timer fired.
    async fn spin_down_once(workloads: Vec<Workload>, timeout: &Notify) -> Result<(), usize> {
        // Collect the completion futures into an easily poll-able collection
        let mut futures = workloads
            .into_iter()
            .map(WorkloadFuture::from)
            .collect::<FuturesUnordered<_>>();

        loop {
            select! {
                biased;
                _ = timeout.notified() => {
                    // Time is out: report the workloads that did not make it
                    for future in &futures {
                        error!(
                            workload = future.name.as_ref(),
                            "Did not complete in time during spindown",
                        );
                    }
                    warn!("Some workloads did not complete gracefully");

                    return Err(futures.len());
                }
                completed = futures.next() => {
                    if let Some(workload) = completed {
                        info!(workload = workload.as_ref(), "Completed gracefully");
                    }

                    if futures.is_empty() {
                        info!("All workloads completed gracefully");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Little marker for spindown timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub(crate) struct SpindownTimeout {
    spun_down: usize,
    timed_out: usize,
}

/// Represents an arbitrary workload registered with [`SpindownRegistry`]: a
/// human-readable name that shows up in log entries during the spindown
/// phase, plus the completion token.
struct Workload {
    name: Arc<str>,
    token: CancellationToken,
}

impl Workload {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            token: CancellationToken::new(),
        }
    }

    /// Creates a [`SpindownToken`] associated with this workload. Punching
    /// out any of the created tokens counts as completion.
    fn token(&self) -> SpindownToken {
        SpindownToken::new(Arc::clone(&self.name), self.token.clone())
    }
}

/// Custom future that yields the workload name when its token is punched
/// out.
struct WorkloadFuture {
    name: Arc<str>,
    completion: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl From<Workload> for WorkloadFuture {
    fn from(workload: Workload) -> Self {
        let completion = Box::pin(async move { workload.token.cancelled().await });

        Self {
            name: workload.name,
            completion,
        }
    }
}

impl Future for WorkloadFuture {
    type Output = Arc<str>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.completion.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(_) => Poll::Ready(self.name.clone()),
        }
    }
}

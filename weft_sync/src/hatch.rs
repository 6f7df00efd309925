use std::future::pending;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

/// A simplified request-response channel between asynchronous tasks: one
/// **owner task** holds the [`Hatch`] and serves requests for a resource `T`,
/// while any number of **requester tasks** hold cheap [`Fetcher`] clones.
///
/// The flow is deliberately error-less. A requester either receives the
/// resource, receives [`None`] when the communication broke down (the owner
/// went away, or dropped the request without serving it), or — via
/// [`Fetcher::await_value`] — accepts the risk of waiting forever. Breakage
/// caused by either side exiting is treated as a normal part of the process
/// lifecycle: it does not panic and is not logged.
///
/// # Example
///
/// ```
/// use weft_sync::Hatch;
///
/// # tokio_test::block_on(async {
/// let hatch: Hatch<u32> = Hatch::new();
/// let fetcher = hatch.fetcher();
///
/// tokio::spawn(async move {
///     let request = hatch.requested().await;
///     let _ = request.send(42);
/// });
///
/// assert_eq!(fetcher.fetch().await, Some(42));
/// # });
/// ```
#[derive(Debug)]
pub struct Hatch<T> {
    listener: AsyncMutex<mpsc::Receiver<oneshot::Sender<T>>>,
    template: mpsc::Sender<oneshot::Sender<T>>,
}

/// Allows asynchronously fetching the resource `T` from the owner of the
/// linked [`Hatch`]. Cheap to clone and pass between tasks.
#[derive(Debug, Clone)]
pub struct Fetcher<T> {
    requester: mpsc::Sender<oneshot::Sender<T>>,
}

impl<T> Hatch<T> {
    /// Creates a new [`Hatch`] from which any number of linked [`Fetcher`]s
    /// may be [spawned](Hatch::fetcher).
    pub fn new() -> Self {
        // No point buffering more than one request: every requester awaits
        // its response immediately after sending the request
        let (template, listener) = mpsc::channel(1);

        Self {
            listener: AsyncMutex::new(listener),
            template,
        }
    }

    /// Spawns a [`Fetcher`] linked to this hatch.
    pub fn fetcher(&self) -> Fetcher<T> {
        Fetcher {
            requester: self.template.clone(),
        }
    }

    /// Waits until the resource `T` is requested from any of the linked
    /// [`Fetcher`]s, then returns the one-off sender through which the
    /// resource should be passed back to the requester.
    ///
    /// Only one task may listen at a time (the nature of `mpsc` receivers).
    pub async fn requested(&self) -> oneshot::Sender<T> {
        let mut listener = self.listener.lock().await;

        listener.recv().await.expect(concat!(
            "the request channel of this hatch cannot be closed while the",
            " hatch exists: the hatch owns both the receiver and at least one",
            " sender, and never closes the receiver",
        ))
    }
}

impl<T> Default for Hatch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fetcher<T> {
    /// Requests the resource `T` from the owner of the linked [`Hatch`].
    /// Returns [`None`] on any communication failure (the hatch no longer
    /// exists, or the request was dropped without a response).
    pub async fn fetch(&self) -> Option<T> {
        let (sender, receiver) = oneshot::channel();

        // Silently give up if the linked hatch no longer exists
        if self.requester.send(sender).await.is_err() {
            return None;
        }

        receiver.await.ok()
    }

    /// Performs a [normal fetch](Fetcher::fetch), but gives up and returns
    /// [`None`] after the given `timeout`.
    pub async fn fetch_timeout(&self, timeout: Duration) -> Option<T> {
        select! {
            biased;
            value = self.fetch() => value,
            _ = tokio::time::sleep(timeout) => None,
        }
    }

    /// Requests the resource `T` and waits for it as long as it takes,
    /// potentially forever.
    ///
    /// This exerts useful backpressure when the requester is logically unable
    /// to proceed without the resource and the owner has a good reason to
    /// withhold it (e.g. a broker connection that cannot currently be
    /// established, or a fabric that has entered its spindown phase).
    pub async fn await_value(&self) -> T {
        if let Some(value) = self.fetch().await {
            return value;
        }

        // The linked hatch is gone; the caller accepted the risk of waiting
        // forever
        pending::<()>().await;
        unreachable!()
    }
}

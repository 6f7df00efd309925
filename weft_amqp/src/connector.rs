use crate::Handle;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use lapin::{Channel, Connection, ConnectionProperties, Error as LapinError};
use secure_string::SecureString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use weft_core::{FabricContext, FabricSpindown, SpindownToken};
use weft_sync::{Fetcher, Hatch};
use weft_util::RetryPacer;

/// Runs in the background and maintains at most one live connection to the
/// AMQP broker identified by the given [`Handle`]. Exposes a cheaply
/// clone-able [`Gateway`] through which any number of tasks can request a
/// fresh [`Channel`] created on the current connection.
///
/// Reconnection and clean-up are fully encapsulated: when a channel is
/// requested and the current connection cannot produce one, the connector
/// discards the connection (closing it in the background) and re-connects
/// with exponential backoff. Serving channel requests one at a time through
/// the internal [`Hatch`] also serializes channel creation, so the
/// connection is never hammered concurrently.
///
/// The broker library's own topology recovery stays disabled on purpose:
/// subscriptions re-declare their queues and bindings themselves when a
/// channel dies, and mixing the two mechanisms races the re-declaration and
/// duplicates consumers.
///
/// The connector is integrated with [`FabricSpindown`]: once the global
/// [`FabricContext`] is terminated, it stops serving channels and gracefully
/// closes the current connection.
pub struct Connector {
    /// Globally unique name of this connector, for logging purposes.
    name: Arc<str>,
    /// Identifier of this connector's [`Handle`], for logging purposes.
    identifier: Arc<str>,
    /// DSN of the broker this connector connects to.
    dsn: SecureString,
    /// The current connection, if any.
    connection: AsyncMutex<Option<Connection>>,
    /// Previous connections being closed in the background.
    discarded: AsyncMutex<FuturesUnordered<JoinHandle<()>>>,
    /// Counts discarded connections, to periodically drain the backlog.
    discarded_count: AtomicUsize,
    /// Paces repeated connection attempts.
    pacer: RetryPacer,
    /// Receives incoming [`Channel`] requests.
    hatch: Hatch<Channel>,
    /// Canary that tells the fabric when this connector has wound down.
    _spindown_token: SpindownToken,
}

/// An asynchronous gateway for retrieving fresh [`Channel`]s from a running
/// [`Connector`]. Created by [`Connector::start`]; cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    fetcher: Fetcher<Channel>,
}

impl Connector {
    /// Creates a new [`Connector`] for the given [`Handle`] and sends it into
    /// the background to lazily serve [`Channel`] requests via the returned
    /// [`Gateway`].
    pub fn start(handle: impl AsRef<Handle>) -> Gateway {
        let handle = handle.as_ref();
        let name = Self::compose_name(handle);
        let hatch = Hatch::new();
        let fetcher = hatch.fetcher();

        let connector = Self {
            identifier: Arc::from(handle.identifier()),
            dsn: handle.dsn().clone(),
            connection: AsyncMutex::new(None),
            discarded: AsyncMutex::new(FuturesUnordered::new()),
            discarded_count: AtomicUsize::new(0),
            pacer: RetryPacer::new(handle.backoff()),
            hatch,
            _spindown_token: FabricSpindown::register(&name),
            name,
        };

        tokio::spawn(connector.serve());

        Gateway { fetcher }
    }

    /// Composes a globally unique, human-readable name for this connector.
    fn compose_name(handle: &Handle) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "amqp:connector:{}:{}",
            handle.name(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }
}

impl Gateway {
    /// Requests a fresh [`Channel`] from the linked [`Connector`] and waits
    /// for it as long as it takes, which may be a long or even indefinite
    /// time depending on broker availability.
    pub async fn channel(&self) -> Channel {
        self.fetcher.await_value().await
    }

    /// Same as [`channel`](Gateway::channel), but gives up and returns
    /// [`None`] after the given `timeout`.
    pub async fn channel_with_timeout(&self, timeout: Duration) -> Option<Channel> {
        self.fetcher.fetch_timeout(timeout).await
    }
}

impl Connector {
    /// Main serving loop: hands out channels until the global context is
    /// terminated, then disconnects and drains the clean-up backlog.
    async fn serve(self) {
        loop {
            // Wait for either the fabric to terminate or a request to arrive;
            // serving the request is itself asynchronous, so keep watching
            // the context there too
            let interrupted = select! {
                biased;
                _ = FabricContext::terminated() => true,
                request = self.hatch.requested() => {
                    select! {
                        biased;
                        _ = FabricContext::terminated() => true,
                        _ = self.serve_request(request) => false,
                    }
                }
            };

            if interrupted {
                break;
            }
        }

        info!(
            name = self.name.as_ref(),
            identifier = self.identifier.as_ref(),
            "Closing the AMQP connection",
        );

        // Disconnect, then wait for every previously discarded connection to
        // finish closing in the background
        self.disconnect().await;
        self.drain_discarded().await;
    }

    /// Serves a single channel request.
    async fn serve_request(&self, request: oneshot::Sender<Channel>) {
        // Producing the channel may take any amount of time, depending on
        // broker availability
        let channel = self.produce_channel().await;

        if request.send(channel).is_err() {
            // The requester gave up waiting; nothing to do about it
            warn!(
                name = self.name.as_ref(),
                identifier = self.identifier.as_ref(),
                "Too late to send the requested AMQP channel",
            );
        }
    }

    /// Repeatedly attempts to create a channel on the current connection,
    /// re-connecting (with backoff) as necessary, until the first success.
    async fn produce_channel(&self) -> Channel {
        let mut connection_guard = self.connection.lock().await;

        loop {
            // Without a connection there is nothing to try: establish one
            let Some(connection) = connection_guard.take() else {
                *connection_guard = self.establish_connection().await;
                continue;
            };

            match connection.create_channel().await {
                // Fresh channel on a live connection: put the connection
                // back and return
                Ok(channel) => {
                    self.pacer.settle();
                    *connection_guard = Some(connection);

                    return channel;
                }

                // The connection has gone bad: discard it and re-connect on
                // the next turn of the loop
                Err(error) => {
                    warn!(
                        name = self.name.as_ref(),
                        identifier = self.identifier.as_ref(),
                        ?error,
                        error_message = %error,
                        "Failed to create an AMQP channel",
                    );

                    self.discard_connection(connection).await;
                    self.pacer.pause().await;
                }
            }
        }
    }

    /// Attempts to establish a fresh connection to the broker.
    async fn establish_connection(&self) -> Option<Connection> {
        // Wire lapin into the current tokio runtime
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        match Connection::connect(self.dsn.unsecure(), properties).await {
            Ok(connection) => Some(connection),

            // Most likely no connectivity to the broker right now
            Err(error) => {
                warn!(
                    name = self.name.as_ref(),
                    identifier = self.identifier.as_ref(),
                    ?error,
                    error_message = %error,
                    "Failed to establish an AMQP connection",
                );

                self.pacer.pause().await;

                None
            }
        }
    }

    /// Takes and discards the current connection, if any.
    async fn disconnect(&self) {
        let optional_connection = self.connection.lock().await.take();

        if let Some(connection) = optional_connection {
            self.discard_connection(connection).await;
        }
    }

    /// Sends the given connection to be closed in the background, and every
    /// once in a while drains the accumulated clean-up tasks.
    async fn discard_connection(&self, connection: Connection) {
        let future = Self::close_connection(self.name.clone(), self.identifier.clone(), connection);
        self.discarded.lock().await.push(tokio::spawn(future));

        const DISCARDED_BETWEEN_CLEANUPS: usize = 10;
        let count = self.discarded_count.fetch_add(1, Ordering::Relaxed);
        if count % DISCARDED_BETWEEN_CLEANUPS == 0 {
            self.drain_discarded().await;
        }
    }

    /// Sequentially awaits all clean-up tasks that are closing discarded
    /// connections in the background.
    async fn drain_discarded(&self) {
        let mut discarded = self.discarded.lock().await;

        while discarded.next().await.is_some() {}
    }

    /// Closes the given connection and reports the outcome.
    async fn close_connection(name: Arc<str>, identifier: Arc<str>, connection: Connection) {
        let result = connection.close(0, "Discarded connection").await;

        match result {
            Ok(_) => info!(
                name = name.as_ref(),
                identifier = identifier.as_ref(),
                "Closed a discarded AMQP connection",
            ),
            Err(LapinError::InvalidConnectionState(_)) => info!(
                name = name.as_ref(),
                identifier = identifier.as_ref(),
                "Discarded a previously lost AMQP connection",
            ),
            Err(error) => warn!(
                name = name.as_ref(),
                identifier = identifier.as_ref(),
                ?error,
                error_message = %error,
                "Failed to cleanly close a discarded AMQP connection",
            ),
        }
    }
}

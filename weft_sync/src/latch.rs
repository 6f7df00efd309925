use tokio_util::sync::CancellationToken;

/// A synchronization primitive that can be released exactly once, notifying
/// every associated [`Gate`]. Useful for one-shot completion signals, such as
/// a single-task worker telling its host process that the work is done.
///
/// ```
/// use weft_sync::Latch;
///
/// # tokio_test::block_on(async {
/// let latch = Latch::new();
/// let gate = latch.gate();
///
/// tokio::spawn(async move {
///     // ... perform the one-shot work ...
///     latch.release();
/// });
///
/// gate.opened().await;
/// # });
/// ```
#[derive(Debug, Default, Clone)]
pub struct Latch {
    token: CancellationToken,
}

/// A single-release barrier that opens when the associated [`Latch`] is
/// [released](Latch::release). Cheap to clone; any number of tasks may await
/// it, before or after the release.
#[derive(Debug, Clone)]
pub struct Gate {
    token: CancellationToken,
}

impl Latch {
    /// Returns a brand new, unreleased [`Latch`].
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a new [`Gate`] associated with this latch. Multiple gates may
    /// be created and awaited independently.
    pub fn gate(&self) -> Gate {
        Gate {
            token: self.token.clone(),
        }
    }

    /// Permanently releases this latch, opening all associated [`Gate`]s.
    /// Repeated releases produce no additional effect.
    pub fn release(&self) {
        self.token.cancel();
    }

    /// Reports whether this latch has already been released.
    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Gate {
    /// Waits until the associated [`Latch`] is released. Completes
    /// immediately if the latch has already been released.
    pub async fn opened(&self) {
        self.token.cancelled().await;
    }

    /// Reports whether this gate is already open.
    pub fn is_open(&self) -> bool {
        self.token.is_cancelled()
    }
}

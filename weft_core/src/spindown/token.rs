use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A token issued for every workload registered with
/// [`FabricSpindown`](crate::FabricSpindown). The token carries the
/// workload's name, so punch-outs are attributable in logs.
///
/// The owning workload uses the token to
/// [indicate](SpindownToken::punch_out) that it has gracefully completed and
/// cleaned up its resources; letting the token go out of scope punches out
/// as well.
pub struct SpindownToken {
    workload: Arc<str>,
    token: CancellationToken,
}

impl SpindownToken {
    /// Internal constructor.
    pub(crate) fn new(workload: Arc<str>, token: CancellationToken) -> Self {
        Self { workload, token }
    }

    /// Indicates that the workload associated with this token has completed
    /// its spindown procedure, whatever it might be. Only the first
    /// punch-out of a given token is recorded.
    pub fn punch_out(&self) {
        if !self.token.is_cancelled() {
            debug!(workload = self.workload.as_ref(), "Workload punched out");

            self.token.cancel();
        }
    }

    /// Reports whether this token has already been punched out.
    pub fn is_punched_out(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SpindownToken {
    fn drop(&mut self) {
        self.punch_out();
    }
}

impl Debug for SpindownToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpindownToken")
            .field("workload", &self.workload)
            .field("punched_out", &self.is_punched_out())
            .finish()
    }
}

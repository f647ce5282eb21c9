use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::Result;
use crate::WatchError;

/// Monotonic revision counter with broadcast wake-up.
///
/// Every [`bump`](Revision::bump) advances the counter by one and wakes all
/// tasks blocked in [`wait_past`](Revision::wait_past). Waiters compare the
/// counter against the value they started from instead of counting wake-ups,
/// so several bumps landing between two checks are never lost.
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct Revision {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for Revision {
    fn default() -> Self {
        Self::new()
    }
}

impl Revision {
    /// New counter at revision 0
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Advance the revision and wake every waiter. Returns the new revision.
    pub fn bump(&self) -> u64 {
        let mut next = 0;
        self.tx.send_modify(|rev| {
            *rev += 1;
            next = *rev;
        });
        trace!(revision = next, "revision bumped");
        next
    }

    /// Block until the revision moves past the value current at call time.
    pub async fn changed(
        &self,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let observed = self.current();
        self.wait_past(observed, cancel).await
    }

    /// Block until the revision is greater than `last_seen`.
    ///
    /// Returns immediately when it already is. Fails with
    /// [`WatchError::Cancelled`] once `cancel` fires.
    pub async fn wait_past(
        &self,
        last_seen: u64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut rx = self.tx.subscribe();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WatchError::Cancelled.into()),
            seen = async { rx.wait_for(|rev| *rev > last_seen).await.map(|rev| *rev) } => {
                seen.map_err(|_| WatchError::SignalClosed.into())
            }
        }
    }
}

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ConfigFileChangeEvent;

/// Callback invoked inline by the publishing watcher
pub type ChangeCallback = Arc<dyn Fn(&ConfigFileChangeEvent) + Send + Sync>;

/// A registered event consumer
#[derive(Clone)]
pub(crate) enum ChangeSink {
    /// Direct invocation on the watcher task
    Callback(ChangeCallback),
    /// Bounded queue; a full queue makes the publisher wait
    Queue(mpsc::Sender<ConfigFileChangeEvent>),
}

impl ChangeSink {
    fn is_closed(&self) -> bool {
        match self {
            ChangeSink::Callback(_) => false,
            ChangeSink::Queue(tx) => tx.is_closed(),
        }
    }
}

/// Ordered collection of sinks, iterated once per event
#[derive(Default)]
pub(crate) struct ChangeSinks {
    sinks: RwLock<Vec<ChangeSink>>,
}

impl ChangeSinks {
    pub(crate) fn add_callback(
        &self,
        callback: ChangeCallback,
    ) {
        self.sinks.write().push(ChangeSink::Callback(callback));
    }

    pub(crate) fn add_queue(
        &self,
        capacity: usize,
    ) -> mpsc::Receiver<ConfigFileChangeEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        self.sinks.write().push(ChangeSink::Queue(tx));
        rx
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// Deliver `event` to every sink in registration order.
    ///
    /// Queue sinks apply backpressure: this waits for room in a full
    /// queue. Returns `false` if `cancel` fired while waiting. Queues whose
    /// receiver was dropped are pruned.
    pub(crate) async fn publish(
        &self,
        event: &ConfigFileChangeEvent,
        cancel: &CancellationToken,
    ) -> bool {
        // Snapshot so registration never waits behind a slow consumer
        let snapshot: Vec<ChangeSink> = self.sinks.read().clone();

        let mut pruned = false;
        for sink in snapshot {
            match sink {
                ChangeSink::Callback(callback) => callback(event),
                ChangeSink::Queue(tx) => {
                    let sent = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return false,
                        sent = tx.send(event.clone()) => sent,
                    };
                    if sent.is_err() {
                        debug!(file = %event.file, "subscriber channel closed");
                        pruned = true;
                    }
                }
            }
        }

        if pruned {
            self.sinks.write().retain(|s| !s.is_closed());
        }
        true
    }
}

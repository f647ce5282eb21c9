use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::BackoffPolicy;

/// Doubling delay between consecutive failures, capped by the policy
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
    failures: u32,
}

impl Backoff {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            next: policy.base_delay(),
            policy,
            failures: 0,
        }
    }

    /// Consecutive failures since the last reset
    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next `wait` will sleep for
    pub(crate) fn next_delay(&self) -> Duration {
        self.next
    }

    pub(crate) fn reset(&mut self) {
        self.next = self.policy.base_delay();
        self.failures = 0;
    }

    /// Sleep for the current delay and double it.
    ///
    /// Returns `false` if `cancel` fired before the delay elapsed.
    pub(crate) async fn wait(
        &mut self,
        cancel: &CancellationToken,
    ) -> bool {
        let delay = self.next;
        self.failures += 1;
        self.next = (self.next * 2).min(self.policy.max_delay());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }
}

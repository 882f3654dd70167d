//! Drains runtime snapshots through the dispatcher, retrying per the configured policy.

use std::sync::Arc;

use pulse_core::transport::{MultiTransportDispatcher, TransportError};
use pulse_resilience::{RetryError, RetryExecutor, RetryPolicy};
use tracing::{info, warn};

use crate::runtime::RuntimeStats;

pub struct Reporter {
    dispatcher: MultiTransportDispatcher,
    retry: RetryExecutor<TransportError>,
    stats: Arc<RuntimeStats>,
}

impl Reporter {
    pub fn new(dispatcher: MultiTransportDispatcher, policy: RetryPolicy<TransportError>, stats: Arc<RuntimeStats>) -> Self {
        Self { dispatcher, retry: RetryExecutor::new(policy), stats }
    }

    pub fn dispatcher(&self) -> &MultiTransportDispatcher { &self.dispatcher }

    /// Sends the current snapshot. Counters are acknowledged only after delivery, so a failed
    /// report carries its deltas into the next one. Returns the number of metrics sent.
    pub async fn report_once(&self) -> Result<usize, RetryError<TransportError>> {
        let snapshot = self.stats.snapshot();
        if snapshot.is_empty() {
            return Ok(0);
        }
        match self.retry.call(|| self.dispatcher.send(&snapshot)).await {
            Ok(()) => {
                self.stats.acknowledge(&snapshot);
                info!(metrics = snapshot.len(), "metrics reported");
                Ok(snapshot.len())
            }
            Err(e) => {
                warn!(error = %e, "report failed, keeping counters for next round");
                Err(e)
            }
        }
    }
}

/// Default policy for transport sends: the configured delays, retrying only transient errors.
pub fn transport_policy(delays: Vec<std::time::Duration>) -> RetryPolicy<TransportError> {
    RetryPolicy::new().with_delays(delays).retry_if(TransportError::is_retryable)
}

//! Agent-side transport abstraction and the round-robin dispatcher over it.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::model::Metric;
use crate::sealer::SealError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("server answered {code}: {message}")]
    Status { code: u16, message: String },
    #[error(transparent)]
    Seal(#[from] SealError),
    #[error("encode batch: {0}")]
    Encode(String),
    #[error("no transport clients configured")]
    NoClients,
}

impl TransportError {
    /// Client errors (other than 408/429) are not worth resending unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect { .. } | TransportError::Request(_) => true,
            TransportError::Status { code, .. } => !(400..500).contains(code) || *code == 408 || *code == 429,
            TransportError::Seal(_) | TransportError::Encode(_) | TransportError::NoClients => false,
        }
    }
}

#[async_trait]
pub trait TransportClient: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> Result<(), TransportError>;
    async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}

/// Owns the configured clients and picks one per send. The cursor advances whether or not the
/// send succeeds; a failure is returned to the caller instead of failing over.
pub struct MultiTransportDispatcher {
    clients: Vec<Box<dyn TransportClient>>,
    cursor: Mutex<usize>,
}

impl MultiTransportDispatcher {
    pub fn new(clients: Vec<Box<dyn TransportClient>>) -> Result<Self, TransportError> {
        if clients.is_empty() {
            return Err(TransportError::NoClients);
        }
        Ok(Self { clients, cursor: Mutex::new(0) })
    }

    pub fn len(&self) -> usize { self.clients.len() }

    pub fn is_empty(&self) -> bool { self.clients.is_empty() }

    fn next_client(&self) -> &dyn TransportClient {
        let mut cursor = self.cursor.lock();
        let idx = *cursor;
        *cursor = (idx + 1) % self.clients.len();
        self.clients[idx].as_ref()
    }

    pub async fn send(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        let client = self.next_client();
        debug!(transport = client.name(), metrics = metrics.len(), "dispatching batch");
        client.send_metrics(metrics).await
    }

    pub async fn start_all(&self) -> Result<(), TransportError> {
        for c in &self.clients {
            c.start().await?;
        }
        Ok(())
    }

    /// Closes every client, returning the first error after attempting all of them.
    pub async fn close_all(&self) -> Result<(), TransportError> {
        let mut first = None;
        for c in &self.clients {
            if let Err(e) = c.close().await {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

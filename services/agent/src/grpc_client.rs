//! gRPC batch client. Body headers are carried as `x-body-*` metadata.

use async_trait::async_trait;
use pulse_core::headers::{from_grpc_metadata, to_grpc_metadata};
use pulse_core::model::{self, Metric};
use pulse_core::sealer::RequestSealer;
use pulse_core::transport::{TransportClient, TransportError};
use pulse_proto::metrics::metrics_client::MetricsClient;
use pulse_proto::metrics::{Empty, Payload};
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::debug;

pub struct GrpcTransport {
    endpoint: String,
    channel: Channel,
    sealer: RequestSealer,
}

/// Maps a gRPC status onto the transport taxonomy; `Unavailable` counts as a connect failure.
pub fn status_error(endpoint: &str, status: Status) -> TransportError {
    let code = match status.code() {
        Code::Unavailable => {
            return TransportError::Connect { endpoint: endpoint.to_owned(), reason: status.message().to_owned() }
        }
        Code::InvalidArgument => 400,
        Code::Unauthenticated => 401,
        Code::PermissionDenied => 403,
        Code::NotFound => 404,
        Code::DeadlineExceeded => 408,
        Code::ResourceExhausted => 429,
        _ => 500,
    };
    TransportError::Status { code, message: status.message().to_owned() }
}

impl GrpcTransport {
    /// Builds a lazily connecting channel; must be called inside a tokio runtime.
    pub fn new(address: &str, sealer: RequestSealer) -> Result<Self, TransportError> {
        let endpoint = if address.contains("://") { address.to_owned() } else { format!("http://{address}") };
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| TransportError::Connect { endpoint: endpoint.clone(), reason: e.to_string() })?
            .connect_lazy();
        Ok(Self { endpoint, channel, sealer })
    }

    fn client(&self) -> MetricsClient<Channel> { MetricsClient::new(self.channel.clone()) }
}

#[async_trait]
impl TransportClient for GrpcTransport {
    fn name(&self) -> &str { "grpc" }

    /// Probes the collector once; a failure is logged by the caller and the channel keeps
    /// reconnecting lazily.
    async fn start(&self) -> Result<(), TransportError> {
        self.client().ping(Empty {}).await.map_err(|s| status_error(&self.endpoint, s))?;
        debug!(endpoint = %self.endpoint, "grpc transport ready");
        Ok(())
    }

    async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        let plain = model::encode(metrics).map_err(|e| TransportError::Encode(e.to_string()))?;
        let sealed = self.sealer.seal(plain)?;
        let mut request = tonic::Request::new(Payload { body: sealed.body.to_vec() });
        *request.metadata_mut() = MetadataMap::from_headers(to_grpc_metadata(sealed.headers));
        let response = self.client().update_metrics(request).await.map_err(|s| status_error(&self.endpoint, s))?;
        let (metadata, payload, _) = response.into_parts();
        self.sealer.unseal(&from_grpc_metadata(metadata.into_headers()), payload.body.into())?;
        debug!(metrics = metrics.len(), "batch delivered over grpc");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> { Ok(()) }
}

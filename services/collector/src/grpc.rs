//! gRPC surface. Payloads are opaque bodies; body headers travel as `x-body-*` metadata so
//! the same pipeline runs as for HTTP.

use pulse_core::headers::{from_grpc_metadata, to_grpc_metadata};
use pulse_core::{Inbound, PipelineError};
use pulse_proto::metrics::metrics_server::Metrics;
use pulse_proto::metrics::{Empty, Payload};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::handlers::{Endpoint, Operation};
use crate::routes::AppState;

pub fn to_status(e: PipelineError) -> Status {
    let message = e.to_string();
    match e {
        PipelineError::Validation(_) => Status::invalid_argument(message),
        PipelineError::Unauthenticated(_) => Status::unauthenticated(message),
        PipelineError::PermissionDenied(_) => Status::permission_denied(message),
        PipelineError::NotFound(_) => Status::not_found(message),
        PipelineError::Storage(_) | PipelineError::Internal(_) => Status::internal(message),
    }
}

#[derive(Clone)]
pub struct MetricsGrpc {
    state: AppState,
}

impl MetricsGrpc {
    pub fn new(state: AppState) -> Self { Self { state } }

    async fn dispatch(&self, rpc: &'static str, op: Operation, metadata: MetadataMap, body: Vec<u8>) -> Result<(MetadataMap, Vec<u8>), Status> {
        let inbound = Inbound::new("RPC", rpc, from_grpc_metadata(metadata.into_headers()), body);
        let endpoint = Endpoint::new(self.state.service.clone(), op);
        let out = self.state.pipeline.run(inbound, &endpoint).await.map_err(to_status)?;
        Ok((MetadataMap::from_headers(to_grpc_metadata(out.headers)), out.body.to_vec()))
    }

    async fn payload(&self, rpc: &'static str, op: Operation, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        let (metadata, _, payload) = request.into_parts();
        let (metadata, body) = self.dispatch(rpc, op, metadata, payload.body).await?;
        let mut response = Response::new(Payload { body });
        *response.metadata_mut() = metadata;
        Ok(response)
    }
}

#[tonic::async_trait]
impl Metrics for MetricsGrpc {
    async fn update_metrics(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        self.payload("/pulse.metrics.Metrics/UpdateMetrics", Operation::UpdateBatch, request).await
    }

    async fn update_metric(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        self.payload("/pulse.metrics.Metrics/UpdateMetric", Operation::UpdateJson, request).await
    }

    async fn get_metric(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        self.payload("/pulse.metrics.Metrics/GetMetric", Operation::ValueJson, request).await
    }

    async fn list_metrics(&self, request: Request<Payload>) -> Result<Response<Payload>, Status> {
        self.payload("/pulse.metrics.Metrics/ListMetrics", Operation::List, request).await
    }

    async fn ping(&self, request: Request<Empty>) -> Result<Response<Empty>, Status> {
        let (metadata, _, _) = request.into_parts();
        let (metadata, _) = self.dispatch("/pulse.metrics.Metrics/Ping", Operation::Ping, metadata, Vec::new()).await?;
        let mut response = Response::new(Empty {});
        *response.metadata_mut() = metadata;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn status_mapping() {
        assert_eq!(to_status(PipelineError::Validation("x".into())).code(), Code::InvalidArgument);
        assert_eq!(to_status(PipelineError::Unauthenticated("x".into())).code(), Code::Unauthenticated);
        assert_eq!(to_status(PipelineError::PermissionDenied("x".into())).code(), Code::PermissionDenied);
        assert_eq!(to_status(PipelineError::NotFound("x".into())).code(), Code::NotFound);
        assert_eq!(to_status(PipelineError::Storage("x".into())).code(), Code::Internal);
    }
}

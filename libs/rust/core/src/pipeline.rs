//! Transport-agnostic request pipeline.
//!
//! A [`TransportPipeline`] owns an ordered list of [`Stage`]s. Each stage wraps the next one,
//! and the last registered stage is the outermost: it sees the request first and the response
//! last. HTTP and gRPC adapters translate their native request into an [`Inbound`], run the
//! pipeline around a [`Handler`] and translate the [`Outbound`] (or [`PipelineError`]) back.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use thiserror::Error;

use crate::headers::{APPLICATION_JSON, TEXT_HTML, TEXT_PLAIN};
use crate::model::MetricError;

#[derive(Debug, Clone)]
pub struct Inbound {
    /// HTTP method, or `RPC` for gRPC calls.
    pub method: String,
    /// HTTP path or fully qualified gRPC method.
    pub route: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Inbound {
    pub fn new(method: impl Into<String>, route: impl Into<String>, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self { method: method.into(), route: route.into(), headers, body: body.into() }
    }
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Outbound {
    pub fn new(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self { status, headers, body: body.into() }
    }

    pub fn json(body: impl Into<Bytes>) -> Self { Self::new(StatusCode::OK, APPLICATION_JSON, body) }

    pub fn text(body: impl Into<Bytes>) -> Self { Self::new(StatusCode::OK, TEXT_PLAIN, body) }

    pub fn html(body: impl Into<Bytes>) -> Self { Self::new(StatusCode::OK, TEXT_HTML, body) }

    pub fn empty() -> Self { Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new() } }
}

/// Failure taxonomy shared by stages, handlers and both transport boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            PipelineError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Storage(_) | PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Unauthenticated(_) => "unauthenticated",
            PipelineError::PermissionDenied(_) => "permission_denied",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::Storage(_) => "storage",
            PipelineError::Internal(_) => "internal",
        }
    }

    /// Plain-text failure response for transports that carry a status code.
    pub fn to_outbound(&self) -> Outbound {
        Outbound::new(self.status(), TEXT_PLAIN, self.to_string())
    }
}

impl From<MetricError> for PipelineError {
    fn from(e: MetricError) -> Self { PipelineError::Validation(e.to_string()) }
}

/// Business logic at the centre of the pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: Inbound) -> Result<Outbound, PipelineError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn call(&self, req: Inbound) -> Result<Outbound, PipelineError> { (**self).call(req).await }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect or rewrite `req`, call `next.run(req)` (or return an error to short-circuit),
    /// then inspect or rewrite the response.
    async fn process(&self, req: Inbound, next: Next<'_>) -> Result<Outbound, PipelineError>;
}

/// The remainder of the chain as seen from inside a stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub async fn run(self, req: Inbound) -> Result<Outbound, PipelineError> {
        match self.stages.split_last() {
            Some((outer, inner)) => outer.process(req, Next { stages: inner, handler: self.handler }).await,
            None => self.handler.call(req).await,
        }
    }
}

#[derive(Clone, Default)]
pub struct TransportPipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl TransportPipeline {
    pub fn new() -> Self { Self::default() }

    /// Replaces the active stage list. Registration order is wrapping order: the last stage
    /// registered runs outermost.
    pub fn register(&mut self, stages: Vec<Arc<dyn Stage>>) { self.stages = stages; }

    pub fn with_stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> { self.stages.iter().map(|s| s.name()).collect() }

    pub async fn run(&self, req: Inbound, handler: &dyn Handler) -> Result<Outbound, PipelineError> {
        Next { stages: &self.stages, handler }.run(req).await
    }

    /// Wraps `handler` so that calling the result runs every stage first.
    pub fn apply<H: Handler>(&self, handler: H) -> Pipelined<H> {
        Pipelined { stages: self.stages.clone(), handler }
    }
}

impl std::fmt::Debug for TransportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPipeline").field("stages", &self.stage_names()).finish()
    }
}

pub struct Pipelined<H> {
    stages: Vec<Arc<dyn Stage>>,
    handler: H,
}

#[async_trait]
impl<H: Handler> Handler for Pipelined<H> {
    async fn call(&self, req: Inbound) -> Result<Outbound, PipelineError> {
        Next { stages: &self.stages, handler: &self.handler }.run(req).await
    }
}

//! Concrete pipeline stages and the collector's standard chain.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use http::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use tracing::{info, warn};
use uuid::Uuid;

use crate::compression::{self, CompressionCodec, GZIP};
use crate::headers::{header_str, APPLICATION_JSON, HASH_SHA256, OCTET_STREAM, X_REAL_IP, X_REQUEST_ID};
use crate::hybrid::Decrypter;
use crate::integrity::IntegritySigner;
use crate::pipeline::{Inbound, Next, Outbound, PipelineError, Stage, TransportPipeline};
use crate::trust::TrustFilter;

/// One log line per request with total latency. Registered last so it wraps everything.
#[derive(Debug, Default)]
pub struct LoggingStage;

#[async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &'static str { "logging" }

    async fn process(&self, req: Inbound, next: Next<'_>) -> Result<Outbound, PipelineError> {
        let start = Instant::now();
        let method = req.method.clone();
        let route = req.route.clone();
        let request_bytes = req.body.len();
        let result = next.run(req).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(out) => {
                let request_id = header_str(&out.headers, &X_REQUEST_ID).unwrap_or("-");
                info!(%method, %route, %request_id, status = out.status.as_u16(), request_bytes, response_bytes = out.body.len(), elapsed_ms, "request served");
            }
            Err(e) => {
                warn!(%method, %route, status = e.status().as_u16(), kind = e.kind(), error = %e, request_bytes, elapsed_ms, "request rejected");
            }
        }
        result
    }
}

/// Validates a supplied `X-Request-Id`, generates one when absent, echoes it on the reply.
#[derive(Debug, Default)]
pub struct RequestIdStage;

#[async_trait]
impl Stage for RequestIdStage {
    fn name(&self) -> &'static str { "request_id" }

    async fn process(&self, mut req: Inbound, next: Next<'_>) -> Result<Outbound, PipelineError> {
        let id = match req.headers.get(&X_REQUEST_ID) {
            Some(raw) => raw
                .to_str()
                .ok()
                .and_then(|s| Uuid::parse_str(s.trim()).ok())
                .ok_or_else(|| PipelineError::Validation("X-Request-Id is not a valid UUID".into()))?,
            None => Uuid::new_v4(),
        };
        let value = HeaderValue::from_str(&id.to_string()).map_err(|e| PipelineError::Internal(e.to_string()))?;
        req.headers.insert(X_REQUEST_ID, value.clone());
        let mut out = next.run(req).await?;
        out.headers.insert(X_REQUEST_ID, value);
        Ok(out)
    }
}

/// Gzip request inflation and response deflation, gated by content type and encoding headers.
#[derive(Debug, Default)]
pub struct CompressionStage {
    codec: CompressionCodec,
}

#[async_trait]
impl Stage for CompressionStage {
    fn name(&self) -> &'static str { "compression" }

    async fn process(&self, mut req: Inbound, next: Next<'_>) -> Result<Outbound, PipelineError> {
        let accept = header_str(&req.headers, &ACCEPT_ENCODING).map(str::to_owned);
        if self.codec.should_decompress(&req.headers) {
            let plain = compression::decompress(&req.body).map_err(|e| PipelineError::Validation(e.to_string()))?;
            req.body = plain.into();
            req.headers.remove(CONTENT_ENCODING);
            req.headers.remove(CONTENT_LENGTH);
        }
        let mut out = next.run(req).await?;
        if !out.body.is_empty() && out.headers.get(CONTENT_ENCODING).is_none() && self.codec.should_compress(accept.as_deref(), &out.headers) {
            let packed = compression::compress(&out.body).map_err(|e| PipelineError::Internal(e.to_string()))?;
            out.body = packed.into();
            out.headers.insert(CONTENT_ENCODING, HeaderValue::from_static(GZIP));
        }
        Ok(out)
    }
}

/// Opens hybrid-encrypted bodies. A no-op without a private key.
#[derive(Debug, Default)]
pub struct DecryptStage {
    decrypter: Option<Arc<Decrypter>>,
}

impl DecryptStage {
    pub fn new(decrypter: Option<Arc<Decrypter>>) -> Self { Self { decrypter } }
}

#[async_trait]
impl Stage for DecryptStage {
    fn name(&self) -> &'static str { "decrypt" }

    async fn process(&self, mut req: Inbound, next: Next<'_>) -> Result<Outbound, PipelineError> {
        if let Some(decrypter) = &self.decrypter {
            if !req.body.is_empty() {
                let is_envelope = header_str(&req.headers, &CONTENT_TYPE)
                    .map(|ct| ct.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case(OCTET_STREAM))
                    .unwrap_or(false);
                if !is_envelope {
                    return Err(PipelineError::Unauthenticated("encrypted body required".into()));
                }
                let plain = decrypter
                    .decrypt(&req.body)
                    .map_err(|e| PipelineError::Unauthenticated(format!("decryption failed: {e}")))?;
                req.body = plain.into();
                req.headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            }
        }
        next.run(req).await
    }
}

/// Rejects callers whose declared `X-Real-IP` differs from the trusted value.
#[derive(Debug, Default)]
pub struct TrustStage {
    filter: TrustFilter,
}

impl TrustStage {
    pub fn new(filter: TrustFilter) -> Self { Self { filter } }
}

#[async_trait]
impl Stage for TrustStage {
    fn name(&self) -> &'static str { "trust" }

    async fn process(&self, req: Inbound, next: Next<'_>) -> Result<Outbound, PipelineError> {
        let declared = header_str(&req.headers, &X_REAL_IP);
        if !self.filter.is_trusted(declared) {
            return Err(PipelineError::PermissionDenied(format!("origin {} is not trusted", declared.unwrap_or("<none>"))));
        }
        next.run(req).await
    }
}

/// Verifies `HashSHA256` over the plain request body and signs the plain response body.
/// Requests without the header pass unsigned and get an unsigned reply.
#[derive(Debug, Default)]
pub struct IntegrityStage {
    signer: Option<IntegritySigner>,
}

impl IntegrityStage {
    pub fn new(signer: Option<IntegritySigner>) -> Self { Self { signer } }
}

#[async_trait]
impl Stage for IntegrityStage {
    fn name(&self) -> &'static str { "integrity" }

    async fn process(&self, req: Inbound, next: Next<'_>) -> Result<Outbound, PipelineError> {
        let Some(signer) = &self.signer else { return next.run(req).await };
        let signed = match header_str(&req.headers, &HASH_SHA256) {
            Some(digest) => {
                if !signer.verify(&req.body, digest) {
                    return Err(PipelineError::Unauthenticated("body signature mismatch".into()));
                }
                true
            }
            None => false,
        };
        let mut out = next.run(req).await?;
        if signed {
            let digest = HeaderValue::from_str(&signer.sign(&out.body)).map_err(|e| PipelineError::Internal(e.to_string()))?;
            out.headers.insert(HASH_SHA256, digest);
        }
        Ok(out)
    }
}

/// Security material for the collector's inbound chain. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct ServerSecurity {
    pub signer: Option<IntegritySigner>,
    pub decrypter: Option<Arc<Decrypter>>,
    pub trust: TrustFilter,
}

/// Builds the collector chain. Inbound order: logging, request id, decompress, decrypt,
/// trust, integrity, handler.
pub fn server_pipeline(security: ServerSecurity) -> TransportPipeline {
    let mut pipeline = TransportPipeline::new();
    pipeline.register(vec![
        Arc::new(IntegrityStage::new(security.signer)),
        Arc::new(TrustStage::new(security.trust)),
        Arc::new(DecryptStage::new(security.decrypter)),
        Arc::new(CompressionStage::default()),
        Arc::new(RequestIdStage),
        Arc::new(LoggingStage),
    ]);
    pipeline
}

use std::sync::Arc;

use axum::body::Body;
use http::{Request, StatusCode};
use once_cell::sync::Lazy;
use pulse_collector::{router, AppState, Backend, CollectorService, MetricsGrpc};
use pulse_core::headers::{from_grpc_metadata, to_grpc_metadata, X_REQUEST_ID};
use pulse_core::hybrid::Decrypter;
use pulse_core::integrity::IntegritySigner;
use pulse_core::model::{self, Metric, MetricKind, MetricValue};
use pulse_core::sealer::RequestSealer;
use pulse_core::stages::{server_pipeline, ServerSecurity};
use pulse_core::storage::{DurableStorage, FileStorage, MemRepository};
use pulse_core::trust::TrustFilter;
use pulse_core::FlushPolicy;
use pulse_proto::metrics::metrics_server::Metrics;
use pulse_proto::metrics::Payload;
use rsa::RsaPrivateKey;
use tonic::metadata::MetadataMap;
use tonic::Code;
use tower::ServiceExt;

static KEY: Lazy<RsaPrivateKey> = Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap());

fn state(security: ServerSecurity, storage: Option<FileStorage>) -> AppState {
    let service = CollectorService::new(Backend::Memory(MemRepository::new()), storage, FlushPolicy::Synchronous);
    AppState::new(Arc::new(service), server_pipeline(security))
}

fn full_security() -> (ServerSecurity, RequestSealer) {
    let decrypter = Decrypter::new(KEY.clone());
    let sealer = RequestSealer::new()
        .with_signer(IntegritySigner::new("secret"))
        .with_encrypter(Some(decrypter.encrypter()))
        .with_real_ip("10.0.0.1")
        .unwrap();
    let security = ServerSecurity {
        signer: IntegritySigner::new("secret"),
        decrypter: Some(Arc::new(decrypter)),
        trust: TrustFilter::new("10.0.0.1"),
    };
    (security, sealer)
}

fn batch() -> Vec<Metric> {
    vec![Metric::gauge("cpu", 0.5), Metric::counter("hits", 3), Metric::gauge("alloc", 1024.0)]
}

async fn send(state: &AppState, method: &str, uri: &str, headers: http::HeaderMap, body: impl Into<Body>) -> (http::response::Parts, bytes::Bytes) {
    let mut req = Request::builder().method(method).uri(uri).body(body.into()).unwrap();
    *req.headers_mut() = headers;
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let (parts, body) = resp.into_parts();
    (parts, axum::body::to_bytes(body, usize::MAX).await.unwrap())
}

#[tokio::test]
async fn sealed_batch_over_http_is_recovered_in_order() {
    let (security, sealer) = full_security();
    let state = state(security, None);
    let sealed = sealer.seal(model::encode(&batch()).unwrap()).unwrap();
    // ciphertext is sent as plain octet-stream; only the JSON reply is gzipped
    assert_eq!(sealed.headers[http::header::CONTENT_TYPE], "application/octet-stream");
    assert!(!sealed.headers.contains_key(http::header::CONTENT_ENCODING));

    let (parts, body) = send(&state, "POST", "/updates/", sealed.headers, sealed.body).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert!(parts.headers.contains_key(X_REQUEST_ID));
    assert_eq!(parts.headers[http::header::CONTENT_ENCODING], "gzip");
    let plain = sealer.unseal(&parts.headers, body).unwrap();
    assert_eq!(model::decode_batch(&plain).unwrap(), batch());
    assert_eq!(state.service.get("hits", MetricKind::Counter).await.unwrap().value, MetricValue::Counter(3));
}

#[tokio::test]
async fn untrusted_origin_never_reaches_service() {
    let (security, _) = full_security();
    let state = state(security, None);
    let sealer = RequestSealer::new()
        .with_signer(IntegritySigner::new("secret"))
        .with_encrypter(Some(Decrypter::new(KEY.clone()).encrypter()))
        .with_real_ip("10.0.0.2")
        .unwrap();
    let sealed = sealer.seal(model::encode(&batch()).unwrap()).unwrap();

    let (parts, _) = send(&state, "POST", "/updates/", sealed.headers, sealed.body).await;
    assert_eq!(parts.status, StatusCode::FORBIDDEN);
    assert!(state.service.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn wrong_signing_key_is_unauthorized() {
    let state = state(ServerSecurity { signer: IntegritySigner::new("server"), ..Default::default() }, None);
    let sealed = RequestSealer::new().with_signer(IntegritySigner::new("client")).seal(b"[]".to_vec()).unwrap();
    let (parts, _) = send(&state, "POST", "/updates/", sealed.headers, sealed.body).await;
    assert_eq!(parts.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn path_routes_merge_and_read_back() {
    let state = state(ServerSecurity::default(), None);
    let empty = http::HeaderMap::new;
    for v in ["10", "5"] {
        let (parts, _) = send(&state, "POST", &format!("/update/counter/hits/{v}"), empty(), Body::empty()).await;
        assert_eq!(parts.status, StatusCode::OK);
    }
    let (parts, body) = send(&state, "GET", "/value/counter/hits", empty(), Body::empty()).await;
    assert_eq!(parts.status, StatusCode::OK);
    assert_eq!(body, "15");

    let (parts, _) = send(&state, "POST", "/update/gauge/hits/1.5", empty(), Body::empty()).await;
    assert_eq!(parts.status, StatusCode::BAD_REQUEST);
    let (parts, _) = send(&state, "GET", "/value/gauge/missing", empty(), Body::empty()).await;
    assert_eq!(parts.status, StatusCode::NOT_FOUND);
    let (parts, _) = send(&state, "GET", "/ping", empty(), Body::empty()).await;
    assert_eq!(parts.status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_request_id_rejected() {
    let state = state(ServerSecurity::default(), None);
    let mut headers = http::HeaderMap::new();
    headers.insert(X_REQUEST_ID, http::HeaderValue::from_static("not-a-uuid"));
    let (parts, _) = send(&state, "GET", "/ping", headers, Body::empty()).await;
    assert_eq!(parts.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn synchronous_flush_persists_batch() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("metrics.json"));
    let state = state(ServerSecurity::default(), Some(storage.clone()));
    let sealed = RequestSealer::new().seal(model::encode(&batch()).unwrap()).unwrap();
    let (parts, _) = send(&state, "POST", "/updates/", sealed.headers, sealed.body).await;
    assert_eq!(parts.status, StatusCode::OK);
    let mut saved = storage.load_data().await.unwrap();
    saved.sort_by(|a, b| a.id.cmp(&b.id));
    let mut expected = batch();
    expected.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(saved, expected);
}

#[tokio::test]
async fn sealed_batch_over_grpc_is_recovered_in_order() {
    let (security, sealer) = full_security();
    let state = state(security, None);
    let grpc = MetricsGrpc::new(state.clone());
    let sealed = sealer.seal(model::encode(&batch()).unwrap()).unwrap();

    let mut request = tonic::Request::new(Payload { body: sealed.body.to_vec() });
    *request.metadata_mut() = MetadataMap::from_headers(to_grpc_metadata(sealed.headers));
    let response = grpc.update_metrics(request).await.unwrap();
    let (metadata, payload, _) = response.into_parts();
    let headers = from_grpc_metadata(metadata.into_headers());
    let plain = sealer.unseal(&headers, payload.body.into()).unwrap();
    assert_eq!(model::decode_batch(&plain).unwrap(), batch());
}

#[tokio::test]
async fn grpc_untrusted_origin_is_permission_denied() {
    let (security, _) = full_security();
    let state = state(security, None);
    let grpc = MetricsGrpc::new(state.clone());
    let sealed = RequestSealer::new()
        .with_encrypter(Some(Decrypter::new(KEY.clone()).encrypter()))
        .with_real_ip("10.0.0.2")
        .unwrap()
        .seal(b"[]".to_vec())
        .unwrap();
    let mut request = tonic::Request::new(Payload { body: sealed.body.to_vec() });
    *request.metadata_mut() = MetadataMap::from_headers(to_grpc_metadata(sealed.headers));
    let status = grpc.update_metrics(request).await.unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

//! Header names shared by the collector and agent, plus the gRPC metadata translation.
//!
//! gRPC reserves `content-type` and the encoding headers for its own framing, so the body
//! headers travel under `x-body-*` names when the transport is gRPC.

use http::header::{HeaderMap, HeaderName, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};

pub const HASH_SHA256: HeaderName = HeaderName::from_static("hashsha256");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub const GRPC_CONTENT_TYPE: HeaderName = HeaderName::from_static("x-body-content-type");
pub const GRPC_CONTENT_ENCODING: HeaderName = HeaderName::from_static("x-body-content-encoding");
pub const GRPC_ACCEPT_ENCODING: HeaderName = HeaderName::from_static("x-body-accept-encoding");

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_HTML: &str = "text/html";
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const OCTET_STREAM: &str = "application/octet-stream";

fn renames() -> [(HeaderName, HeaderName); 3] {
    [
        (CONTENT_TYPE, GRPC_CONTENT_TYPE),
        (CONTENT_ENCODING, GRPC_CONTENT_ENCODING),
        (ACCEPT_ENCODING, GRPC_ACCEPT_ENCODING),
    ]
}

/// Moves body headers to their `x-body-*` names before they are attached as gRPC metadata.
pub fn to_grpc_metadata(mut headers: HeaderMap) -> HeaderMap {
    for (http_name, grpc_name) in renames() {
        headers.remove(&grpc_name);
        if let Some(v) = headers.remove(&http_name) {
            headers.insert(grpc_name, v);
        }
    }
    headers
}

/// Inverse of [`to_grpc_metadata`]; the transport's own `content-type` is dropped.
pub fn from_grpc_metadata(mut headers: HeaderMap) -> HeaderMap {
    for (http_name, grpc_name) in renames() {
        headers.remove(&http_name);
        if let Some(v) = headers.remove(&grpc_name) {
            headers.insert(http_name, v);
        }
    }
    headers
}

/// Returns the header as a string, ignoring values that are not visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

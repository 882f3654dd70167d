//! Gzip body codec and content negotiation.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use thiserror::Error;

use crate::headers::{header_str, APPLICATION_JSON, TEXT_HTML};

pub const GZIP: &str = "gzip";

/// Upper bound on an inflated request body.
pub const MAX_DECOMPRESSED: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("malformed gzip stream: {0}")]
    Malformed(#[source] std::io::Error),
    #[error("decompressed body exceeds {0} bytes")]
    TooLarge(u64),
    #[error("compressing body: {0}")]
    Encode(#[source] std::io::Error),
}

pub fn compress(body: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut enc = GzEncoder::new(Vec::with_capacity(body.len() / 2 + 32), Compression::default());
    enc.write_all(body).map_err(CompressionError::Encode)?;
    enc.finish().map_err(CompressionError::Encode)
}

pub fn decompress(body: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::new();
    GzDecoder::new(body)
        .take(MAX_DECOMPRESSED + 1)
        .read_to_end(&mut out)
        .map_err(CompressionError::Malformed)?;
    if out.len() as u64 > MAX_DECOMPRESSED {
        return Err(CompressionError::TooLarge(MAX_DECOMPRESSED));
    }
    Ok(out)
}

/// JSON and HTML bodies are eligible; parameters such as `charset` are ignored.
pub fn is_compressible(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else { return false };
    let mime = ct.split(';').next().unwrap_or("").trim();
    mime.eq_ignore_ascii_case(APPLICATION_JSON) || mime.eq_ignore_ascii_case(TEXT_HTML)
}

/// True when a comma separated encoding list names gzip with a non-zero quality.
pub fn names_gzip(value: Option<&str>) -> bool {
    let Some(list) = value else { return false };
    list.split(',').any(|item| {
        let mut parts = item.split(';');
        let coding = parts.next().unwrap_or("").trim();
        if !coding.eq_ignore_ascii_case(GZIP) {
            return false;
        }
        !parts.any(|p| matches!(p.trim().strip_prefix("q="), Some(q) if q.trim().parse::<f32>().map(|q| q == 0.0).unwrap_or(false)))
    })
}

/// Negotiation rules for both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionCodec;

impl CompressionCodec {
    pub fn should_decompress(&self, request: &HeaderMap) -> bool {
        is_compressible(header_str(request, &CONTENT_TYPE)) && names_gzip(header_str(request, &CONTENT_ENCODING))
    }

    /// `accept_encoding` is the caller's header; `response` carries the reply's content type.
    pub fn should_compress(&self, accept_encoding: Option<&str>, response: &HeaderMap) -> bool {
        names_gzip(accept_encoding) && is_compressible(header_str(response, &CONTENT_TYPE))
    }
}

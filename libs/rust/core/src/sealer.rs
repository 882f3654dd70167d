//! Outbound counterpart of the collector chain, shared by every transport client.
//!
//! Sealing order: sign the plain JSON, encrypt, then gzip if the body is still JSON.
//! An encrypted body is `application/octet-stream` and therefore never compressed.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use thiserror::Error;
use uuid::Uuid;

use crate::compression::{self, CompressionError, GZIP};
use crate::headers::{header_str, APPLICATION_JSON, HASH_SHA256, OCTET_STREAM, X_REAL_IP, X_REQUEST_ID};
use crate::hybrid::{CipherError, Encrypter};
use crate::integrity::IntegritySigner;

#[derive(Debug, Error)]
pub enum SealError {
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error("invalid header value for {0}")]
    Header(&'static str),
    #[error("response signature mismatch")]
    ResponseSignature,
}

#[derive(Debug, Clone)]
pub struct Sealed {
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct RequestSealer {
    signer: Option<IntegritySigner>,
    encrypter: Option<Encrypter>,
    real_ip: Option<HeaderValue>,
}

impl RequestSealer {
    pub fn new() -> Self { Self::default() }

    pub fn with_signer(mut self, signer: Option<IntegritySigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_encrypter(mut self, encrypter: Option<Encrypter>) -> Self {
        self.encrypter = encrypter;
        self
    }

    /// Declared origin sent as `X-Real-IP`; empty omits the header.
    pub fn with_real_ip(mut self, real_ip: &str) -> Result<Self, SealError> {
        self.real_ip = if real_ip.is_empty() {
            None
        } else {
            Some(HeaderValue::from_str(real_ip).map_err(|_| SealError::Header("X-Real-IP"))?)
        };
        Ok(self)
    }

    pub fn seal(&self, plain: Vec<u8>) -> Result<Sealed, SealError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(GZIP));
        let request_id = HeaderValue::from_str(&Uuid::new_v4().to_string()).map_err(|_| SealError::Header("X-Request-Id"))?;
        headers.insert(X_REQUEST_ID, request_id);
        if let Some(ip) = &self.real_ip {
            headers.insert(X_REAL_IP, ip.clone());
        }
        if let Some(signer) = &self.signer {
            let digest = HeaderValue::from_str(&signer.sign(&plain)).map_err(|_| SealError::Header("HashSHA256"))?;
            headers.insert(HASH_SHA256, digest);
        }

        let mut body = plain;
        let content_type = match &self.encrypter {
            Some(enc) => {
                body = enc.encrypt(&body)?;
                OCTET_STREAM
            }
            None => APPLICATION_JSON,
        };
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));

        // Ciphertext goes out as octet-stream and is never gzipped; the server only inflates JSON.
        if compression::is_compressible(Some(content_type)) {
            body = compression::compress(&body)?;
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(GZIP));
        }
        Ok(Sealed { headers, body: body.into() })
    }

    /// Inflates a gzip reply and, when a key is configured and the reply is signed,
    /// verifies the signature.
    pub fn unseal(&self, headers: &HeaderMap, body: Bytes) -> Result<Bytes, SealError> {
        let body = if compression::names_gzip(header_str(headers, &CONTENT_ENCODING)) {
            Bytes::from(compression::decompress(&body)?)
        } else {
            body
        };
        if let (Some(signer), Some(digest)) = (&self.signer, header_str(headers, &HASH_SHA256)) {
            if !signer.verify(&body, digest) {
                return Err(SealError::ResponseSignature);
            }
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Handler, Inbound, Outbound, PipelineError};
    use crate::stages::{server_pipeline, ServerSecurity};
    use crate::trust::TrustFilter;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Echo { seen: Mutex<Vec<Bytes>> }

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, req: Inbound) -> Result<Outbound, PipelineError> {
            self.seen.lock().push(req.body.clone());
            Ok(Outbound::json(req.body))
        }
    }

    #[test]
    fn plain_json_is_compressed() {
        let sealed = RequestSealer::new().seal(b"[]".to_vec()).unwrap();
        assert_eq!(sealed.headers.get(CONTENT_ENCODING).unwrap(), GZIP);
        assert_eq!(compression::decompress(&sealed.body).unwrap(), b"[]");
        assert!(sealed.headers.get(HASH_SHA256).is_none());
        assert!(sealed.headers.get(X_REAL_IP).is_none());
    }

    #[test]
    fn encrypted_body_is_not_compressed() {
        let (enc, dec) = crate::hybrid::tests::test_pair();
        let sealed = RequestSealer::new().with_encrypter(Some(enc)).seal(b"[1,2]".to_vec()).unwrap();
        assert_eq!(sealed.headers.get(CONTENT_TYPE).unwrap(), OCTET_STREAM);
        assert!(sealed.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(dec.decrypt(&sealed.body).unwrap(), b"[1,2]");
    }

    #[tokio::test]
    async fn sealed_request_passes_server_chain() {
        let (enc, dec) = crate::hybrid::tests::test_pair();
        let signer = IntegritySigner::new("shared");
        let sealer = RequestSealer::new()
            .with_signer(signer.clone())
            .with_encrypter(Some(enc))
            .with_real_ip("10.0.0.1")
            .unwrap();
        let pipeline = server_pipeline(ServerSecurity {
            signer,
            decrypter: Some(Arc::new(dec)),
            trust: TrustFilter::new("10.0.0.1"),
        });

        let plain = br#"[{"id":"cpu","type":"gauge","value":0.5}]"#.to_vec();
        let sealed = sealer.seal(plain.clone()).unwrap();
        let echo = Echo::default();
        let out = pipeline.run(Inbound::new("POST", "/updates/", sealed.headers, sealed.body), &echo).await.unwrap();
        assert_eq!(echo.seen.lock()[0], Bytes::from(plain.clone()));
        assert_eq!(out.headers.get(CONTENT_ENCODING).unwrap(), GZIP);
        assert_eq!(sealer.unseal(&out.headers, out.body).unwrap(), Bytes::from(plain));
    }

    #[test]
    fn tampered_reply_detected() {
        let signer = IntegritySigner::new("shared");
        let sealer = RequestSealer::new().with_signer(signer.clone());
        let mut headers = HeaderMap::new();
        let digest = signer.as_ref().unwrap().sign(b"[]");
        headers.insert(HASH_SHA256, HeaderValue::from_str(&digest).unwrap());
        assert!(sealer.unseal(&headers, Bytes::from_static(b"[]")).is_ok());
        assert!(matches!(sealer.unseal(&headers, Bytes::from_static(b"[0]")), Err(SealError::ResponseSignature)));
    }
}

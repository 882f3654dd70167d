//! JSON batch client for the collector's `POST /updates/` route.

use async_trait::async_trait;
use pulse_core::model::{self, Metric};
use pulse_core::sealer::RequestSealer;
use pulse_core::transport::{TransportClient, TransportError};
use tracing::debug;

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    sealer: RequestSealer,
}

impl HttpTransport {
    /// `address` is `host:port` or a full base URL.
    pub fn new(address: &str, sealer: RequestSealer) -> Result<Self, TransportError> {
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_owned()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Connect { endpoint: base.clone(), reason: e.to_string() })?;
        Ok(Self { client, url: format!("{base}/updates/"), sealer })
    }

    pub fn url(&self) -> &str { &self.url }

    fn request_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_connect() || e.is_timeout() {
            TransportError::Connect { endpoint: self.url.clone(), reason: e.to_string() }
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl TransportClient for HttpTransport {
    fn name(&self) -> &str { "http" }

    async fn start(&self) -> Result<(), TransportError> {
        debug!(url = %self.url, "http transport ready");
        Ok(())
    }

    async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        let plain = model::encode(metrics).map_err(|e| TransportError::Encode(e.to_string()))?;
        let sealed = self.sealer.seal(plain)?;
        let resp = self
            .client
            .post(&self.url)
            .headers(sealed.headers)
            .body(sealed.body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(|e| self.request_error(e))?;
        if !status.is_success() {
            return Err(TransportError::Status { code: status.as_u16(), message: String::from_utf8_lossy(&body).trim().to_owned() });
        }
        self.sealer.unseal(&headers, body)?;
        debug!(metrics = metrics.len(), "batch delivered over http");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_normalisation() {
        let t = HttpTransport::new("127.0.0.1:8080", RequestSealer::new()).unwrap();
        assert_eq!(t.url(), "http://127.0.0.1:8080/updates/");
        let t = HttpTransport::new("https://collector.local/", RequestSealer::new()).unwrap();
        assert_eq!(t.url(), "https://collector.local/updates/");
    }
}

//! Business endpoints, independent of the transport that carried the request.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::model::{self, Metric, MetricKind};
use pulse_core::{Handler, Inbound, Outbound, PipelineError};

use crate::backend::CollectorService;

/// What the request asks for. Path parameters are carried raw and parsed by the endpoint so
/// that malformed values surface as pipeline validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    UpdateBatch,
    UpdateJson,
    UpdatePath { kind: String, id: String, value: String },
    ValueJson,
    ValuePath { kind: String, id: String },
    List,
    Index,
    Ping,
}

pub struct Endpoint {
    service: Arc<CollectorService>,
    op: Operation,
}

impl Endpoint {
    pub fn new(service: Arc<CollectorService>, op: Operation) -> Self { Self { service, op } }
}

#[async_trait]
impl Handler for Endpoint {
    async fn call(&self, req: Inbound) -> Result<Outbound, PipelineError> {
        match &self.op {
            Operation::UpdateBatch => {
                let batch = model::decode_batch(&req.body)?;
                let merged = self.service.update_batch(batch).await?;
                Ok(Outbound::json(model::encode(&merged)?))
            }
            Operation::UpdateJson => {
                let metric = model::decode_one(&req.body)?;
                let merged = self.service.create_or_update(metric).await?;
                Ok(Outbound::json(model::encode(&merged)?))
            }
            Operation::UpdatePath { kind, id, value } => {
                let metric = Metric::parse(kind, id, value)?;
                let merged = self.service.create_or_update(metric).await?;
                Ok(Outbound::text(merged.value.to_string()))
            }
            Operation::ValueJson => {
                let query = model::decode_query(&req.body)?;
                let kind = query.kind()?;
                let metric = self.service.get(&query.id, kind).await?;
                Ok(Outbound::json(model::encode(&metric)?))
            }
            Operation::ValuePath { kind, id } => {
                let kind: MetricKind = kind.parse()?;
                let metric = self.service.get(id, kind).await?;
                Ok(Outbound::text(metric.value.to_string()))
            }
            Operation::List => {
                let metrics = self.service.get_all().await?;
                Ok(Outbound::json(model::encode(&metrics)?))
            }
            Operation::Index => {
                let metrics = self.service.get_all().await?;
                Ok(Outbound::html(render_index(&metrics)))
            }
            Operation::Ping => {
                self.service.ping().await?;
                Ok(Outbound::empty())
            }
        }
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn render_index(metrics: &[Metric]) -> String {
    let mut html = String::from("<!DOCTYPE html>\n<html><head><title>Metrics</title></head><body>\n<table>\n<tr><th>id</th><th>type</th><th>value</th></tr>\n");
    for m in metrics {
        let _ = writeln!(html, "<tr><td>{}</td><td>{}</td><td>{}</td></tr>", escape(&m.id), m.kind(), m.value);
    }
    html.push_str("</table>\n</body></html>\n");
    html
}

//! Core shared pieces for the Pulse metrics collector and agent: the metric model and merge
//! service, the transport pipeline with its security stages, and the agent-side sealer.

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod compression;
pub mod config;
pub mod headers;
pub mod hybrid;
pub mod integrity;
pub mod model;
pub mod pipeline;
pub mod sealer;
pub mod service;
pub mod sled_repo;
pub mod stages;
pub mod storage;
pub mod transport;
pub mod trust;

pub use model::{Metric, MetricError, MetricKind, MetricValue};
pub use pipeline::{Handler, Inbound, Outbound, PipelineError, Stage, TransportPipeline};
pub use service::{FlushPolicy, MetricService, ServiceError};
pub use storage::{DurableStorage, FileStorage, MemRepository, Repository};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once per process. `RUST_LOG` drives filtering (default
/// `info`); `PULSE_JSON_LOG=1` switches to flattened JSON lines.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("PULSE_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry
                .with(tracing_subscriber::fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false))
                .try_init()?;
        } else {
            registry.with(tracing_subscriber::fmt::layer().with_target(true).with_line_number(true)).try_init()?;
        }
        Ok(())
    })?;
    info!(target: "pulse", service, "tracing initialized");
    Ok(())
}

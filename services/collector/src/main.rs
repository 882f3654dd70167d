use anyhow::Result;
use tracing::info;
use pulse_core::{config::load_collector_config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("pulse-collector")?;
    let cfg = load_collector_config()?;
    info!(target: "pulse-collector", address = %cfg.address, grpc = %cfg.grpc_address, store_interval_secs = cfg.store_interval_secs, "starting collector");
    pulse_collector::run(cfg).await
}

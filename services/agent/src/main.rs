use anyhow::Result;
use tracing::info;
use pulse_core::{config::load_agent_config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("pulse-agent")?;
    let cfg = load_agent_config()?;
    info!(target: "pulse-agent", address = %cfg.address, transports = ?cfg.transports, "starting agent");
    pulse_agent::run(cfg).await
}

//! Agent wiring: transports from config, the poll and report tickers, and shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pulse_core::config::{AgentConfig, TransportKind};
use pulse_core::hybrid::Encrypter;
use pulse_core::integrity::IntegritySigner;
use pulse_core::sealer::RequestSealer;
use pulse_core::transport::{MultiTransportDispatcher, TransportClient};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::grpc_client::GrpcTransport;
use crate::http_client::HttpTransport;
use crate::reporter::{transport_policy, Reporter};
use crate::runtime::RuntimeStats;

pub fn sealer_from_config(cfg: &AgentConfig) -> Result<RequestSealer> {
    let encrypter = if cfg.crypto_key.is_empty() {
        None
    } else {
        Some(Encrypter::load(&cfg.crypto_key).with_context(|| format!("loading public key {}", cfg.crypto_key))?)
    };
    Ok(RequestSealer::new()
        .with_signer(IntegritySigner::new(&cfg.key))
        .with_encrypter(encrypter)
        .with_real_ip(&cfg.real_ip)?)
}

pub fn transports_from_config(cfg: &AgentConfig, sealer: &RequestSealer) -> Result<Vec<Box<dyn TransportClient>>> {
    let mut clients: Vec<Box<dyn TransportClient>> = Vec::with_capacity(cfg.transports.len());
    for kind in &cfg.transports {
        match kind {
            TransportKind::Http => clients.push(Box::new(HttpTransport::new(&cfg.address, sealer.clone())?)),
            TransportKind::Grpc => {
                if cfg.grpc_address.is_empty() {
                    bail!("grpc transport requested without grpc_address");
                }
                clients.push(Box::new(GrpcTransport::new(&cfg.grpc_address, sealer.clone())?));
            }
        }
    }
    Ok(clients)
}

fn ticker<F, Fut>(period: Duration, mut stop: watch::Receiver<bool>, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() { break; }
                }
            }
        }
    })
}

/// Runs the agent until `shutdown` resolves.
pub async fn serve(cfg: AgentConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    let sealer = sealer_from_config(&cfg)?;
    let dispatcher = MultiTransportDispatcher::new(transports_from_config(&cfg, &sealer)?)?;
    if let Err(e) = dispatcher.start_all().await {
        warn!(error = %e, "transport start failed, continuing with lazy connections");
    }
    let stats = Arc::new(RuntimeStats::new());
    let reporter = Arc::new(Reporter::new(dispatcher, transport_policy(cfg.retry_delays()), stats.clone()));
    info!(transports = reporter.dispatcher().len(), poll = ?cfg.poll_interval(), report = ?cfg.report_interval(), "agent started");

    let (stop_tx, stop_rx) = watch::channel(false);
    let poller = {
        let stats = stats.clone();
        ticker(cfg.poll_interval(), stop_rx.clone(), move || {
            stats.poll();
            async {}
        })
    };
    let report_loop = {
        let reporter = reporter.clone();
        ticker(cfg.report_interval(), stop_rx, move || {
            let reporter = reporter.clone();
            async move {
                let _ = reporter.report_once().await;
            }
        })
    };

    shutdown.await;
    info!("shutdown requested");
    let _ = stop_tx.send(true);
    for task in [poller, report_loop] {
        if let Err(e) = task.await {
            warn!(error = %e, "agent task ended abnormally");
        }
    }
    if let Err(e) = reporter.dispatcher().close_all().await {
        warn!(error = %e, "closing transports failed");
    }
    info!("agent stopped");
    Ok(())
}

pub async fn run(cfg: AgentConfig) -> Result<()> {
    serve(cfg, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed");
        }
    })
    .await
}

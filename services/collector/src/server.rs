//! Collector wiring: storage, pipeline, both listeners and shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use pulse_core::config::CollectorConfig;
use pulse_core::hybrid::Decrypter;
use pulse_core::integrity::IntegritySigner;
use pulse_core::stages::{server_pipeline, ServerSecurity};
use pulse_core::storage::FileStorage;
use pulse_core::trust::TrustFilter;
use pulse_core::FlushPolicy;
use pulse_proto::metrics::metrics_server::MetricsServer;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backend::{Backend, CollectorService};
use crate::grpc::MetricsGrpc;
use crate::routes::{router, AppState};

pub fn security_from_config(cfg: &CollectorConfig) -> Result<ServerSecurity> {
    let decrypter = if cfg.crypto_key.is_empty() {
        None
    } else {
        let d = Decrypter::load(&cfg.crypto_key).with_context(|| format!("loading private key {}", cfg.crypto_key))?;
        Some(Arc::new(d))
    };
    Ok(ServerSecurity {
        signer: IntegritySigner::new(&cfg.key),
        decrypter,
        trust: TrustFilter::new(cfg.trusted_subnet.clone()),
    })
}

/// Opens the repository, restores the last snapshot when asked to, and returns the service.
///
/// The snapshot is only replayed into an empty repository. A sled database reopened after a
/// restart already holds every merged counter; replaying on top of it would count them twice.
pub async fn build_service(cfg: &CollectorConfig) -> Result<Arc<CollectorService>> {
    let backend = Backend::open(&cfg.database_path).context("opening repository")?;
    let storage = (!cfg.file_storage_path.is_empty()).then(|| FileStorage::new(&cfg.file_storage_path));
    let service = CollectorService::new(backend, storage, FlushPolicy::from_secs(cfg.store_interval_secs));
    if cfg.restore {
        let live = service.get_all().await.context("reading repository before restore")?.len();
        if live == 0 {
            service.restore().await.context("restoring metrics snapshot")?;
        } else {
            info!(metrics = live, "repository already populated, snapshot restore skipped");
        }
    }
    Ok(Arc::new(service))
}

pub async fn build_state(cfg: &CollectorConfig) -> Result<AppState> {
    let service = build_service(cfg).await?;
    let pipeline = server_pipeline(security_from_config(cfg)?);
    info!(stages = ?pipeline.stage_names(), "transport pipeline registered");
    Ok(AppState::new(service, pipeline))
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Binds `cfg.address` and runs [`serve_on`].
pub async fn serve(cfg: CollectorConfig, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let listener = TcpListener::bind(&cfg.address).await.with_context(|| format!("binding {}", cfg.address))?;
    serve_on(cfg, listener, shutdown).await
}

/// Serves HTTP on `listener` (and gRPC when configured) until `shutdown` resolves, then drains
/// the listeners, stops the flusher and attempts one final flush.
pub async fn serve_on(
    cfg: CollectorConfig,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let state = build_state(&cfg).await?;
    let service = state.service.clone();
    let flusher = service.spawn_flusher();
    let (stop_tx, stop_rx) = watch::channel(false);

    info!(address = %listener.local_addr()?, "http listener started");
    let app = router(state.clone());
    let http_stop = stopped(stop_rx.clone());
    let http = tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(http_stop).await });

    let grpc = if cfg.grpc_address.is_empty() {
        None
    } else {
        let addr: SocketAddr = cfg.grpc_address.parse().with_context(|| format!("parsing grpc address {}", cfg.grpc_address))?;
        info!(%addr, schema = pulse_proto::SCHEMA_VERSION, "grpc listener started");
        let svc = MetricsServer::new(MetricsGrpc::new(state));
        let grpc_stop = stopped(stop_rx.clone());
        Some(tokio::spawn(async move {
            tonic::transport::Server::builder().add_service(svc).serve_with_shutdown(addr, grpc_stop).await
        }))
    };

    shutdown.await;
    info!("shutdown requested");
    let _ = stop_tx.send(true);

    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "http server failed"),
        Err(e) => error!(error = %e, "http task panicked"),
    }
    if let Some(grpc) = grpc {
        match grpc.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "grpc server failed"),
            Err(e) => error!(error = %e, "grpc task panicked"),
        }
    }
    if let Some(flusher) = flusher {
        flusher.stop().await;
    }
    if let Err(e) = service.flush().await {
        warn!(error = %e, "final flush failed");
    }
    info!("collector stopped");
    Ok(())
}

pub async fn run(cfg: CollectorConfig) -> Result<()> {
    serve(cfg, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl-c handler failed");
        }
    })
    .await
}

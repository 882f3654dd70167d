use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_agent::http_client::HttpTransport;
use pulse_agent::reporter::transport_policy;
use pulse_agent::runtime::POLL_COUNT;
use pulse_agent::{Reporter, RuntimeStats};
use pulse_collector::{router, AppState, Backend, CollectorService};
use pulse_core::integrity::IntegritySigner;
use pulse_core::model::{Metric, MetricKind, MetricValue};
use pulse_core::sealer::RequestSealer;
use pulse_core::stages::{server_pipeline, ServerSecurity};
use pulse_core::storage::MemRepository;
use pulse_core::transport::{MultiTransportDispatcher, TransportClient, TransportError};
use pulse_core::trust::TrustFilter;
use pulse_core::FlushPolicy;
use pulse_resilience::RetryError;

/// Fails its first `failures` sends with a retryable error.
struct Flaky {
    name: &'static str,
    failures: usize,
    calls: AtomicUsize,
    delivered: Mutex<Vec<Vec<Metric>>>,
}

impl Flaky {
    fn new(name: &'static str, failures: usize) -> Arc<Self> {
        Arc::new(Self { name, failures, calls: AtomicUsize::new(0), delivered: Mutex::new(Vec::new()) })
    }
}

struct Shared(Arc<Flaky>);

#[async_trait]
impl TransportClient for Shared {
    fn name(&self) -> &str { self.0.name }
    async fn start(&self) -> Result<(), TransportError> { Ok(()) }
    async fn send_metrics(&self, metrics: &[Metric]) -> Result<(), TransportError> {
        let n = self.0.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.0.failures {
            return Err(TransportError::Request(format!("{} reset", self.0.name)));
        }
        self.0.delivered.lock().push(metrics.to_vec());
        Ok(())
    }
    async fn close(&self) -> Result<(), TransportError> { Ok(()) }
}

fn reporter(clients: &[Arc<Flaky>], delays: usize, stats: Arc<RuntimeStats>) -> Reporter {
    let boxed = clients.iter().map(|c| Box::new(Shared(c.clone())) as Box<dyn TransportClient>).collect();
    let dispatcher = MultiTransportDispatcher::new(boxed).unwrap();
    Reporter::new(dispatcher, transport_policy(vec![Duration::from_millis(1); delays]), stats)
}

#[tokio::test]
async fn retry_moves_to_next_transport() {
    let stats = Arc::new(RuntimeStats::new());
    stats.poll();
    let (bad, good) = (Flaky::new("http", usize::MAX), Flaky::new("grpc", 0));
    let reporter = reporter(&[bad.clone(), good.clone()], 2, stats.clone());

    assert!(reporter.report_once().await.unwrap() > 0);
    assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
    assert_eq!(good.delivered.lock().len(), 1);
    assert_eq!(stats.pending(POLL_COUNT), 0);
}

#[tokio::test]
async fn exhausted_report_keeps_counters() {
    let stats = Arc::new(RuntimeStats::new());
    stats.poll();
    stats.poll();
    let down = Flaky::new("http", usize::MAX);
    let reporter = reporter(&[down.clone()], 3, stats.clone());

    let err = reporter.report_once().await.unwrap_err();
    assert!(matches!(err, RetryError::Exhausted { attempts: 4, .. }));
    assert_eq!(down.calls.load(Ordering::SeqCst), 4);
    assert_eq!(stats.pending(POLL_COUNT), 2);

    stats.poll();
    let up = Flaky::new("http", 0);
    let reporter = self::reporter(&[up.clone()], 0, stats.clone());
    reporter.report_once().await.unwrap();
    let sent = up.delivered.lock()[0].clone();
    assert!(sent.contains(&Metric::counter(POLL_COUNT, 3)));
}

#[tokio::test]
async fn nothing_to_report_before_first_poll() {
    let client = Flaky::new("http", 0);
    let reporter = reporter(&[client.clone()], 1, Arc::new(RuntimeStats::new()));
    assert_eq!(reporter.report_once().await.unwrap(), 0);
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn http_transport_reaches_live_collector() {
    let security = ServerSecurity {
        signer: IntegritySigner::new("k"),
        decrypter: None,
        trust: TrustFilter::new("10.0.0.1"),
    };
    let service = Arc::new(CollectorService::new(Backend::Memory(MemRepository::new()), None, FlushPolicy::Synchronous));
    let state = AppState::new(service.clone(), server_pipeline(security));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });

    let sealer = RequestSealer::new().with_signer(IntegritySigner::new("k")).with_real_ip("10.0.0.1").unwrap();
    let http = HttpTransport::new(&addr.to_string(), sealer).unwrap();
    http.send_metrics(&[Metric::counter("PollCount", 4), Metric::gauge("RandomValue", 0.25)]).await.unwrap();
    http.send_metrics(&[Metric::counter("PollCount", 1)]).await.unwrap();
    assert_eq!(service.get("PollCount", MetricKind::Counter).await.unwrap().value, MetricValue::Counter(5));

    let outsider = HttpTransport::new(&addr.to_string(), RequestSealer::new().with_real_ip("10.0.0.9").unwrap()).unwrap();
    let err = outsider.send_metrics(&[Metric::counter("PollCount", 1)]).await.unwrap_err();
    assert!(matches!(err, TransportError::Status { code: 403, .. }));
    assert!(!err.is_retryable());
}

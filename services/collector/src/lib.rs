//! Pulse collector: receives metric batches over HTTP or gRPC, runs them through the shared
//! transport pipeline and merges them into the metric service.

pub mod backend;
pub mod grpc;
pub mod handlers;
pub mod routes;
pub mod server;

pub use backend::{Backend, CollectorService};
pub use grpc::MetricsGrpc;
pub use routes::{router, AppState};
pub use server::{build_service, build_state, run, serve, serve_on};

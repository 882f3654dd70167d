//! Pulse agent: polls runtime statistics and reports them to the collector over the
//! configured transports.

pub mod agent;
pub mod grpc_client;
pub mod http_client;
pub mod reporter;
pub mod runtime;

pub use agent::{run, serve};
pub use reporter::Reporter;
pub use runtime::RuntimeStats;

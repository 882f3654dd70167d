// Generated protobuf modules via tonic's include_proto! macro.
// Usage example:
//   use pulse_proto::metrics::metrics_server::MetricsServer;
//   use pulse_proto::metrics::{Payload, Empty};

pub mod metrics { tonic::include_proto!("pulse.metrics"); }

/// SHA-256 over the compiled .proto sources, stamped at build time.
pub const SCHEMA_VERSION: &str = env!("PROTO_SCHEMA_VERSION");

pub use metrics::*;

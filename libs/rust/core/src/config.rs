//! Layered service configuration: defaults, then an optional file named by
//! `PULSE_CONFIG_FILE`, then `PULSE_*` environment variables (nested keys use `__`).

use std::collections::HashMap;
use std::time::Duration;

use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const ENV_PREFIX: &str = "PULSE";
pub const CONFIG_FILE_ENV: &str = "PULSE_CONFIG_FILE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub address: String,
    /// Empty disables the gRPC listener.
    pub grpc_address: String,
    /// `0` flushes synchronously after every update.
    pub store_interval_secs: u64,
    /// Empty disables durable snapshots.
    pub file_storage_path: String,
    pub restore: bool,
    pub key: String,
    /// Path to the PEM private key.
    pub crypto_key: String,
    pub trusted_subnet: String,
    /// sled directory; empty keeps metrics in memory.
    pub database_path: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".into(),
            grpc_address: "127.0.0.1:3200".into(),
            store_interval_secs: 300,
            file_storage_path: "/tmp/metrics-db.json".into(),
            restore: true,
            key: String::new(),
            crypto_key: String::new(),
            trusted_subnet: String::new(),
            database_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Grpc,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub address: String,
    pub grpc_address: String,
    /// Dispatcher clients in round-robin order.
    pub transports: Vec<TransportKind>,
    pub poll_interval_secs: u64,
    pub report_interval_secs: u64,
    pub key: String,
    /// Path to the PEM public key.
    pub crypto_key: String,
    pub real_ip: String,
    pub retry_delays_ms: Vec<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".into(),
            grpc_address: String::new(),
            transports: vec![TransportKind::Http],
            poll_interval_secs: 2,
            report_interval_secs: 10,
            key: String::new(),
            crypto_key: String::new(),
            real_ip: String::new(),
            retry_delays_ms: vec![1000, 3000, 5000],
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration { Duration::from_secs(self.poll_interval_secs.max(1)) }

    pub fn report_interval(&self) -> Duration { Duration::from_secs(self.report_interval_secs.max(1)) }

    pub fn retry_delays(&self) -> Vec<Duration> { self.retry_delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect() }
}

fn environment(vars: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("transports")
        .with_list_parse_key("retry_delays_ms")
        .source(vars)
}

fn build<T: DeserializeOwned>(file: Option<String>, vars: Option<HashMap<String, String>>) -> Result<T, ::config::ConfigError> {
    let mut builder = Config::builder();
    if let Some(file) = file.filter(|f| !f.is_empty()) {
        builder = builder.add_source(File::with_name(&file).required(false));
    }
    builder.add_source(environment(vars)).build()?.try_deserialize()
}

pub fn load_collector_config() -> Result<CollectorConfig, ::config::ConfigError> {
    build(std::env::var(CONFIG_FILE_ENV).ok(), None)
}

pub fn load_agent_config() -> Result<AgentConfig, ::config::ConfigError> {
    build(std::env::var(CONFIG_FILE_ENV).ok(), None)
}

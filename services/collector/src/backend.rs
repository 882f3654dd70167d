//! Repository backend chosen once at startup from `database_path`.

use async_trait::async_trait;
use pulse_core::sled_repo::SledRepository;
use pulse_core::storage::{FileStorage, MemRepository, Repository, RepositoryError};
use pulse_core::{Metric, MetricService, MetricValue};
use tracing::info;

pub type CollectorService = MetricService<Backend, FileStorage>;

#[derive(Debug)]
pub enum Backend {
    Memory(MemRepository),
    Sled(SledRepository),
}

impl Backend {
    /// Opens sled at `database_path`, or an in-memory map when the path is empty.
    pub fn open(database_path: &str) -> Result<Self, RepositoryError> {
        if database_path.is_empty() {
            info!("using in-memory repository");
            return Ok(Backend::Memory(MemRepository::new()));
        }
        Ok(Backend::Sled(SledRepository::open(database_path)?))
    }
}

#[async_trait]
impl Repository for Backend {
    async fn ping(&self) -> Result<(), RepositoryError> {
        match self {
            Backend::Memory(r) => r.ping().await,
            Backend::Sled(r) => r.ping().await,
        }
    }

    async fn get_all(&self) -> Result<Vec<Metric>, RepositoryError> {
        match self {
            Backend::Memory(r) => r.get_all().await,
            Backend::Sled(r) => r.get_all().await,
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Metric, RepositoryError> {
        match self {
            Backend::Memory(r) => r.get_by_id(id).await,
            Backend::Sled(r) => r.get_by_id(id).await,
        }
    }

    async fn create(&self, metric: Metric) -> Result<String, RepositoryError> {
        match self {
            Backend::Memory(r) => r.create(metric).await,
            Backend::Sled(r) => r.create(metric).await,
        }
    }

    async fn update(&self, metric: Metric) -> Result<MetricValue, RepositoryError> {
        match self {
            Backend::Memory(r) => r.update(metric).await,
            Backend::Sled(r) => r.update(metric).await,
        }
    }

    async fn remove(&self, metric: &Metric) -> Result<String, RepositoryError> {
        match self {
            Backend::Memory(r) => r.remove(metric).await,
            Backend::Sled(r) => r.remove(metric).await,
        }
    }
}

//! Embedded sled-backed repository. Values are the JSON wire form keyed by metric id.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::model::{Metric, MetricValue};
use crate::storage::{Repository, RepositoryError};

#[derive(Debug, Clone)]
pub struct SledRepository {
    db: sled::Db,
}

fn backend(e: sled::Error) -> RepositoryError { RepositoryError::Backend(e.to_string()) }

impl SledRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let db = sled::open(path.as_ref()).map_err(backend)?;
        info!(path = %path.as_ref().display(), recovered = db.was_recovered(), entries = db.len(), "sled repository opened");
        Ok(Self { db })
    }

    fn decode(bytes: &[u8]) -> Result<Metric, RepositoryError> { Ok(serde_json::from_slice(bytes)?) }
}

#[async_trait]
impl Repository for SledRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        self.db.size_on_disk().map(|_| ()).map_err(backend)
    }

    async fn get_all(&self) -> Result<Vec<Metric>, RepositoryError> {
        self.db.iter().values().map(|v| Self::decode(&v.map_err(backend)?)).collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<Metric, RepositoryError> {
        match self.db.get(id).map_err(backend)? {
            Some(v) => Self::decode(&v),
            None => Err(RepositoryError::NotFound(id.to_owned())),
        }
    }

    async fn create(&self, metric: Metric) -> Result<String, RepositoryError> {
        let json = serde_json::to_vec(&metric)?;
        match self.db.compare_and_swap(metric.id.as_bytes(), None as Option<&[u8]>, Some(json)).map_err(backend)? {
            Ok(()) => Ok(metric.id),
            Err(_) => Err(RepositoryError::AlreadyExists(metric.id)),
        }
    }

    async fn update(&self, metric: Metric) -> Result<MetricValue, RepositoryError> {
        if !self.db.contains_key(metric.id.as_bytes()).map_err(backend)? {
            return Err(RepositoryError::NotFound(metric.id));
        }
        self.db.insert(metric.id.as_bytes(), serde_json::to_vec(&metric)?).map_err(backend)?;
        Ok(metric.value)
    }

    async fn remove(&self, metric: &Metric) -> Result<String, RepositoryError> {
        match self.db.remove(metric.id.as_bytes()).map_err(backend)? {
            Some(_) => Ok(metric.id.clone()),
            None => Err(RepositoryError::NotFound(metric.id.clone())),
        }
    }
}

//! Repository and durable snapshot capabilities, with in-memory and file backends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::model::{Metric, MetricValue};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("metric `{0}` not found")]
    NotFound(String),
    #[error("metric `{0}` already exists")]
    AlreadyExists(String),
    #[error("repository backend: {0}")]
    Backend(String),
    #[error("repository codec: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("snapshot codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("snapshot backend: {0}")]
    Backend(String),
}

/// Live metric store. `update` overwrites an existing entry with an already merged metric.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), RepositoryError>;
    async fn get_all(&self) -> Result<Vec<Metric>, RepositoryError>;
    async fn get_by_id(&self, id: &str) -> Result<Metric, RepositoryError>;
    async fn create(&self, metric: Metric) -> Result<String, RepositoryError>;
    async fn update(&self, metric: Metric) -> Result<MetricValue, RepositoryError>;
    async fn remove(&self, metric: &Metric) -> Result<String, RepositoryError>;
}

/// Point-in-time snapshot persistence.
#[async_trait]
pub trait DurableStorage: Send + Sync + 'static {
    async fn save_data(&self, metrics: &[Metric]) -> Result<(), StorageError>;
    async fn load_data(&self) -> Result<Vec<Metric>, StorageError>;
}

/// Map from id to metric behind a single lock. Listing is ordered by id.
#[derive(Debug, Default)]
pub struct MemRepository {
    metrics: Mutex<BTreeMap<String, Metric>>,
}

impl MemRepository {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl Repository for MemRepository {
    async fn ping(&self) -> Result<(), RepositoryError> { Ok(()) }

    async fn get_all(&self) -> Result<Vec<Metric>, RepositoryError> {
        Ok(self.metrics.lock().values().cloned().collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Metric, RepositoryError> {
        self.metrics.lock().get(id).cloned().ok_or_else(|| RepositoryError::NotFound(id.to_owned()))
    }

    async fn create(&self, metric: Metric) -> Result<String, RepositoryError> {
        let mut map = self.metrics.lock();
        if map.contains_key(&metric.id) {
            return Err(RepositoryError::AlreadyExists(metric.id));
        }
        let id = metric.id.clone();
        map.insert(id.clone(), metric);
        Ok(id)
    }

    async fn update(&self, metric: Metric) -> Result<MetricValue, RepositoryError> {
        let mut map = self.metrics.lock();
        let slot = map.get_mut(&metric.id).ok_or_else(|| RepositoryError::NotFound(metric.id.clone()))?;
        *slot = metric;
        Ok(slot.value)
    }

    async fn remove(&self, metric: &Metric) -> Result<String, RepositoryError> {
        self.metrics
            .lock()
            .remove(&metric.id)
            .map(|m| m.id)
            .ok_or_else(|| RepositoryError::NotFound(metric.id.clone()))
    }
}

/// JSON snapshot file. Writes go to a sibling temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    pub fn path(&self) -> &Path { &self.path }

    fn io(&self, source: std::io::Error) -> StorageError { StorageError::Io { path: self.path.clone(), source } }
}

#[async_trait]
impl DurableStorage for FileStorage {
    async fn save_data(&self, metrics: &[Metric]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(metrics)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| self.io(e))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| self.io(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.io(e))?;
        debug!(path = %self.path.display(), metrics = metrics.len(), "snapshot written");
        Ok(())
    }

    async fn load_data(&self) -> Result<Vec<Metric>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io(e)),
        }
    }
}

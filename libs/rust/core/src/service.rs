//! Metric merge service and its durable flush scheduler.
//!
//! Every read-modify-write against the repository runs under `merge_lock`, so concurrent
//! updates to one id are linearizable. Snapshots are copied out of the repository and written
//! without holding that lock; `flush_lock` keeps two flushes from interleaving their writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::model::{Metric, MetricError, MetricKind};
use crate::pipeline::PipelineError;
use crate::storage::{DurableStorage, Repository, RepositoryError, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Snapshot after every successful mutation, before replying.
    Synchronous,
    /// Snapshot on a fixed period from a background task.
    Interval(Duration),
}

impl FlushPolicy {
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 { FlushPolicy::Synchronous } else { FlushPolicy::Interval(Duration::from_secs(secs)) }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Invalid(#[from] MetricError),
    #[error("{kind} metric `{id}` not found")]
    NotFound { id: String, kind: MetricKind },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// The merge was applied but the following snapshot write failed.
    #[error("update accepted but not durable: {0}")]
    NotDurable(#[source] StorageError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ServiceError> for PipelineError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Invalid(_) => PipelineError::Validation(e.to_string()),
            ServiceError::NotFound { .. } | ServiceError::Repository(RepositoryError::NotFound(_)) => {
                PipelineError::NotFound(e.to_string())
            }
            ServiceError::Repository(_) | ServiceError::NotDurable(_) | ServiceError::Storage(_) => {
                PipelineError::Storage(e.to_string())
            }
        }
    }
}

pub struct MetricService<R, S> {
    repo: R,
    storage: Option<S>,
    policy: FlushPolicy,
    merge_lock: Mutex<()>,
    flush_lock: Mutex<()>,
}

impl<R: Repository, S: DurableStorage> MetricService<R, S> {
    pub fn new(repo: R, storage: Option<S>, policy: FlushPolicy) -> Self {
        Self { repo, storage, policy, merge_lock: Mutex::new(()), flush_lock: Mutex::new(()) }
    }

    pub async fn ping(&self) -> Result<(), ServiceError> { Ok(self.repo.ping().await?) }

    /// A stored metric of another kind is reported as not found.
    pub async fn get(&self, id: &str, kind: MetricKind) -> Result<Metric, ServiceError> {
        match self.repo.get_by_id(id).await {
            Ok(m) if m.kind() == kind => Ok(m),
            Ok(_) | Err(RepositoryError::NotFound(_)) => Err(ServiceError::NotFound { id: id.to_owned(), kind }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_all(&self) -> Result<Vec<Metric>, ServiceError> { Ok(self.repo.get_all().await?) }

    /// Merges one metric and returns the post-merge state.
    pub async fn create_or_update(&self, metric: Metric) -> Result<Metric, ServiceError> {
        metric.validate()?;
        let merged = {
            let _guard = self.merge_lock.lock().await;
            self.merge_locked(metric).await?
        };
        self.flush_if_synchronous().await?;
        Ok(merged)
    }

    /// Validates the whole batch against stored kinds and against itself before touching the
    /// repository, then merges everything under one lock and flushes at most once. The result
    /// holds the running post-merge state for each input, in input order.
    ///
    /// Only validation failures are all-or-nothing. Writes go out in order of first appearance,
    /// so a repository error partway leaves the earlier ids applied and the rest untouched.
    pub async fn update_batch(&self, batch: Vec<Metric>) -> Result<Vec<Metric>, ServiceError> {
        for m in &batch {
            m.validate()?;
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let results = {
            let _guard = self.merge_lock.lock().await;
            let mut working: HashMap<String, (Metric, bool)> = HashMap::new();
            let mut order = Vec::new();
            let mut results = Vec::with_capacity(batch.len());
            for incoming in &batch {
                if let Some((current, _)) = working.get_mut(&incoming.id) {
                    current.merge(incoming)?;
                    results.push(current.clone());
                    continue;
                }
                let (current, exists) = match self.repo.get_by_id(&incoming.id).await {
                    Ok(mut stored) => {
                        stored.merge(incoming)?;
                        (stored, true)
                    }
                    Err(RepositoryError::NotFound(_)) => (incoming.clone(), false),
                    Err(e) => return Err(e.into()),
                };
                results.push(current.clone());
                order.push(incoming.id.clone());
                working.insert(incoming.id.clone(), (current, exists));
            }

            for id in order {
                let Some((metric, exists)) = working.remove(&id) else { continue };
                if exists {
                    self.repo.update(metric).await?;
                } else {
                    self.repo.create(metric).await?;
                }
            }
            results
        };

        self.flush_if_synchronous().await?;
        Ok(results)
    }

    /// Deletes a metric of the given kind. Not reachable from the ingestion routes.
    pub async fn remove(&self, id: &str, kind: MetricKind) -> Result<String, ServiceError> {
        let id = {
            let _guard = self.merge_lock.lock().await;
            let stored = match self.repo.get_by_id(id).await {
                Ok(m) if m.kind() == kind => m,
                Ok(_) | Err(RepositoryError::NotFound(_)) => {
                    return Err(ServiceError::NotFound { id: id.to_owned(), kind })
                }
                Err(e) => return Err(e.into()),
            };
            self.repo.remove(&stored).await?
        };
        self.flush_if_synchronous().await?;
        Ok(id)
    }

    /// Writes a full snapshot. A no-op without durable storage.
    pub async fn flush(&self) -> Result<(), ServiceError> {
        let Some(storage) = &self.storage else { return Ok(()) };
        let _guard = self.flush_lock.lock().await;
        let snapshot = self.repo.get_all().await?;
        storage.save_data(&snapshot).await?;
        debug!(metrics = snapshot.len(), "flushed metrics snapshot");
        Ok(())
    }

    /// Replays the last snapshot through the merge path, so counters accumulate onto whatever
    /// is already live. Returns the number of metrics replayed.
    pub async fn restore(&self) -> Result<usize, ServiceError> {
        let Some(storage) = &self.storage else { return Ok(0) };
        let restored = storage.load_data().await?;
        let _guard = self.merge_lock.lock().await;
        for metric in &restored {
            metric.validate()?;
            self.merge_locked(metric.clone()).await?;
        }
        info!(metrics = restored.len(), "restored metrics from snapshot");
        Ok(restored.len())
    }

    /// Starts the periodic flush task in interval mode. Returns `None` in synchronous mode or
    /// when no durable storage is configured.
    pub fn spawn_flusher(self: &Arc<Self>) -> Option<Flusher> {
        let FlushPolicy::Interval(period) = self.policy else { return None };
        self.storage.as_ref()?;
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.flush().await {
                            error!(error = %e, "scheduled flush failed, retrying next tick");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() { break; }
                    }
                }
            }
            debug!("flusher stopped");
        });
        info!(period_secs = period.as_secs(), "interval flusher started");
        Some(Flusher { stop: stop_tx, handle })
    }

    async fn merge_locked(&self, metric: Metric) -> Result<Metric, ServiceError> {
        match self.repo.get_by_id(&metric.id).await {
            Ok(mut stored) => {
                stored.merge(&metric)?;
                self.repo.update(stored.clone()).await?;
                Ok(stored)
            }
            Err(RepositoryError::NotFound(_)) => {
                self.repo.create(metric.clone()).await?;
                Ok(metric)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn flush_if_synchronous(&self) -> Result<(), ServiceError> {
        if self.policy != FlushPolicy::Synchronous {
            return Ok(());
        }
        match self.flush().await {
            Ok(()) => Ok(()),
            Err(ServiceError::Storage(e)) => {
                warn!(error = %e, "synchronous flush failed after merge");
                Err(ServiceError::NotDurable(e))
            }
            Err(e) => Err(e),
        }
    }
}

/// Handle to the background flush task.
pub struct Flusher {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Flusher {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "flusher task ended abnormally");
        }
    }
}

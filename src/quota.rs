//! Per-project generation quota.
//!
//! The generation pipeline never consults the quota itself. The HTTP server
//! takes a [`QuotaReservation`] from [`QuotaGate::reserve`] before running a
//! generation and commits it only after the generation succeeded, so failed
//! or cancelled generations are never counted. Concurrent requests for one
//! project cannot overshoot the ceiling because in-flight reservations count
//! as used.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One successful generation, as persisted by a [`QuotaStore`].
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub project_id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl GenerationRecord {
    pub fn new(project_id: &str, model: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            model: model.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Storage for generation records.
///
/// Implement this over the application's database to share quota state
/// between processes; [`InMemoryQuotaStore`] is used otherwise.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Number of successful generations recorded for `project_id`.
    async fn count(&self, project_id: &str) -> Result<u32>;

    async fn record(&self, record: GenerationRecord) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryQuotaStore {
    records: Mutex<HashMap<String, Vec<GenerationRecord>>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self, project_id: &str) -> Vec<GenerationRecord> {
        self.records
            .lock()
            .await
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn count(&self, project_id: &str) -> Result<u32> {
        let records = self.records.lock().await;
        Ok(records.get(project_id).map_or(0, |r| r.len() as u32))
    }

    async fn record(&self, record: GenerationRecord) -> Result<()> {
        self.records
            .lock()
            .await
            .entry(record.project_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub used: u32,
    pub limit: u32,
}

impl QuotaStatus {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("project {project_id} has used {used} of {limit} generations")]
    Exceeded {
        project_id: String,
        used: u32,
        limit: u32,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A [`QuotaStore`] paired with the configured per-project ceiling.
///
/// Generations in flight hold a [`QuotaReservation`] and count against the
/// ceiling until they are committed or dropped.
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn QuotaStore>,
    limit: u32,
    /// Serializes reserve and commit so the store count and `pending` are
    /// read together.
    reserve_lock: Arc<Mutex<()>>,
    pending: Arc<StdMutex<HashMap<String, u32>>>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn QuotaStore>, limit: u32) -> Self {
        Self {
            store,
            limit,
            reserve_lock: Arc::new(Mutex::new(())),
            pending: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Recorded generations only; in-flight reservations are not included.
    pub async fn status(&self, project_id: &str) -> Result<QuotaStatus> {
        Ok(QuotaStatus {
            used: self.store.count(project_id).await?,
            limit: self.limit,
        })
    }

    /// Claims one generation for `project_id`.
    ///
    /// The returned status counts the claim as used. Dropping the
    /// reservation without [`QuotaReservation::commit`] gives it back.
    pub async fn reserve(&self, project_id: &str) -> Result<QuotaReservation, QuotaError> {
        let _guard = self.reserve_lock.lock().await;
        let recorded = self.store.count(project_id).await?;

        let mut pending = lock_pending(&self.pending);
        let used = recorded + pending.get(project_id).copied().unwrap_or(0);
        if used >= self.limit {
            return Err(QuotaError::Exceeded {
                project_id: project_id.to_string(),
                used,
                limit: self.limit,
            });
        }
        *pending.entry(project_id.to_string()).or_insert(0) += 1;
        drop(pending);

        Ok(QuotaReservation {
            gate: self.clone(),
            project_id: project_id.to_string(),
            status: QuotaStatus {
                used: used + 1,
                limit: self.limit,
            },
            settled: false,
        })
    }

    fn release(&self, project_id: &str) {
        let mut pending = lock_pending(&self.pending);
        if let Some(in_flight) = pending.get_mut(project_id) {
            *in_flight = in_flight.saturating_sub(1);
            if *in_flight == 0 {
                pending.remove(project_id);
            }
        }
    }
}

fn lock_pending(
    pending: &StdMutex<HashMap<String, u32>>,
) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One claimed generation. Commit it on success; drop it otherwise.
pub struct QuotaReservation {
    gate: QuotaGate,
    project_id: String,
    status: QuotaStatus,
    settled: bool,
}

impl QuotaReservation {
    /// Quota status with this reservation counted as used.
    pub fn status(&self) -> QuotaStatus {
        self.status
    }

    /// Records the generation and turns the claim into a stored record.
    pub async fn commit(mut self, model: &str) -> Result<()> {
        let _guard = self.gate.reserve_lock.lock().await;
        self.gate
            .store
            .record(GenerationRecord::new(&self.project_id, model))
            .await?;
        self.gate.release(&self.project_id);
        self.settled = true;
        Ok(())
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.release(&self.project_id);
        }
    }
}

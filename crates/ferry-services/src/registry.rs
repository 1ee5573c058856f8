//! Transfer registry: the authoritative store of transfer records.
//!
//! Every record is owned by exactly one writer (the sending task for
//! outgoing transfers, the reassembler for incoming ones). Readers such as
//! a presentation layer get cloned snapshots; a record is never observed
//! half-updated because each mutation happens under its shard lock.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use ferry_core::{Direction, FileMeta, TransferId, TransferState};

/// Everything known about one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub direction: Direction,
    pub name: String,
    pub mime_type: String,
    pub total_size: u64,
    pub transferred_size: u64,
    pub state: TransferState,
    /// Unix ms when the record was created.
    pub started_at: u64,
    /// Unix ms of the last mutation.
    pub updated_at: u64,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl TransferRecord {
    pub fn outgoing(
        transfer_id: TransferId,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        total_size: u64,
    ) -> Self {
        let now = now_ms();
        Self {
            transfer_id,
            direction: Direction::Outgoing,
            name: name.into(),
            mime_type: mime_type.into(),
            total_size,
            transferred_size: 0,
            state: TransferState::Sending,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn incoming(meta: &FileMeta) -> Self {
        let now = now_ms();
        Self {
            transfer_id: meta.transfer_id.clone(),
            direction: Direction::Incoming,
            name: meta.name.clone(),
            mime_type: meta.mime_type.clone(),
            total_size: meta.size,
            transferred_size: 0,
            state: TransferState::Receiving,
            started_at: now,
            updated_at: now,
        }
    }

    /// Placeholder for an incoming transfer whose chunks beat its meta.
    pub fn awaiting_meta(transfer_id: TransferId) -> Self {
        let now = now_ms();
        Self {
            transfer_id,
            direction: Direction::Incoming,
            name: String::new(),
            mime_type: String::new(),
            total_size: 0,
            transferred_size: 0,
            state: TransferState::AwaitingMeta,
            started_at: now,
            updated_at: now,
        }
    }

    /// Fraction transferred in `0.0..=1.0`. Empty transfers count as done.
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 1.0;
        }
        self.transferred_size.min(self.total_size) as f64 / self.total_size as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("transfer id {0} already exists")]
    DuplicateTransferId(TransferId),
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),
    #[error("transfer {0} is finished and can no longer change")]
    Finished(TransferId),
}

/// Shared map of transfer id → record. Cheap to clone.
#[derive(Clone, Default)]
pub struct TransferRegistry {
    records: Arc<DashMap<TransferId, TransferRecord>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
        }
    }

    /// Insert a new record. An existing record with the same id is left
    /// untouched and the create is refused.
    pub fn create(&self, record: TransferRecord) -> Result<(), RegistryError> {
        match self.records.entry(record.transfer_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateTransferId(record.transfer_id)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Mutate a live record. Finished records are immutable.
    pub fn update<R>(
        &self,
        transfer_id: &TransferId,
        mutate: impl FnOnce(&mut TransferRecord) -> R,
    ) -> Result<R, RegistryError> {
        let mut record = self
            .records
            .get_mut(transfer_id)
            .ok_or_else(|| RegistryError::UnknownTransfer(transfer_id.clone()))?;
        if record.state.is_terminal() {
            return Err(RegistryError::Finished(transfer_id.clone()));
        }
        let out = mutate(record.value_mut());
        record.updated_at = now_ms();
        Ok(out)
    }

    /// Snapshot of one record.
    pub fn get(&self, transfer_id: &TransferId) -> Option<TransferRecord> {
        self.records.get(transfer_id).map(|r| r.clone())
    }

    /// Snapshot of every record, oldest first.
    pub fn all(&self) -> Vec<TransferRecord> {
        let mut all: Vec<TransferRecord> = self.records.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.transfer_id.cmp(&b.transfer_id))
        });
        all
    }

    /// Records that have not reached a terminal state.
    pub fn active(&self) -> Vec<TransferRecord> {
        self.all()
            .into_iter()
            .filter(|r| !r.state.is_terminal())
            .collect()
    }

    /// Remove a finished record. Live records are kept.
    pub fn remove(&self, transfer_id: &TransferId) -> Option<TransferRecord> {
        self.records
            .remove_if(transfer_id, |_, r| r.state.is_terminal())
            .map(|(_, r)| r)
    }

    /// Drop finished records last touched more than `older_than` ago.
    /// Returns how many were evicted.
    pub fn evict_finished(&self, older_than: Duration) -> usize {
        let cutoff = now_ms().saturating_sub(older_than.as_millis() as u64);
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.state.is_terminal() && r.updated_at <= cutoff));
        let evicted = before.saturating_sub(self.records.len());
        if evicted > 0 {
            tracing::debug!(evicted, "evicted finished transfer records");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

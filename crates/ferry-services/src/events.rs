//! Transfer events emitted to whoever presents or consumes transfers.

use bytes::Bytes;
use tokio::sync::mpsc;

use ferry_core::crypto::hash;
use ferry_core::{Direction, FailureCause, TransferId};

use crate::registry::TransferRecord;

/// The assembled content of a completed incoming transfer.
///
/// Ownership of the bytes moves out of the reassembler with this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub transfer_id: TransferId,
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl Artifact {
    /// BLAKE3 digest of the content, hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(hash(&self.data))
    }
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A transfer record was created (meta sent or received).
    Started(TransferRecord),
    Progress {
        transfer_id: TransferId,
        direction: Direction,
        transferred: u64,
        total: u64,
    },
    /// Every byte of an outgoing transfer was handed to the channel.
    Sent {
        transfer_id: TransferId,
        total: u64,
        digest: String,
    },
    /// An incoming transfer finished reassembly.
    Completed(Artifact),
    Failed {
        transfer_id: TransferId,
        direction: Direction,
        cause: FailureCause,
    },
}

impl TransferEvent {
    pub fn transfer_id(&self) -> &TransferId {
        match self {
            Self::Started(record) => &record.transfer_id,
            Self::Progress { transfer_id, .. }
            | Self::Sent { transfer_id, .. }
            | Self::Failed { transfer_id, .. } => transfer_id,
            Self::Completed(artifact) => &artifact.transfer_id,
        }
    }
}

/// Receives transfer events. Called synchronously from the owning task,
/// so implementations must not block.
pub trait TransferObserver: Send + Sync {
    fn on_event(&self, event: TransferEvent);
}

/// Discards every event.
impl TransferObserver for () {
    fn on_event(&self, _event: TransferEvent) {}
}

/// Forwards events to a channel. A dropped receiver is ignored.
impl TransferObserver for mpsc::UnboundedSender<TransferEvent> {
    fn on_event(&self, event: TransferEvent) {
        let _ = self.send(event);
    }
}

//! Outgoing transfers: one meta message, then the file in ordered chunks.
//!
//! Each transfer runs as its own task. After every chunk is handed to the
//! channel the task yields, so concurrent transfers interleave fairly on
//! the shared channel and no single file monopolises the runtime. There is
//! no acknowledgement from the receiver; completion is implied by the byte
//! count declared in the meta message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use ferry_core::crypto::Hasher;
use ferry_core::{Direction, FailureCause, Message, TransferId, TransferState};

use crate::channel::Channel;
use crate::events::{TransferEvent, TransferObserver};
use crate::registry::{RegistryError, TransferRecord, TransferRegistry};
use crate::source::TransferSource;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("no open channel")]
    ChannelUnavailable,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("no in-flight outgoing transfer {0}")]
    NotInFlight(TransferId),
}

/// Handle to an outgoing transfer started by [`TransferSender::begin_send`].
#[derive(Debug)]
pub struct SendHandle {
    transfer_id: TransferId,
    task: JoinHandle<TransferState>,
}

impl SendHandle {
    pub fn transfer_id(&self) -> &TransferId {
        &self.transfer_id
    }

    /// Wait for the send loop to stop and return the final state.
    pub async fn finished(self) -> Result<TransferState, tokio::task::JoinError> {
        self.task.await
    }
}

/// Starts and drives outgoing transfers over one channel.
#[derive(Clone)]
pub struct TransferSender {
    channel: Arc<dyn Channel>,
    registry: TransferRegistry,
    observer: Arc<dyn TransferObserver>,
    chunk_size: usize,
    /// transfer_id → cancellation flag for loops still running.
    in_flight: Arc<DashMap<TransferId, Arc<AtomicBool>>>,
}

impl TransferSender {
    pub fn new(
        channel: Arc<dyn Channel>,
        registry: TransferRegistry,
        observer: Arc<dyn TransferObserver>,
        chunk_size: usize,
    ) -> Self {
        Self {
            channel,
            registry,
            observer,
            chunk_size: chunk_size.clamp(1, ferry_core::MAX_CHUNK_SIZE),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Start sending `source` under a freshly generated transfer id.
    ///
    /// The meta message is on the channel when this returns; chunks follow
    /// from a spawned task. Must be called within a tokio runtime.
    pub fn begin_send(&self, source: TransferSource) -> Result<SendHandle, TransferError> {
        self.begin_send_with_id(TransferId::generate(), source)
    }

    pub(crate) fn begin_send_with_id(
        &self,
        transfer_id: TransferId,
        source: TransferSource,
    ) -> Result<SendHandle, TransferError> {
        if !self.channel.is_open() {
            return Err(TransferError::ChannelUnavailable);
        }

        let record = TransferRecord::outgoing(
            transfer_id.clone(),
            &source.name,
            &source.mime_type,
            source.size,
        );
        if let Err(e) = self.registry.create(record.clone()) {
            tracing::warn!(transfer_id = %transfer_id, error = %e, "refusing send with duplicate transfer id");
            return Err(e.into());
        }

        let meta = Message::meta(
            transfer_id.clone(),
            &source.name,
            source.size,
            &source.mime_type,
        );
        if let Err(e) = self.channel.send(meta) {
            tracing::warn!(transfer_id = %transfer_id, error = %e, "meta send failed");
            self.finish(&transfer_id, TransferState::Failed(FailureCause::ChannelClosed));
            return Err(TransferError::ChannelUnavailable);
        }

        tracing::info!(
            transfer_id = %transfer_id,
            name = %source.name,
            bytes = source.size,
            mime_type = %source.mime_type,
            "outgoing transfer started"
        );
        self.observer.on_event(TransferEvent::Started(record));

        let cancel = Arc::new(AtomicBool::new(false));
        self.in_flight.insert(transfer_id.clone(), cancel.clone());

        let this = self.clone();
        let id = transfer_id.clone();
        let task = tokio::spawn(async move { this.send_chunks(id, source, cancel).await });

        Ok(SendHandle { transfer_id, task })
    }

    /// Ask an in-flight transfer to stop. It halts at its next yield and
    /// ends `Cancelled`.
    pub fn cancel(&self, transfer_id: &TransferId) -> Result<(), TransferError> {
        match self.in_flight.get(transfer_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                tracing::info!(transfer_id = %transfer_id, "cancel requested");
                Ok(())
            }
            None => Err(TransferError::NotInFlight(transfer_id.clone())),
        }
    }

    /// Number of send loops still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn send_chunks(
        self,
        transfer_id: TransferId,
        mut source: TransferSource,
        cancel: Arc<AtomicBool>,
    ) -> TransferState {
        let total = source.size;
        let mut buf = vec![0u8; self.chunk_size];
        let mut sent: u64 = 0;
        let mut hasher = Hasher::new();

        let outcome = loop {
            if sent >= total {
                break TransferState::Complete;
            }
            if cancel.load(Ordering::Relaxed) {
                break TransferState::Cancelled;
            }
            if !self.channel.is_open() {
                break TransferState::Failed(FailureCause::ChannelClosed);
            }

            let want = (total - sent).min(self.chunk_size as u64) as usize;
            let n = match source.read_slice(&mut buf[..want]).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(transfer_id = %transfer_id, error = %e, "source read failed");
                    break TransferState::Failed(FailureCause::SourceRead);
                }
            };
            if n < want {
                tracing::warn!(
                    transfer_id = %transfer_id,
                    declared = total,
                    available = sent + n as u64,
                    "source ended before declared size"
                );
                break TransferState::Failed(FailureCause::SizeMismatch);
            }

            let payload = Bytes::copy_from_slice(&buf[..n]);
            hasher.update(&payload);
            if let Err(e) = self.channel.send(Message::chunk(transfer_id.clone(), payload)) {
                tracing::debug!(transfer_id = %transfer_id, error = %e, "chunk send failed");
                break TransferState::Failed(FailureCause::ChannelClosed);
            }

            sent += n as u64;
            let transferred = sent.min(total);
            if let Err(e) = self
                .registry
                .update(&transfer_id, |r| r.transferred_size = transferred)
            {
                tracing::warn!(transfer_id = %transfer_id, error = %e, "progress update rejected");
            }
            tracing::trace!(transfer_id = %transfer_id, transferred, total, "chunk sent");
            self.observer.on_event(TransferEvent::Progress {
                transfer_id: transfer_id.clone(),
                direction: Direction::Outgoing,
                transferred,
                total,
            });

            tokio::task::yield_now().await;
        };

        self.in_flight.remove(&transfer_id);
        self.finish(&transfer_id, outcome);

        if outcome == TransferState::Complete {
            let digest = hex::encode(hasher.finalize());
            tracing::info!(transfer_id = %transfer_id, bytes = total, digest = %digest, "outgoing transfer complete");
            self.observer.on_event(TransferEvent::Sent {
                transfer_id,
                total,
                digest,
            });
        }
        outcome
    }

    /// Record a terminal state and report failures.
    fn finish(&self, transfer_id: &TransferId, outcome: TransferState) {
        if let Err(e) = self.registry.update(transfer_id, |r| r.state = outcome) {
            tracing::warn!(transfer_id = %transfer_id, error = %e, "final state not recorded");
            return;
        }
        let cause = match outcome {
            TransferState::Failed(cause) => cause,
            TransferState::Cancelled => FailureCause::Cancelled,
            _ => return,
        };
        tracing::warn!(transfer_id = %transfer_id, %cause, "outgoing transfer stopped");
        self.observer.on_event(TransferEvent::Failed {
            transfer_id: transfer_id.clone(),
            direction: Direction::Outgoing,
            cause,
        });
    }
}

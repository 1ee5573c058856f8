//! Incoming transfers: demultiplex one ordered message stream into
//! independent per-transfer reassembly.
//!
//! Per transfer id the state machine is
//!
//! ```text
//! AwaitingMeta ──meta──▶ Receiving ──bytes == size──▶ Complete
//!        │                   │
//!        └───────────────────┴──▶ Failed(cause)
//! ```
//!
//! The reassembler is the single writer for incoming records. It owns its
//! buffers outright and processes each message to completion without
//! suspending, so interleaved transfers can never see each other's bytes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::broadcast;

use ferry_core::config::TransferSettings;
use ferry_core::{
    Direction, FailureCause, FileChunk, FileMeta, Message, TransferId, TransferState,
    MAX_CHUNK_SIZE,
};

use crate::channel::{ChannelEvent, ChannelEvents};
use crate::events::{Artifact, TransferEvent, TransferObserver};
use crate::registry::{TransferRecord, TransferRegistry};

/// How often the receive loop looks for stalled transfers.
const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Chunks of one transfer received so far, in order.
struct ReassemblyBuffer {
    meta: FileMeta,
    chunks: Vec<Bytes>,
    received: u64,
    last_chunk_at: Instant,
}

impl ReassemblyBuffer {
    fn into_bytes(self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap_or_default();
        }
        let mut out = BytesMut::with_capacity(self.received as usize);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }
}

/// Chunks that arrived before their transfer's meta message.
struct StagedChunks {
    chunks: Vec<FileChunk>,
    bytes: u64,
    first_seen: Instant,
}

pub struct Reassembler {
    registry: TransferRegistry,
    observer: Arc<dyn TransferObserver>,
    settings: TransferSettings,
    buffers: HashMap<TransferId, ReassemblyBuffer>,
    staging: HashMap<TransferId, StagedChunks>,
    closed: bool,
}

impl Reassembler {
    pub fn new(
        registry: TransferRegistry,
        observer: Arc<dyn TransferObserver>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            registry,
            observer,
            settings,
            buffers: HashMap::new(),
            staging: HashMap::new(),
            closed: false,
        }
    }

    /// Consume channel events until the channel closes or `shutdown` fires.
    pub async fn run(mut self, mut events: ChannelEvents, mut shutdown: broadcast::Receiver<()>) {
        let stall_checks = self.settings.stall_timeout().is_some();
        let mut interval = tokio::time::interval(STALL_CHECK_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("reassembler shutting down");
                    return;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => self.channel_closed(),
                    }
                    if self.closed {
                        return;
                    }
                }

                _ = interval.tick(), if stall_checks => {
                    self.fail_stalled(Instant::now());
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => tracing::info!("channel open"),
            ChannelEvent::Message(message) => self.handle_message(message),
            ChannelEvent::Error(cause) => {
                tracing::warn!(cause = %cause, "channel error");
                self.channel_closed();
            }
            ChannelEvent::Close => self.channel_closed(),
        }
    }

    /// Route one message to its transfer.
    pub fn handle_message(&mut self, message: Message) {
        if self.closed {
            tracing::debug!("message after channel close, ignoring");
            return;
        }
        match message {
            Message::Meta(meta) => self.on_meta(meta),
            Message::Chunk(chunk) => self.on_chunk(chunk),
            Message::Unknown => tracing::debug!("unknown message kind, ignoring"),
        }
    }

    fn on_meta(&mut self, meta: FileMeta) {
        let transfer_id = meta.transfer_id.clone();

        match self.registry.get(&transfer_id) {
            Some(existing) if existing.state == TransferState::AwaitingMeta => {
                let promoted = self.registry.update(&transfer_id, |r| {
                    *r = TransferRecord {
                        started_at: r.started_at,
                        ..TransferRecord::incoming(&meta)
                    };
                    r.clone()
                });
                match promoted {
                    Ok(record) => self.start(meta, record),
                    Err(e) => {
                        tracing::warn!(transfer_id = %transfer_id, error = %e, "could not promote staged transfer");
                        return;
                    }
                }
            }
            Some(existing) => {
                if existing.direction == Direction::Outgoing {
                    tracing::warn!(transfer_id = %transfer_id, "meta collides with an outgoing transfer id, ignoring");
                } else {
                    tracing::debug!(transfer_id = %transfer_id, "duplicate meta ignored");
                }
                return;
            }
            None => {
                let record = TransferRecord::incoming(&meta);
                if let Err(e) = self.registry.create(record.clone()) {
                    tracing::warn!(transfer_id = %transfer_id, error = %e, "meta dropped");
                    return;
                }
                self.start(meta, record);
            }
        }

        if let Some(staged) = self.staging.remove(&transfer_id) {
            tracing::debug!(
                transfer_id = %transfer_id,
                chunks = staged.chunks.len(),
                bytes = staged.bytes,
                "draining chunks staged before meta"
            );
            for chunk in staged.chunks {
                self.on_chunk(chunk);
            }
        }

        // Nothing to wait for on an empty file.
        if let Some(buffer) = self.buffers.get(&transfer_id) {
            if buffer.meta.size == 0 {
                self.complete(&transfer_id);
            }
        }
    }

    fn start(&mut self, meta: FileMeta, record: TransferRecord) {
        tracing::info!(
            transfer_id = %meta.transfer_id,
            name = %meta.name,
            bytes = meta.size,
            mime_type = %meta.mime_type,
            "incoming transfer started"
        );
        self.buffers.insert(
            meta.transfer_id.clone(),
            ReassemblyBuffer {
                meta,
                chunks: Vec::new(),
                received: 0,
                last_chunk_at: Instant::now(),
            },
        );
        self.observer.on_event(TransferEvent::Started(record));
    }

    fn on_chunk(&mut self, chunk: FileChunk) {
        let transfer_id = chunk.transfer_id.clone();
        let state = self.registry.get(&transfer_id).map(|r| (r.direction, r.state));

        match state {
            None | Some((Direction::Incoming, TransferState::AwaitingMeta)) => self.stage(chunk),
            Some((Direction::Incoming, TransferState::Receiving)) => self.append(chunk),
            Some((direction, state)) => {
                tracing::debug!(
                    transfer_id = %transfer_id,
                    ?direction,
                    state = state.name(),
                    "chunk for inactive transfer ignored"
                );
            }
        }
    }

    fn stage(&mut self, chunk: FileChunk) {
        let transfer_id = chunk.transfer_id.clone();

        if !self.staging.contains_key(&transfer_id) {
            if let Err(e) = self
                .registry
                .create(TransferRecord::awaiting_meta(transfer_id.clone()))
            {
                tracing::warn!(transfer_id = %transfer_id, error = %e, "cannot stage chunk");
                return;
            }
            tracing::debug!(transfer_id = %transfer_id, "chunk arrived before meta, staging");
        }

        let staged = self
            .staging
            .entry(transfer_id.clone())
            .or_insert_with(|| StagedChunks {
                chunks: Vec::new(),
                bytes: 0,
                first_seen: Instant::now(),
            });
        staged.bytes += chunk.payload.len() as u64;
        staged.chunks.push(chunk);

        let limit = self.settings.max_staged_bytes;
        if limit > 0 && staged.bytes > limit {
            tracing::warn!(transfer_id = %transfer_id, staged = staged.bytes, limit, "staging limit exceeded");
            self.fail(&transfer_id, FailureCause::StagingOverflow);
        }
    }

    fn append(&mut self, chunk: FileChunk) {
        let transfer_id = chunk.transfer_id;
        let len = chunk.payload.len();

        if self.settings.reject_oversized_chunks && len > MAX_CHUNK_SIZE {
            tracing::warn!(transfer_id = %transfer_id, len, max = MAX_CHUNK_SIZE, "oversized chunk");
            self.fail(&transfer_id, FailureCause::ChunkTooLarge);
            return;
        }

        let Some(buffer) = self.buffers.get_mut(&transfer_id) else {
            tracing::warn!(transfer_id = %transfer_id, "receiving transfer has no buffer");
            return;
        };

        let received = buffer.received + len as u64;
        let total = buffer.meta.size;
        if received > total {
            tracing::warn!(
                transfer_id = %transfer_id,
                received,
                declared = total,
                "received bytes exceed declared size"
            );
            self.fail(&transfer_id, FailureCause::SizeOverflow);
            return;
        }

        buffer.received = received;
        buffer.chunks.push(chunk.payload);
        buffer.last_chunk_at = Instant::now();

        if let Err(e) = self
            .registry
            .update(&transfer_id, |r| r.transferred_size = received)
        {
            tracing::warn!(transfer_id = %transfer_id, error = %e, "progress update rejected");
        }
        tracing::trace!(transfer_id = %transfer_id, received, total, "chunk received");
        self.observer.on_event(TransferEvent::Progress {
            transfer_id: transfer_id.clone(),
            direction: Direction::Incoming,
            transferred: received,
            total,
        });

        if received == total {
            self.complete(&transfer_id);
        }
    }

    fn complete(&mut self, transfer_id: &TransferId) {
        let Some(buffer) = self.buffers.remove(transfer_id) else {
            return;
        };
        if let Err(e) = self
            .registry
            .update(transfer_id, |r| r.state = TransferState::Complete)
        {
            tracing::warn!(transfer_id = %transfer_id, error = %e, "completion not recorded");
            return;
        }

        let name = buffer.meta.name.clone();
        let mime_type = buffer.meta.mime_type.clone();
        let chunks = buffer.chunks.len();
        let artifact = Artifact {
            transfer_id: transfer_id.clone(),
            name,
            mime_type,
            data: buffer.into_bytes(),
        };

        tracing::info!(
            transfer_id = %transfer_id,
            name = %artifact.name,
            bytes = artifact.data.len(),
            chunks,
            digest = %artifact.digest(),
            "incoming transfer complete"
        );
        self.observer.on_event(TransferEvent::Completed(artifact));
    }

    fn fail(&mut self, transfer_id: &TransferId, cause: FailureCause) {
        self.buffers.remove(transfer_id);
        self.staging.remove(transfer_id);

        if let Err(e) = self
            .registry
            .update(transfer_id, |r| r.state = TransferState::Failed(cause))
        {
            tracing::debug!(transfer_id = %transfer_id, error = %e, "failure not recorded");
            return;
        }
        tracing::warn!(transfer_id = %transfer_id, %cause, "incoming transfer failed");
        self.observer.on_event(TransferEvent::Failed {
            transfer_id: transfer_id.clone(),
            direction: Direction::Incoming,
            cause,
        });
    }

    /// Fail every incomplete incoming transfer. Further messages are ignored.
    pub fn channel_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut pending: Vec<TransferId> = self
            .buffers
            .keys()
            .chain(self.staging.keys())
            .cloned()
            .collect();
        pending.sort();
        pending.dedup();

        if !pending.is_empty() {
            tracing::warn!(incomplete = pending.len(), "channel closed with transfers in flight");
        }
        for transfer_id in pending {
            self.fail(&transfer_id, FailureCause::ChannelClosed);
        }
    }

    /// Fail transfers with no progress within the stall timeout, measured
    /// at `now`. Returns how many were failed.
    pub fn fail_stalled(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.settings.stall_timeout() else {
            return 0;
        };

        let stalled: Vec<TransferId> = self
            .buffers
            .iter()
            .filter(|(_, b)| now.saturating_duration_since(b.last_chunk_at) > timeout)
            .map(|(id, _)| id.clone())
            .chain(
                self.staging
                    .iter()
                    .filter(|(_, s)| now.saturating_duration_since(s.first_seen) > timeout)
                    .map(|(id, _)| id.clone()),
            )
            .collect();

        for transfer_id in &stalled {
            self.fail(transfer_id, FailureCause::Stalled);
        }
        stalled.len()
    }

    /// Transfers currently being reassembled or staged.
    pub fn pending(&self) -> usize {
        self.buffers.len() + self.staging.len()
    }
}

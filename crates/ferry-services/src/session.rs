//! One endpoint's view of a channel: outgoing sends plus the incoming
//! reassembly loop, sharing a registry.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use ferry_core::config::TransferSettings;
use ferry_core::TransferId;

use crate::channel::{Channel, ChannelEvents};
use crate::events::TransferObserver;
use crate::reassembler::Reassembler;
use crate::registry::TransferRegistry;
use crate::sender::{SendHandle, TransferError, TransferSender};
use crate::source::TransferSource;

pub struct TransferSession {
    sender: TransferSender,
    registry: TransferRegistry,
    channel: Arc<dyn Channel>,
    shutdown: broadcast::Sender<()>,
    receiver: JoinHandle<()>,
}

impl TransferSession {
    /// Attach to an established channel. Spawns the receive loop, so this
    /// must be called within a tokio runtime.
    pub fn start(
        channel: Arc<dyn Channel>,
        events: ChannelEvents,
        registry: TransferRegistry,
        observer: Arc<dyn TransferObserver>,
        settings: TransferSettings,
    ) -> Self {
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let sender = TransferSender::new(
            channel.clone(),
            registry.clone(),
            observer.clone(),
            settings.effective_chunk_size(),
        );
        let reassembler = Reassembler::new(registry.clone(), observer, settings);
        let receiver = tokio::spawn(reassembler.run(events, shutdown_rx));

        Self {
            sender,
            registry,
            channel,
            shutdown,
            receiver,
        }
    }

    pub fn send(&self, source: TransferSource) -> Result<SendHandle, TransferError> {
        self.sender.begin_send(source)
    }

    pub fn cancel(&self, transfer_id: &TransferId) -> Result<(), TransferError> {
        self.sender.cancel(transfer_id)
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Close the channel. In-flight transfers on both ends fail with
    /// `ChannelClosed`.
    pub fn close(&self) {
        self.channel.close();
    }

    /// Wait for the receive loop to end, which happens when the channel
    /// closes.
    pub async fn closed(self) {
        if let Err(e) = self.receiver.await {
            tracing::error!(error = %e, "receive loop panicked");
        }
    }

    /// Stop the receive loop without closing the channel.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        self.closed().await;
    }
}

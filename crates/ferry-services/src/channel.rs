//! Channel contract, plus an in-process channel pair.
//!
//! A channel is an established, ordered, reliable, message-framed pipe
//! between exactly two endpoints. How it was established (signaling, NAT
//! traversal, encryption) is not Ferry's concern. Ferry needs three things
//! from it: `send`, an ordered stream of received messages, and lifecycle
//! notifications.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use ferry_core::wire::{Message, WireError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotOpen,
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// What the receiving side of a channel observes, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(Message),
    Close,
    Error(String),
}

/// Sending half of an established channel.
pub trait Channel: Send + Sync {
    /// Hand a message to the channel. Messages arrive at the peer in the
    /// order they were sent.
    fn send(&self, message: Message) -> Result<(), ChannelError>;

    fn is_open(&self) -> bool;

    /// Close both directions. The peer and the local side each observe a
    /// single `Close` event after every message already sent.
    fn close(&self);
}

// ── In-memory channel ─────────────────────────────────────────────────────────

enum Frame {
    Open,
    Data(Vec<u8>),
    Close,
    Error(String),
}

/// Ordered stream of events for one channel endpoint.
///
/// Frames are decoded here; undecodable frames are logged and skipped so a
/// single bad frame never takes down the stream.
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl ChannelEvents {
    /// Next event, or `None` once both channel endpoints are gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            let frame = self.rx.recv().await?;
            match frame {
                Frame::Open => return Some(ChannelEvent::Open),
                Frame::Close => return Some(ChannelEvent::Close),
                Frame::Error(cause) => return Some(ChannelEvent::Error(cause)),
                Frame::Data(bytes) => match Message::from_bytes(&bytes) {
                    Ok(message) => return Some(ChannelEvent::Message(message)),
                    Err(e) => {
                        tracing::warn!(error = %e, len = bytes.len(), "undecodable frame, discarding");
                    }
                },
            }
        }
    }
}

struct Link {
    /// Frames for the endpoint that owns this half.
    local: mpsc::UnboundedSender<Frame>,
    /// Frames for the opposite endpoint.
    remote: mpsc::UnboundedSender<Frame>,
}

/// One endpoint of an in-process channel.
///
/// Messages are JSON-framed on `send` and decoded by the peer's
/// [`ChannelEvents`], so everything crossing the pair goes through the real
/// wire codec.
#[derive(Clone)]
pub struct MemoryChannel {
    /// Shared by both endpoints; holding it while queueing a frame keeps
    /// `Close` strictly after every message sent before it.
    state: Arc<Mutex<bool>>,
    link: Arc<Link>,
}

impl MemoryChannel {
    /// Create two connected endpoints. Each side's event stream starts with
    /// `Open`.
    pub fn pair() -> ((MemoryChannel, ChannelEvents), (MemoryChannel, ChannelEvents)) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(true));

        let _ = a_tx.send(Frame::Open);
        let _ = b_tx.send(Frame::Open);

        let a = MemoryChannel {
            state: state.clone(),
            link: Arc::new(Link {
                local: a_tx.clone(),
                remote: b_tx.clone(),
            }),
        };
        let b = MemoryChannel {
            state,
            link: Arc::new(Link {
                local: b_tx,
                remote: a_tx,
            }),
        };

        (
            (a, ChannelEvents { rx: a_rx }),
            (b, ChannelEvents { rx: b_rx }),
        )
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tear the channel down with an error, as a transport failure would.
    /// Both endpoints observe `Error(cause)` followed by `Close`.
    pub fn fail(&self, cause: &str) {
        let mut open = self.lock();
        if !*open {
            return;
        }
        *open = false;
        for tx in [&self.link.local, &self.link.remote] {
            let _ = tx.send(Frame::Error(cause.to_string()));
            let _ = tx.send(Frame::Close);
        }
        tracing::warn!(cause, "channel failed");
    }
}

impl Channel for MemoryChannel {
    fn send(&self, message: Message) -> Result<(), ChannelError> {
        let frame = message.to_bytes()?;
        let open = self.lock();
        if !*open {
            return Err(ChannelError::NotOpen);
        }
        self.link
            .remote
            .send(Frame::Data(frame))
            .map_err(|_| ChannelError::NotOpen)
    }

    fn is_open(&self) -> bool {
        *self.lock()
    }

    fn close(&self) {
        let mut open = self.lock();
        if !*open {
            return;
        }
        *open = false;
        let _ = self.link.local.send(Frame::Close);
        let _ = self.link.remote.send(Frame::Close);
        tracing::info!("channel closed");
    }
}

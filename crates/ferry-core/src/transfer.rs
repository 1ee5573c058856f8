//! Transfer identity and lifecycle types shared by both directions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::random_token;

// ── Transfer Identifier ───────────────────────────────────────────────────────

/// Opaque identifier scoping every message of one file transfer.
///
/// Minted by the sender from 128 random bits and rendered as 32 lowercase
/// hex characters. Receivers treat it as an arbitrary string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(hex::encode(random_token()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransferId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Direction & State ─────────────────────────────────────────────────────────

/// Which side of the channel owns a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Why a transfer stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The channel closed or errored while the transfer was in flight.
    #[error("channel closed")]
    ChannelClosed,
    /// More bytes arrived than the meta message declared.
    #[error("received bytes exceed declared size")]
    SizeOverflow,
    /// The source ended before producing the declared number of bytes.
    #[error("source length does not match declared size")]
    SizeMismatch,
    /// Reading the local source failed.
    #[error("source read failed")]
    SourceRead,
    /// A chunk payload exceeded the maximum chunk size.
    #[error("chunk payload exceeds maximum size")]
    ChunkTooLarge,
    /// Too many bytes were staged while waiting for the meta message.
    #[error("staged chunks exceed limit while awaiting meta")]
    StagingOverflow,
    /// No chunk arrived within the configured stall timeout.
    #[error("transfer stalled")]
    Stalled,
    /// The local side cancelled the transfer.
    #[error("cancelled")]
    Cancelled,
}

/// Lifecycle state of a transfer record.
///
/// `AwaitingMeta` only occurs for incoming transfers whose chunks arrived
/// before their meta message. `Complete`, `Cancelled` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "cause", rename_all = "snake_case")]
pub enum TransferState {
    AwaitingMeta,
    Sending,
    Receiving,
    Complete,
    Cancelled,
    Failed(FailureCause),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingMeta => "awaiting_meta",
            Self::Sending => "sending",
            Self::Receiving => "receiving",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

//! Ferry wire format: the messages exchanged on a transfer channel.
//!
//! These types ARE the protocol. Each message is a JSON object with a
//! `kind` discriminator:
//!
//! ```text
//! { "kind": "meta",  "transferId": "...", "name": "...", "size": 123, "mimeType": "..." }
//! { "kind": "chunk", "transferId": "...", "payload": "<hex>" }
//! ```
//!
//! A transfer is one meta message followed by chunk messages whose payload
//! lengths sum to exactly `size`. There is no end-of-transfer message; the
//! receiver completes a transfer by counting bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::transfer::TransferId;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum chunk payload size in bytes.
/// Senders never exceed it; receivers may reject larger payloads.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024;

/// Mime type used when a source does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// ── Messages ──────────────────────────────────────────────────────────────────

/// Declares a transfer's existence, name, exact size and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub transfer_id: TransferId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// One fragment of a transfer's content, in send order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunk {
    pub transfer_id: TransferId,
    #[serde(with = "hex_bytes")]
    pub payload: Bytes,
}

/// A message on the transfer channel.
///
/// Kinds this version does not know decode to `Unknown` and are ignored by
/// the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    Meta(FileMeta),
    Chunk(FileChunk),
    #[serde(other)]
    Unknown,
}

impl Message {
    pub fn meta(
        transfer_id: TransferId,
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self::Meta(FileMeta {
            transfer_id,
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        })
    }

    pub fn chunk(transfer_id: TransferId, payload: Bytes) -> Self {
        Self::Chunk(FileChunk {
            transfer_id,
            payload,
        })
    }

    /// The transfer this message belongs to, if any.
    pub fn transfer_id(&self) -> Option<&TransferId> {
        match self {
            Self::Meta(m) => Some(&m.transfer_id),
            Self::Chunk(c) => Some(&c.transfer_id),
            Self::Unknown => None,
        }
    }

    /// Serialize to bytes for a byte-framed channel.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        if let Self::Chunk(c) = self {
            if c.payload.len() > MAX_CHUNK_SIZE {
                return Err(WireError::PayloadTooLarge(c.payload.len()));
            }
        }
        serde_json::to_vec(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    /// Deserialize from a received frame.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(data).map_err(|e| WireError::Decode(e.to_string()))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("payload length {0} exceeds maximum {}", MAX_CHUNK_SIZE)]
    PayloadTooLarge(usize),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

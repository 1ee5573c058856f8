//! ferry-core: wire format, transfer identity, configuration and hashing.
//! All other Ferry crates depend on this one.

pub mod config;
pub mod crypto;
pub mod transfer;
pub mod wire;

pub use transfer::{Direction, FailureCause, TransferId, TransferState};
pub use wire::{FileChunk, FileMeta, Message, DEFAULT_MIME_TYPE, MAX_CHUNK_SIZE};

//! ferry-services: chunked file transfer over an established message channel.
//!
//! Outgoing files are split into a meta message followed by ordered chunk
//! messages; incoming messages are demultiplexed by transfer id and
//! reassembled. Any number of transfers may share one channel in either
//! direction.

pub mod channel;
pub mod events;
pub mod reassembler;
pub mod registry;
pub mod sender;
pub mod session;
pub mod source;

pub use channel::{Channel, ChannelError, ChannelEvent, ChannelEvents, MemoryChannel};
pub use events::{Artifact, TransferEvent, TransferObserver};
pub use reassembler::Reassembler;
pub use registry::{RegistryError, TransferRecord, TransferRegistry};
pub use sender::{SendHandle, TransferError, TransferSender};
pub use session::TransferSession;
pub use source::TransferSource;

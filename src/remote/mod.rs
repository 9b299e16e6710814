//! Cross-partition stream traffic.
//!
//! Streams whose scratch address lies in another core's partition are
//! carried over an interconnect as LOAD, STORE and UPDATE messages.
//!
//! - [`message`]: header layouts and wire frames
//! - [`packet`]: payload fragmentation and the outbound queue
//! - [`pending`]: update tags and the pending-request table
//! - [`network`]: the interconnect collaborator
//! - [`protocol`]: per-core protocol state tying these together

pub mod message;
pub mod network;
pub mod packet;
pub mod pending;
pub mod protocol;

pub use message::{MessageKind, NetMessage, StoreTarget};
pub use network::{Interconnect, LoopbackNetwork};
pub use packet::{reassemble, split_payload, OutboundQueue};
pub use pending::{PendingTable, ScratchWrite, Tag, TagAllocator, UpdateOp};
pub use protocol::{PortDelivery, ProtocolStats, ReadRequest, ReadResponse, RemoteProtocol};

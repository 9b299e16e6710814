//! Stream descriptors.
//!
//! A stream is one long-running transfer between two resource kinds:
//! main memory, scratchpad, a vector port, or a constant generator. The
//! kinds form a closed set ([`StreamKind`]); controllers match on the
//! kind rather than dispatching through trait objects, and hold streams
//! by value in fixed slot tables.
//!
//! # Lifecycle
//!
//! ```text
//! command ──► queued ──► dispatched (ports claimed) ──► active ──► retired
//!                                                    (empty = true)
//! ```
//!
//! A stream is active while its remaining-work counter is nonzero. Once
//! inactive it may still wait for in-flight responses, then it is retired
//! from its slot and never selected again.

pub mod addressing;
pub mod barrier;
pub mod constant;
pub mod indirect;

use std::collections::VecDeque;
use std::fmt;

use smallvec::SmallVec;

use crate::device::dae_spec::REORDER_ENTRIES;
use crate::device::port::{Loc, PortDirection};
use crate::device::CoreId;

pub use addressing::{AccessPattern, LinearAccess, ScratchCursor};
pub use barrier::{Barrier, BarrierMask};
pub use constant::ConstPattern;
pub use indirect::{IndexWidth, IndirectAccess};

/// Engine-unique stream identifier, assigned in command order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to the host instruction that issued a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstRef(pub u64);

/// In-order delivery state for a stream reading another core's scratchpad.
///
/// Each LOAD request takes the next reorder entry; responses may come back
/// in any order and are released to the port strictly in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderBuffer {
    owner: CoreId,
    next_entry: u8,
    inflight: VecDeque<ReorderSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReorderSlot {
    entry: u8,
    len: usize,
    data: Option<Vec<u8>>,
}

impl ReorderBuffer {
    pub fn new(owner: CoreId) -> Self {
        Self {
            owner,
            next_entry: 0,
            inflight: VecDeque::with_capacity(REORDER_ENTRIES),
        }
    }

    /// Core owning the scratch range being read.
    #[inline]
    pub fn owner(&self) -> CoreId {
        self.owner
    }

    #[inline]
    pub fn can_issue(&self) -> bool {
        self.inflight.len() < REORDER_ENTRIES
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    /// Reserve the next reorder entry for a request of `len` bytes.
    pub fn issue(&mut self, len: usize) -> u8 {
        let entry = self.next_entry;
        self.next_entry = (self.next_entry + 1) % REORDER_ENTRIES as u8;
        self.inflight.push_back(ReorderSlot { entry, len, data: None });
        entry
    }

    /// Place a response. Returns false if no request is waiting on `entry`.
    pub fn fill(&mut self, entry: u8, mut data: Vec<u8>) -> bool {
        match self
            .inflight
            .iter_mut()
            .find(|slot| slot.entry == entry && slot.data.is_none())
        {
            Some(slot) => {
                data.truncate(slot.len);
                slot.data = Some(data);
                true
            }
            None => false,
        }
    }

    /// Release the oldest response if it has arrived.
    pub fn pop_ready(&mut self) -> Option<Vec<u8>> {
        if self.inflight.front()?.data.is_some() {
            self.inflight.pop_front().and_then(|slot| slot.data)
        } else {
            None
        }
    }
}

/// Source/destination pair and kind-specific state of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    /// Memory into an input port.
    MemToPort { access: LinearAccess, in_port: usize },
    /// Memory into the scratchpad, packed contiguously from `scratch_addr`.
    MemToScratch {
        access: LinearAccess,
        scratch_addr: u64,
        delivered: u64,
    },
    /// Fabric configuration words from memory.
    Config { access: LinearAccess },
    /// Scratchpad into an input port; `remote` is set for a foreign partition.
    ScratchToPort {
        access: LinearAccess,
        in_port: usize,
        remote: Option<ReorderBuffer>,
    },
    /// Scratchpad into memory, written contiguously from `mem_addr`.
    ScratchToMem { access: LinearAccess, mem_addr: u64 },
    /// Output port into memory.
    PortToMem { access: LinearAccess, out_port: usize },
    /// Output port into a contiguous scratch range.
    PortToScratch { cursor: ScratchCursor, out_port: usize },
    /// Output port into an input port.
    PortToPort {
        out_port: usize,
        in_port: usize,
        remaining: u64,
    },
    /// Constant generator into an input port.
    ConstToPort { pattern: ConstPattern, in_port: usize },
    /// Gather from memory into an input port.
    IndirectRead { access: IndirectAccess, in_port: usize },
    /// Scatter from an output port into memory.
    IndirectWrite { access: IndirectAccess, out_port: usize },
    /// Output port broadcast to an input port on every core in `core_mask`.
    RemoteMulticast {
        out_port: usize,
        remote_port: usize,
        core_mask: u64,
        remaining: u64,
    },
}

impl StreamKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::MemToPort { .. } => "mem->port",
            StreamKind::MemToScratch { .. } => "mem->scr",
            StreamKind::Config { .. } => "config",
            StreamKind::ScratchToPort { .. } => "scr->port",
            StreamKind::ScratchToMem { .. } => "scr->mem",
            StreamKind::PortToMem { .. } => "port->mem",
            StreamKind::PortToScratch { .. } => "port->scr",
            StreamKind::PortToPort { .. } => "port->port",
            StreamKind::ConstToPort { .. } => "const->port",
            StreamKind::IndirectRead { .. } => "ind-read",
            StreamKind::IndirectWrite { .. } => "ind-write",
            StreamKind::RemoteMulticast { .. } => "multicast",
        }
    }
}

/// Port a stream holds while dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortClaim {
    pub direction: PortDirection,
    pub port: usize,
    pub loc: Loc,
}

impl PortClaim {
    fn input(port: usize, loc: Loc) -> Self {
        Self { direction: PortDirection::Input, port, loc }
    }

    fn output(port: usize, loc: Loc) -> Self {
        Self { direction: PortDirection::Output, port, loc }
    }
}

/// One in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    id: StreamId,
    inst: InstRef,
    pub kind: StreamKind,
    /// Channel operations issued.
    pub requests: u64,
    /// Bytes moved so far.
    pub bytes: u64,
    /// Memory responses not yet delivered.
    pub inflight: u32,
    empty: bool,
}

impl Stream {
    pub fn new(id: StreamId, inst: InstRef, kind: StreamKind) -> Self {
        Self {
            id,
            inst,
            kind,
            requests: 0,
            bytes: 0,
            inflight: 0,
            empty: false,
        }
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Instruction that issued this stream.
    #[inline]
    pub fn inst(&self) -> InstRef {
        self.inst
    }

    /// True while work remains to be generated.
    pub fn active(&self) -> bool {
        if self.empty {
            return false;
        }
        match &self.kind {
            StreamKind::MemToPort { access, .. }
            | StreamKind::MemToScratch { access, .. }
            | StreamKind::Config { access }
            | StreamKind::ScratchToPort { access, .. }
            | StreamKind::ScratchToMem { access, .. }
            | StreamKind::PortToMem { access, .. } => access.active(),
            StreamKind::PortToScratch { cursor, .. } => cursor.active(),
            StreamKind::PortToPort { remaining, .. }
            | StreamKind::RemoteMulticast { remaining, .. } => *remaining != 0,
            StreamKind::ConstToPort { pattern, .. } => pattern.active(),
            StreamKind::IndirectRead { access, .. } | StreamKind::IndirectWrite { access, .. } => {
                access.active()
            }
        }
    }

    /// Set once the stream leaves its controller.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn mark_empty(&mut self) {
        self.empty = true;
    }

    /// Access shape for statistics.
    pub fn pattern(&self) -> AccessPattern {
        match &self.kind {
            StreamKind::MemToPort { access, .. }
            | StreamKind::MemToScratch { access, .. }
            | StreamKind::Config { access }
            | StreamKind::ScratchToPort { access, .. }
            | StreamKind::ScratchToMem { access, .. }
            | StreamKind::PortToMem { access, .. } => access.pattern(),
            StreamKind::PortToScratch { .. } => AccessPattern::PureContig,
            StreamKind::PortToPort { .. } | StreamKind::RemoteMulticast { .. } => {
                AccessPattern::Recurrence
            }
            StreamKind::ConstToPort { .. } => AccessPattern::Const,
            StreamKind::IndirectRead { .. } | StreamKind::IndirectWrite { .. } => {
                AccessPattern::Indirect
            }
        }
    }

    /// Ports this stream claims at dispatch, with the location it claims them for.
    ///
    /// Index ports of indirect streams are read without being claimed.
    pub fn claims(&self) -> SmallVec<[PortClaim; 2]> {
        let mut claims = SmallVec::new();
        match &self.kind {
            StreamKind::MemToPort { in_port, .. } | StreamKind::IndirectRead { in_port, .. } => {
                claims.push(PortClaim::input(*in_port, Loc::Memory));
            }
            StreamKind::ScratchToPort { in_port, .. } => {
                claims.push(PortClaim::input(*in_port, Loc::Scratch));
            }
            StreamKind::PortToMem { out_port, .. } | StreamKind::IndirectWrite { out_port, .. } => {
                claims.push(PortClaim::output(*out_port, Loc::Memory));
            }
            StreamKind::PortToScratch { out_port, .. } => {
                claims.push(PortClaim::output(*out_port, Loc::Scratch));
            }
            StreamKind::PortToPort { out_port, in_port, .. } => {
                claims.push(PortClaim::output(*out_port, Loc::Port));
                claims.push(PortClaim::input(*in_port, Loc::Port));
            }
            StreamKind::RemoteMulticast { out_port, .. } => {
                claims.push(PortClaim::output(*out_port, Loc::Port));
            }
            StreamKind::ConstToPort { in_port, .. } => {
                claims.push(PortClaim::input(*in_port, Loc::Const));
            }
            StreamKind::MemToScratch { .. } | StreamKind::Config { .. } | StreamKind::ScratchToMem { .. } => {}
        }
        claims
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.name(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_to_port(strides: u64) -> Stream {
        Stream::new(
            StreamId(1),
            InstRef(7),
            StreamKind::MemToPort {
                access: LinearAccess::new(0x1000, 64, 64, strides),
                in_port: 3,
            },
        )
    }

    #[test]
    fn test_active_iff_work_remains() {
        let mut stream = mem_to_port(1);
        assert!(stream.active());
        if let StreamKind::MemToPort { access, .. } = &mut stream.kind {
            access.next_chunk(64);
        }
        assert!(!stream.active());
        assert!(!mem_to_port(0).active());
    }

    #[test]
    fn test_empty_stream_never_active() {
        let mut stream = mem_to_port(4);
        stream.mark_empty();
        assert!(stream.is_empty());
        assert!(!stream.active());
    }

    #[test]
    fn test_claims_by_kind() {
        let stream = Stream::new(
            StreamId(2),
            InstRef::default(),
            StreamKind::PortToPort { out_port: 1, in_port: 4, remaining: 3 },
        );
        let claims = stream.claims();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0], PortClaim::output(1, Loc::Port));
        assert_eq!(claims[1], PortClaim::input(4, Loc::Port));
        assert_eq!(stream.pattern(), AccessPattern::Recurrence);

        let ind = Stream::new(
            StreamId(3),
            InstRef::default(),
            StreamKind::IndirectRead {
                access: IndirectAccess::new(9, IndexWidth::B8, 0, 4),
                in_port: 2,
            },
        );
        assert_eq!(ind.claims().as_slice(), &[PortClaim::input(2, Loc::Memory)]);
    }

    #[test]
    fn test_display() {
        assert_eq!(mem_to_port(1).to_string(), "mem->port #1");
    }

    #[test]
    fn test_reorder_releases_in_request_order() {
        let mut rob = ReorderBuffer::new(2);
        let a = rob.issue(4);
        let b = rob.issue(4);
        assert_ne!(a, b);

        assert!(rob.fill(b, vec![5, 6, 7, 8]));
        assert_eq!(rob.pop_ready(), None);
        assert!(rob.fill(a, vec![1, 2, 3, 4, 99]));
        assert_eq!(rob.pop_ready(), Some(vec![1, 2, 3, 4]));
        assert_eq!(rob.pop_ready(), Some(vec![5, 6, 7, 8]));
        assert!(rob.is_empty());
        assert!(!rob.fill(a, vec![0]));
    }

    #[test]
    fn test_reorder_entry_limit() {
        let mut rob = ReorderBuffer::new(1);
        for _ in 0..REORDER_ENTRIES {
            assert!(rob.can_issue());
            rob.issue(8);
        }
        assert!(!rob.can_issue());
    }
}

//! Stream ordering barriers.
//!
//! Streams normally dispatch as soon as their controller and ports allow,
//! so a scratch read issued after a scratch write may overtake it. A
//! barrier splits the command stream: a later stream sharing a mask bit
//! with the barrier waits until every earlier stream sharing that bit has
//! retired.

use std::fmt;

use super::{StreamId, StreamKind};

/// Resource classes a barrier can order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BarrierMask(pub u8);

impl BarrierMask {
    pub const NONE: BarrierMask = BarrierMask(0);
    /// Streams reading the scratchpad.
    pub const SCRATCH_READ: BarrierMask = BarrierMask(1 << 0);
    /// Streams writing the scratchpad, plus buffered and inbound scratch writes.
    pub const SCRATCH_WRITE: BarrierMask = BarrierMask(1 << 1);
    /// Streams touching main memory.
    pub const MEMORY: BarrierMask = BarrierMask(1 << 2);
    pub const ALL: BarrierMask = BarrierMask(0b111);

    /// Mask from raw bits. Unknown bits are dropped.
    pub fn from_bits(bits: u8) -> Self {
        BarrierMask(bits & Self::ALL.0)
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn intersects(self, other: BarrierMask) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn contains(self, other: BarrierMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Resources a stream of this kind touches.
    pub fn of(kind: &StreamKind) -> Self {
        match kind {
            StreamKind::MemToPort { .. }
            | StreamKind::Config { .. }
            | StreamKind::PortToMem { .. }
            | StreamKind::IndirectRead { .. }
            | StreamKind::IndirectWrite { .. } => Self::MEMORY,
            StreamKind::MemToScratch { .. } => Self::MEMORY | Self::SCRATCH_WRITE,
            StreamKind::ScratchToMem { .. } => Self::MEMORY | Self::SCRATCH_READ,
            StreamKind::ScratchToPort { .. } => Self::SCRATCH_READ,
            StreamKind::PortToScratch { .. } => Self::SCRATCH_WRITE,
            StreamKind::PortToPort { .. } | StreamKind::ConstToPort { .. } | StreamKind::RemoteMulticast { .. } => {
                Self::NONE
            }
        }
    }
}

impl std::ops::BitOr for BarrierMask {
    type Output = BarrierMask;

    fn bitor(self, rhs: BarrierMask) -> BarrierMask {
        BarrierMask(self.0 | rhs.0)
    }
}

impl fmt::Display for BarrierMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::SCRATCH_READ, "scr-rd"),
            (Self::SCRATCH_WRITE, "scr-wr"),
            (Self::MEMORY, "mem"),
        ]
        .iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, name)| *name)
        .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// A barrier waiting in the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub mask: BarrierMask,
    /// First stream id issued after the barrier.
    pub after: StreamId,
}

impl Barrier {
    pub fn new(mask: BarrierMask, after: StreamId) -> Self {
        Self { mask, after }
    }

    /// Whether a stream issued before the barrier must drain first.
    pub fn orders_before(&self, id: StreamId, mask: BarrierMask) -> bool {
        id < self.after && mask.intersects(self.mask)
    }

    /// Whether the barrier holds back a stream.
    pub fn holds(&self, id: StreamId, mask: BarrierMask) -> bool {
        id >= self.after && mask.intersects(self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{LinearAccess, ScratchCursor};

    #[test]
    fn test_mask_by_kind() {
        let load = StreamKind::MemToScratch {
            access: LinearAccess::new(0, 8, 8, 1),
            scratch_addr: 0,
            delivered: 0,
        };
        assert_eq!(BarrierMask::of(&load), BarrierMask::MEMORY | BarrierMask::SCRATCH_WRITE);

        let drain = StreamKind::PortToScratch {
            cursor: ScratchCursor::new(0, 8, 0),
            out_port: 0,
        };
        assert_eq!(BarrierMask::of(&drain), BarrierMask::SCRATCH_WRITE);

        let route = StreamKind::PortToPort { out_port: 0, in_port: 0, remaining: 1 };
        assert!(BarrierMask::of(&route).is_empty());
    }

    #[test]
    fn test_holds_only_later_matching_streams() {
        let barrier = Barrier::new(BarrierMask::SCRATCH_WRITE, StreamId(5));
        assert!(barrier.orders_before(StreamId(4), BarrierMask::SCRATCH_WRITE));
        assert!(!barrier.orders_before(StreamId(4), BarrierMask::SCRATCH_READ));
        assert!(barrier.holds(StreamId(5), BarrierMask::MEMORY | BarrierMask::SCRATCH_WRITE));
        assert!(!barrier.holds(StreamId(6), BarrierMask::MEMORY));
        assert!(!barrier.holds(StreamId(3), BarrierMask::SCRATCH_WRITE));
    }

    #[test]
    fn test_from_bits_and_display() {
        assert_eq!(BarrierMask::from_bits(0xff), BarrierMask::ALL);
        assert_eq!(BarrierMask::from_bits(0b011).to_string(), "scr-rd|scr-wr");
        assert_eq!(BarrierMask::NONE.to_string(), "none");
    }
}

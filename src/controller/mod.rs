//! Channel controllers.
//!
//! Every physical channel has one controller owning a fixed table of
//! stream slots. Once per cycle the engine steps them in a fixed order:
//!
//! ```text
//! memory ─► scratch read ─► scratch write ─► port
//! ```
//!
//! The bandwidth-limited controllers (memory, scratch read, scratch write)
//! perform at most one channel operation per step, picking the stream
//! through the [`StreamArbiter`]. The port controller moves data between
//! port FIFOs only and serves every ready stream each cycle.
//!
//! Slot indices double as stable stream handles inside a controller: the
//! scratch read controller uses them as the request slot of remote reads.

pub mod arbiter;
pub mod buffer;
pub mod memory;
pub mod port;
pub mod scratch;

use std::ops::Range;

use crate::device::{PortDirection, PortInterface, Scratchpad};
use crate::remote::RemoteProtocol;
use crate::stream::{Stream, StreamId, StreamKind};

pub use arbiter::{ArbiterPolicy, Channel, FixedPriority, RoundRobin, StreamArbiter};
pub use buffer::StagingBuffer;
pub use memory::MemoryController;
pub use port::PortController;
pub use scratch::{ScratchReadController, ScratchWriteController};

/// Engine state a controller may touch during its step.
pub struct ChannelContext<'a> {
    pub cycle: u64,
    pub inputs: &'a mut PortInterface,
    pub outputs: &'a mut PortInterface,
    pub scratchpad: &'a mut Scratchpad,
    /// Memory to scratchpad staging.
    pub write_buffer: &'a mut StagingBuffer,
    /// Scratchpad to memory staging.
    pub read_buffer: &'a mut StagingBuffer,
    pub remote: &'a mut RemoteProtocol,
    pub arbiter: &'a mut dyn StreamArbiter,
}

/// What one controller step did.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Operations issued on the controller's channel.
    pub channel_ops: u32,
    /// Bytes moved by those operations.
    pub bytes: u64,
    /// Any stream advanced or any data moved.
    pub progress: bool,
    /// Streams that left their slots this step.
    pub retired: Vec<Stream>,
    /// Configuration words, once a configuration load completes.
    pub config: Option<Vec<u8>>,
}

impl StepOutcome {
    fn op(&mut self, bytes: usize) {
        self.channel_ops += 1;
        self.bytes += bytes as u64;
        self.progress = true;
    }
}

/// Fixed stream slots grouped by stream kind.
#[derive(Debug, Clone)]
pub struct SlotTable {
    slots: Vec<Option<Stream>>,
    groups: Vec<(&'static str, Range<usize>)>,
}

impl SlotTable {
    /// Build a table from `(kind name, slot count)` pairs.
    pub fn new(groups: &[(&'static str, usize)]) -> Self {
        let mut start = 0;
        let groups: Vec<_> = groups
            .iter()
            .map(|&(name, count)| {
                let range = start..start + count;
                start += count;
                (name, range)
            })
            .collect();
        Self {
            slots: vec![None; start],
            groups,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slot holds a stream.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the table has slots for this kind at all.
    pub fn accepts(&self, kind: &StreamKind) -> bool {
        self.group(kind).is_some()
    }

    fn group(&self, kind: &StreamKind) -> Option<Range<usize>> {
        let name = kind.name();
        self.groups
            .iter()
            .find(|(group, _)| *group == name)
            .map(|(_, range)| range.clone())
    }

    /// First empty slot for this kind.
    pub fn free_slot(&self, kind: &StreamKind) -> Option<usize> {
        self.group(kind)?.find(|&i| self.slots[i].is_none())
    }

    /// Place a stream, handing it back when no slot of its kind is free.
    pub fn insert(&mut self, stream: Stream) -> Result<usize, Stream> {
        match self.free_slot(&stream.kind) {
            Some(i) => {
                self.slots[i] = Some(stream);
                Ok(i)
            }
            None => Err(stream),
        }
    }

    #[inline]
    pub fn get(&self, slot: usize) -> Option<&Stream> {
        self.slots.get(slot)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Stream> {
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn take(&mut self, slot: usize) -> Option<Stream> {
        self.slots.get_mut(slot)?.take()
    }

    /// Slot holding stream `id`.
    pub fn find(&self, id: StreamId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.id() == id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Stream)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    /// Remove every stream `done` says is finished, releasing its ports.
    pub(crate) fn retire_where<F>(
        &mut self,
        inputs: &mut PortInterface,
        outputs: &mut PortInterface,
        mut done: F,
    ) -> Vec<Stream>
    where
        F: FnMut(&Stream) -> bool,
    {
        let mut retired = Vec::new();
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(&mut done) {
                if let Some(mut stream) = slot.take() {
                    release_ports(&stream, inputs, outputs);
                    stream.mark_empty();
                    retired.push(stream);
                }
            }
        }
        retired
    }
}

/// Finish the claims a stream took at dispatch.
pub fn release_ports(stream: &Stream, inputs: &mut PortInterface, outputs: &mut PortInterface) {
    for claim in stream.claims() {
        let bank = match claim.direction {
            PortDirection::Input => &mut *inputs,
            PortDirection::Output => &mut *outputs,
        };
        if let Some(port) = bank.get_mut(claim.port) {
            port.finish_stream();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Loc, PortStatus};
    use crate::stream::{InstRef, LinearAccess};

    fn mem_to_port(id: u64, port: usize) -> Stream {
        Stream::new(
            StreamId(id),
            InstRef::default(),
            StreamKind::MemToPort {
                access: LinearAccess::new(0, 8, 8, 1),
                in_port: port,
            },
        )
    }

    #[test]
    fn test_slot_groups() {
        let mut table = SlotTable::new(&[("mem->port", 2), ("config", 1)]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.insert(mem_to_port(1, 0)), Ok(0));
        assert_eq!(table.insert(mem_to_port(2, 1)), Ok(1));
        assert!(table.insert(mem_to_port(3, 2)).is_err());
        assert_eq!(table.find(StreamId(2)), Some(1));
        assert_eq!(table.occupied(), 2);

        let scratch = StreamKind::ScratchToMem {
            access: LinearAccess::new(0, 8, 8, 1),
            mem_addr: 0,
        };
        assert!(!table.accepts(&scratch));
    }

    #[test]
    fn test_retire_releases_claims() {
        let mut inputs = PortInterface::new(PortDirection::Input, 2, 8);
        let mut outputs = PortInterface::new(PortDirection::Output, 2, 8);
        inputs.get_mut(1).unwrap().claim(Loc::Memory).unwrap();

        let mut table = SlotTable::new(&[("mem->port", 2)]);
        table.insert(mem_to_port(5, 1)).unwrap();
        let retired = table.retire_where(&mut inputs, &mut outputs, |s| s.id() == StreamId(5));

        assert_eq!(retired.len(), 1);
        assert!(retired[0].is_empty());
        assert!(table.is_empty());
        assert_eq!(inputs.get(1).unwrap().status(), PortStatus::Free);
    }
}

//! Scratchpad read and write channel controllers.
//!
//! The read channel serves scratch->port streams (local reads, or LOAD
//! requests when the range lies in another partition), the single
//! scratch->mem stream, and LOAD requests arriving from other cores.
//!
//! The write channel serves the single port->scr stream, drains the
//! memory-to-scratch write buffer, and applies writes arriving from other
//! cores (STORE payloads and UPDATE fan-out).
//!
//! Stream addresses are global; each access is translated to the owning
//! partition's local address when it is issued.

use crate::controller::{Channel, ChannelContext, SlotTable, StepOutcome};
use crate::device::dae_spec::{words_for, SCR_PORT_SLOTS, SCR_WIDTH};
use crate::device::port::unpack_words;
use crate::device::{CoreId, PartitionMap};
use crate::error::{EngineError, EngineResult};
use crate::remote::message::remote_read_len;
use crate::stream::{Stream, StreamKind};

/// Owner of `addr`, or an error for addresses past the last partition.
fn owner_of(partitions: &PartitionMap, addr: u64) -> EngineResult<CoreId> {
    partitions.owner(addr).ok_or(EngineError::InvalidAddress {
        addr,
        num_cores: partitions.num_cores(),
    })
}

/// Controller for the scratchpad read channel.
#[derive(Debug, Clone)]
pub struct ScratchReadController {
    slots: SlotTable,
    /// Remote LOAD requests served for other cores.
    served: u64,
}

impl Default for ScratchReadController {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchReadController {
    pub fn new() -> Self {
        Self {
            slots: SlotTable::new(&[("scr->port", SCR_PORT_SLOTS), ("scr->mem", 1)]),
            served: 0,
        }
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Remote reads served for other cores.
    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn accepts(&self, kind: &StreamKind) -> bool {
        self.slots.accepts(kind)
    }

    pub fn has_free_slot(&self, kind: &StreamKind) -> bool {
        self.slots.free_slot(kind).is_some()
    }

    pub fn dispatch(&mut self, stream: Stream) -> Result<usize, Stream> {
        log::debug!("SCR_RD stream {} dispatched", stream);
        self.slots.insert(stream)
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    fn is_ready(stream: &Stream, ctx: &ChannelContext<'_>) -> bool {
        match &stream.kind {
            StreamKind::ScratchToPort { access, in_port, remote } => {
                if !access.active() {
                    return false;
                }
                let len = match remote {
                    None => access.peek_len(SCR_WIDTH),
                    Some(rob) if rob.can_issue() => remote_read_len(access.remaining_in_access()),
                    Some(_) => return false,
                };
                ctx.inputs
                    .get(*in_port)
                    .is_some_and(|p| p.can_push(words_for(len)))
            }
            StreamKind::ScratchToMem { access, .. } => {
                access.active() && ctx.read_buffer.free_space() >= access.peek_len(SCR_WIDTH)
            }
            _ => false,
        }
    }

    /// Place arrived LOAD responses and release the in-order ones to their ports.
    fn collect_responses(&mut self, ctx: &mut ChannelContext<'_>) -> bool {
        let mut moved = false;
        while let Some(resp) = ctx.remote.pop_read_response() {
            let kind = self.slots.get_mut(resp.request_ptr as usize).map(|s| &mut s.kind);
            let placed = match kind {
                Some(StreamKind::ScratchToPort { remote: Some(rob), .. }) => rob.fill(resp.reorder, resp.data),
                _ => false,
            };
            if !placed {
                log::warn!(
                    "SCR_RD response for slot {} entry {} has no waiting request",
                    resp.request_ptr,
                    resp.reorder
                );
            }
        }

        for slot in 0..self.slots.len() {
            let Some(stream) = self.slots.get_mut(slot) else {
                continue;
            };
            if let StreamKind::ScratchToPort { in_port, remote: Some(rob), .. } = &mut stream.kind {
                while let Some(data) = rob.pop_ready() {
                    if let Some(port) = ctx.inputs.get_mut(*in_port) {
                        port.push_reserved_bytes(&data);
                    }
                    stream.inflight = stream.inflight.saturating_sub(1);
                    stream.bytes += data.len() as u64;
                    moved = true;
                }
            }
        }
        moved
    }

    /// Run one cycle.
    pub fn step(&mut self, ctx: &mut ChannelContext<'_>) -> EngineResult<StepOutcome> {
        let mut outcome = StepOutcome {
            progress: self.collect_responses(ctx),
            ..StepOutcome::default()
        };

        let service_slot = self.slots.len();
        let mut ready = vec![false; service_slot + 1];
        for (i, stream) in self.slots.iter() {
            ready[i] = Self::is_ready(stream, ctx);
        }
        ready[service_slot] = ctx.remote.has_read_requests();

        if let Some(slot) = ctx.arbiter.select(Channel::ScratchRead, &ready) {
            let bytes = if slot == service_slot {
                self.serve_remote(ctx)?
            } else {
                self.issue(slot, ctx)?
            };
            outcome.op(bytes);
        }

        let read_buffer_empty = ctx.read_buffer.is_empty();
        outcome.retired = self.slots.retire_where(ctx.inputs, ctx.outputs, |s| match &s.kind {
            StreamKind::ScratchToPort { access, remote, .. } => {
                !access.active() && remote.as_ref().map_or(true, |rob| rob.is_empty())
            }
            StreamKind::ScratchToMem { access, .. } => !access.active() && read_buffer_empty,
            _ => !s.active(),
        });
        for stream in &outcome.retired {
            log::debug!("SCR_RD stream {} retired, {} bytes", stream, stream.bytes);
            outcome.progress = true;
        }
        Ok(outcome)
    }

    fn serve_remote(&mut self, ctx: &mut ChannelContext<'_>) -> EngineResult<usize> {
        let Some(req) = ctx.remote.pop_read_request() else {
            return Ok(0);
        };
        let data = ctx.scratchpad.read_vec(req.addr, req.len);
        ctx.remote.send_read_response(&req, &data)?;
        self.served += 1;
        log::trace!(
            "SCR_RD served {} bytes at {:#x} for core{}",
            req.len,
            req.addr,
            req.requester
        );
        Ok(req.len)
    }

    fn issue(&mut self, slot: usize, ctx: &mut ChannelContext<'_>) -> EngineResult<usize> {
        let Some(stream) = self.slots.get_mut(slot) else {
            return Ok(0);
        };
        let partitions = *ctx.remote.partitions();

        let moved = match &mut stream.kind {
            StreamKind::ScratchToPort { access, in_port, remote: None } => {
                let Some((addr, len)) = access.next_chunk(SCR_WIDTH) else {
                    return Ok(0);
                };
                let data = ctx.scratchpad.read_vec(partitions.local(addr), len);
                if let Some(port) = ctx.inputs.get_mut(*in_port) {
                    port.push_bytes(&data);
                }
                stream.bytes += len as u64;
                len
            }
            StreamKind::ScratchToPort { access, in_port, remote: Some(rob) } => {
                let want = remote_read_len(access.remaining_in_access());
                let Some((addr, len)) = access.next_chunk(want) else {
                    return Ok(0);
                };
                let entry = rob.issue(len);
                if let Some(port) = ctx.inputs.get_mut(*in_port) {
                    port.reserve(words_for(len));
                }
                ctx.remote
                    .send_read_request(rob.owner(), partitions.local(addr), len, slot as u8, entry)?;
                stream.inflight += 1;
                len
            }
            StreamKind::ScratchToMem { access, .. } => {
                let Some((addr, len)) = access.next_chunk(SCR_WIDTH) else {
                    return Ok(0);
                };
                let data = ctx.scratchpad.read_vec(partitions.local(addr), len);
                ctx.read_buffer.push(&data);
                stream.bytes += len as u64;
                len
            }
            _ => 0,
        };
        stream.requests += 1;
        log::trace!("SCR_RD stream {} issued {} bytes", stream, moved);
        Ok(moved)
    }
}

/// Controller for the scratchpad write channel.
#[derive(Debug, Clone)]
pub struct ScratchWriteController {
    slots: SlotTable,
    /// Remote writes applied for other cores.
    applied: u64,
}

impl Default for ScratchWriteController {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchWriteController {
    pub fn new() -> Self {
        Self {
            slots: SlotTable::new(&[("port->scr", 1)]),
            applied: 0,
        }
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Remote writes applied to this partition.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn accepts(&self, kind: &StreamKind) -> bool {
        self.slots.accepts(kind)
    }

    pub fn has_free_slot(&self, kind: &StreamKind) -> bool {
        self.slots.free_slot(kind).is_some()
    }

    pub fn dispatch(&mut self, stream: Stream) -> Result<usize, Stream> {
        log::debug!("SCR_WR stream {} dispatched", stream);
        self.slots.insert(stream)
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    /// Write `data` at global `addr`, locally or through a STORE.
    fn write_global(ctx: &mut ChannelContext<'_>, addr: u64, data: &[u8]) -> EngineResult<()> {
        let partitions = *ctx.remote.partitions();
        let owner = owner_of(&partitions, addr)?;
        if owner == partitions.core() {
            ctx.scratchpad.write(partitions.local(addr), data);
        } else {
            ctx.remote.send_store(owner, partitions.local(addr), data)?;
        }
        Ok(())
    }

    /// Run one cycle.
    pub fn step(&mut self, ctx: &mut ChannelContext<'_>) -> EngineResult<StepOutcome> {
        let mut outcome = StepOutcome::default();
        let drain_slot = self.slots.len();
        let remote_slot = drain_slot + 1;

        let mut ready = vec![false; remote_slot + 1];
        for (i, stream) in self.slots.iter() {
            ready[i] = match &stream.kind {
                StreamKind::PortToScratch { cursor, out_port } => {
                    cursor.active() && ctx.outputs.get(*out_port).is_some_and(|p| !p.is_empty())
                }
                _ => false,
            };
        }
        ready[drain_slot] = !ctx.write_buffer.is_empty();
        ready[remote_slot] = ctx.remote.has_scratch_writes();

        if let Some(slot) = ctx.arbiter.select(Channel::ScratchWrite, &ready) {
            let bytes = if slot == drain_slot {
                match ctx.write_buffer.pop_chunk(SCR_WIDTH) {
                    Some((addr, data)) => {
                        Self::write_global(ctx, addr, &data)?;
                        data.len()
                    }
                    None => 0,
                }
            } else if slot == remote_slot {
                match ctx.remote.pop_scratch_write() {
                    Some(write) => {
                        self.applied += 1;
                        write.apply(ctx.scratchpad)
                    }
                    None => 0,
                }
            } else {
                self.issue(slot, ctx)?
            };
            outcome.op(bytes);
        }

        outcome.retired = self
            .slots
            .retire_where(ctx.inputs, ctx.outputs, |s| !s.active());
        for stream in &outcome.retired {
            log::debug!("SCR_WR stream {} retired, {} bytes", stream, stream.bytes);
            outcome.progress = true;
        }
        Ok(outcome)
    }

    fn issue(&mut self, slot: usize, ctx: &mut ChannelContext<'_>) -> EngineResult<usize> {
        let Some(stream) = self.slots.get_mut(slot) else {
            return Ok(0);
        };
        let StreamKind::PortToScratch { cursor, out_port } = &mut stream.kind else {
            return Ok(0);
        };

        let elem = cursor.element_bytes();
        let Some(port) = ctx.outputs.get_mut(*out_port) else {
            return Ok(0);
        };
        let chunk = cursor.remaining().min(SCR_WIDTH as u64) as usize;
        let words = port.pop_many(chunk.div_ceil(elem));
        let mut data = unpack_words(&words, cursor.shift_bytes());

        let Some((addr, len)) = cursor.next_chunk(data.len()) else {
            return Ok(0);
        };
        data.truncate(len);
        Self::write_global(ctx, addr, &data)?;

        stream.requests += 1;
        stream.bytes += len as u64;
        log::trace!("SCR_WR stream {} wrote {} bytes at {:#x}", stream, len, addr);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{RoundRobin, StagingBuffer};
    use crate::device::{PortDirection, PortInterface, Scratchpad};
    use crate::remote::{LoopbackNetwork, RemoteProtocol};
    use crate::stream::{InstRef, LinearAccess, ReorderBuffer, ScratchCursor, StreamId};

    const PART: u64 = 1024;

    struct Rig {
        inputs: PortInterface,
        outputs: PortInterface,
        scratchpad: Scratchpad,
        write_buffer: StagingBuffer,
        read_buffer: StagingBuffer,
        remote: RemoteProtocol,
        arbiter: RoundRobin,
    }

    impl Rig {
        fn new(core: CoreId) -> Self {
            Self {
                inputs: PortInterface::new(PortDirection::Input, 4, 64),
                outputs: PortInterface::new(PortDirection::Output, 4, 64),
                scratchpad: Scratchpad::new(PART as usize),
                write_buffer: StagingBuffer::new(128),
                read_buffer: StagingBuffer::new(128),
                remote: RemoteProtocol::new(PartitionMap::new(core, 2, PART)),
                arbiter: RoundRobin::new(),
            }
        }

        fn ctx(&mut self, cycle: u64) -> ChannelContext<'_> {
            ChannelContext {
                cycle,
                inputs: &mut self.inputs,
                outputs: &mut self.outputs,
                scratchpad: &mut self.scratchpad,
                write_buffer: &mut self.write_buffer,
                read_buffer: &mut self.read_buffer,
                remote: &mut self.remote,
                arbiter: &mut self.arbiter,
            }
        }
    }

    fn stream(id: u64, kind: StreamKind) -> Stream {
        Stream::new(StreamId(id), InstRef::default(), kind)
    }

    #[test]
    fn test_local_scratch_to_port() {
        let mut rig = Rig::new(0);
        rig.scratchpad.load_words(0x40, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let mut ctrl = ScratchReadController::new();
        ctrl.dispatch(stream(
            1,
            StreamKind::ScratchToPort {
                access: LinearAccess::new(0x40, 80, 80, 1),
                in_port: 2,
                remote: None,
            },
        ))
        .unwrap();

        assert_eq!(ctrl.step(&mut rig.ctx(1)).unwrap().bytes, 64);
        let out = ctrl.step(&mut rig.ctx(2)).unwrap();
        assert_eq!(out.bytes, 16);
        assert_eq!(out.retired.len(), 1);
        let words: Vec<u64> = rig.inputs.get(2).unwrap().words().collect();
        assert_eq!(words, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_scratch_to_mem_holds_until_drained() {
        let mut rig = Rig::new(0);
        let mut ctrl = ScratchReadController::new();
        rig.read_buffer.start(StreamId(1), 0x9000);
        ctrl.dispatch(stream(
            1,
            StreamKind::ScratchToMem {
                access: LinearAccess::new(0, 32, 32, 1),
                mem_addr: 0x9000,
            },
        ))
        .unwrap();
        let out = ctrl.step(&mut rig.ctx(1)).unwrap();
        assert_eq!(out.channel_ops, 1);
        assert!(out.retired.is_empty());
        assert_eq!(rig.read_buffer.len(), 32);

        rig.read_buffer.pop_chunk(64);
        assert_eq!(ctrl.step(&mut rig.ctx(2)).unwrap().retired.len(), 1);
    }

    #[test]
    fn test_remote_read_round_trip() {
        let mut net = LoopbackNetwork::new(2);
        let mut near = Rig::new(0);
        let mut far = Rig::new(1);
        far.scratchpad.load_words(0x10, &[11, 22, 33]);

        let mut reader = ScratchReadController::new();
        let mut server = ScratchReadController::new();
        reader
            .dispatch(stream(
                1,
                StreamKind::ScratchToPort {
                    access: LinearAccess::new(PART + 0x10, 24, 24, 1),
                    in_port: 0,
                    remote: Some(ReorderBuffer::new(1)),
                },
            ))
            .unwrap();

        // 24 bytes is one banked request.
        let out = reader.step(&mut near.ctx(1)).unwrap();
        assert_eq!(out.channel_ops, 1);
        assert_eq!(near.inputs.get(0).unwrap().reserved(), 3);
        assert!(near.remote.dispatch(&mut net));

        far.remote.poll(&mut net).unwrap();
        assert_eq!(server.step(&mut far.ctx(1)).unwrap().channel_ops, 1);
        assert_eq!(server.served(), 1);
        assert!(far.remote.dispatch(&mut net));

        near.remote.poll(&mut net).unwrap();
        let out = reader.step(&mut near.ctx(2)).unwrap();
        assert_eq!(out.retired.len(), 1);
        let words: Vec<u64> = near.inputs.get(0).unwrap().words().collect();
        assert_eq!(words, vec![11, 22, 33]);
    }

    #[test]
    fn test_port_to_scratch_with_shift() {
        let mut rig = Rig::new(0);
        let out = rig.outputs.get_mut(1).unwrap();
        out.push(0xAAAA_AAAA_0000_0000);
        out.push(0xBBBB_BBBB_0000_0000);
        let mut ctrl = ScratchWriteController::new();
        ctrl.dispatch(stream(
            1,
            StreamKind::PortToScratch {
                cursor: ScratchCursor::new(0x20, 8, 4),
                out_port: 1,
            },
        ))
        .unwrap();
        let out = ctrl.step(&mut rig.ctx(1)).unwrap();
        assert_eq!(out.retired.len(), 1);
        assert_eq!(rig.scratchpad.peek(0x20, 8), vec![0xAA, 0xAA, 0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB]);
    }

    #[test]
    fn test_foreign_write_buffer_becomes_store() {
        let mut rig = Rig::new(0);
        rig.write_buffer.start(StreamId(3), PART + 0x100);
        rig.write_buffer.push(&[5; 16]);
        let mut ctrl = ScratchWriteController::new();
        ctrl.step(&mut rig.ctx(1)).unwrap();
        assert_eq!(rig.remote.outbound().len(), 1);
        assert_eq!(rig.scratchpad.traffic(), (0, 0));
    }

    #[test]
    fn test_applies_remote_writes() {
        let mut rig = Rig::new(1);
        let mut sender = RemoteProtocol::new(PartitionMap::new(0, 2, PART));
        let mut net = LoopbackNetwork::new(2);
        sender.send_store(1, 0x8, &[1, 2, 3]).unwrap();
        sender.dispatch(&mut net);
        rig.remote.poll(&mut net).unwrap();

        let mut ctrl = ScratchWriteController::new();
        assert_eq!(ctrl.step(&mut rig.ctx(1)).unwrap().bytes, 3);
        assert_eq!(ctrl.applied(), 1);
        assert_eq!(rig.scratchpad.peek(0x8, 3), vec![1, 2, 3]);
    }
}

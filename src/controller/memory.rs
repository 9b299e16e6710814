//! Memory channel controller.
//!
//! Issues at most one memory operation per cycle, chosen among:
//!
//! | Slots | Stream          | Operation                             |
//! |-------|-----------------|---------------------------------------|
//! | 10    | mem->port       | load into an input port               |
//! | 1     | mem->scr        | load into the scratch write buffer    |
//! | 1     | config          | load configuration words              |
//! | 4     | ind-read        | gather one element into an input port |
//! | 4     | port->mem       | store output port words               |
//! | 4     | ind-write       | scatter one output port word          |
//! | 1     | read buffer     | store scratch->mem data               |
//!
//! Loads reserve their destination space at issue so a response always
//! fits. Responses are drained at the end of the step and delivered to
//! the stream that issued them.

use crate::controller::{Channel, ChannelContext, SlotTable, StepOutcome};
use crate::device::dae_spec::{
    words_for, DATA_WIDTH, INDIRECT_READ_SLOTS, INDIRECT_WRITE_SLOTS, MEM_PORT_SLOTS, MEM_WIDTH,
    PORT_MEM_SLOTS,
};
use crate::device::port::unpack_words;
use crate::device::{MemResponse, MemoryInterface, PortInterface};
use crate::error::EngineResult;
use crate::stream::{Stream, StreamId, StreamKind};

use super::StagingBuffer;

/// Controller for the memory channel.
#[derive(Debug, Clone)]
pub struct MemoryController {
    slots: SlotTable,
    /// Configuration bytes gathered so far.
    config: Vec<u8>,
    requests: u64,
}

impl Default for MemoryController {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryController {
    pub fn new() -> Self {
        Self {
            slots: SlotTable::new(&[
                ("mem->port", MEM_PORT_SLOTS),
                ("mem->scr", 1),
                ("config", 1),
                ("ind-read", INDIRECT_READ_SLOTS),
                ("port->mem", PORT_MEM_SLOTS),
                ("ind-write", INDIRECT_WRITE_SLOTS),
            ]),
            config: Vec::new(),
            requests: 0,
        }
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Memory operations issued so far.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn accepts(&self, kind: &StreamKind) -> bool {
        self.slots.accepts(kind)
    }

    pub fn has_free_slot(&self, kind: &StreamKind) -> bool {
        self.slots.free_slot(kind).is_some()
    }

    /// Take over a dispatched stream. Gives it back if no slot is free.
    pub fn dispatch(&mut self, stream: Stream) -> Result<usize, Stream> {
        log::debug!("MEM stream {} dispatched", stream);
        self.slots.insert(stream)
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether a stream can issue this cycle.
    fn is_ready(stream: &Stream, ctx: &ChannelContext<'_>) -> bool {
        match &stream.kind {
            StreamKind::MemToPort { access, in_port } => {
                access.active()
                    && ctx
                        .inputs
                        .get(*in_port)
                        .is_some_and(|p| p.can_push(words_for(access.peek_len(MEM_WIDTH))))
            }
            StreamKind::MemToScratch { access, .. } => {
                access.active() && ctx.write_buffer.free_space() >= access.peek_len(MEM_WIDTH)
            }
            StreamKind::Config { access } => access.active(),
            StreamKind::IndirectRead { access, in_port } => {
                access.active()
                    && index_word(ctx.inputs, access.ind_port()).is_some()
                    && ctx.inputs.get(*in_port).is_some_and(|p| p.can_push(1))
            }
            StreamKind::PortToMem { access, out_port } => {
                let needed = access.peek_len(MEM_WIDTH).div_ceil(access.element_bytes());
                access.active() && ctx.outputs.get(*out_port).is_some_and(|p| p.len() >= needed)
            }
            StreamKind::IndirectWrite { access, out_port } => {
                access.active()
                    && index_word(ctx.inputs, access.ind_port()).is_some()
                    && ctx.outputs.get(*out_port).is_some_and(|p| !p.is_empty())
            }
            _ => false,
        }
    }

    /// Run one cycle.
    pub fn step(&mut self, ctx: &mut ChannelContext<'_>, mem: &mut dyn MemoryInterface) -> EngineResult<StepOutcome> {
        let mut outcome = StepOutcome::default();
        let drain_slot = self.slots.len();

        let mut ready = vec![false; drain_slot + 1];
        for (i, stream) in self.slots.iter() {
            ready[i] = Self::is_ready(stream, ctx);
        }
        ready[drain_slot] = !ctx.read_buffer.is_empty();

        if let Some(slot) = ctx.arbiter.select(Channel::Memory, &ready) {
            let bytes = if slot == drain_slot {
                Self::drain_read_buffer(ctx.read_buffer, mem, ctx.cycle)
            } else {
                self.issue(slot, ctx, mem)
            };
            self.requests += 1;
            outcome.op(bytes);
        }

        while let Some(resp) = mem.poll_response(ctx.cycle) {
            self.deliver(resp, ctx);
            outcome.progress = true;
        }

        outcome.retired = self
            .slots
            .retire_where(ctx.inputs, ctx.outputs, |s| !s.active() && s.inflight == 0);
        if outcome
            .retired
            .iter()
            .any(|s| matches!(s.kind, StreamKind::Config { .. }))
        {
            outcome.config = Some(std::mem::take(&mut self.config));
        }
        for stream in &outcome.retired {
            log::debug!(
                "MEM stream {} retired after {} requests, {} bytes",
                stream,
                stream.requests,
                stream.bytes
            );
        }
        if !outcome.retired.is_empty() {
            outcome.progress = true;
        }
        Ok(outcome)
    }

    fn drain_read_buffer(buffer: &mut StagingBuffer, mem: &mut dyn MemoryInterface, cycle: u64) -> usize {
        let owner = buffer.owner().unwrap_or(StreamId(0));
        match buffer.pop_chunk(MEM_WIDTH) {
            Some((addr, data)) => {
                log::trace!("MEM drain {} bytes to {:#x} for stream {}", data.len(), addr, owner);
                mem.store(owner, addr, &data, cycle);
                data.len()
            }
            None => 0,
        }
    }

    /// Issue one operation for the stream in `slot`. Returns bytes moved.
    fn issue(&mut self, slot: usize, ctx: &mut ChannelContext<'_>, mem: &mut dyn MemoryInterface) -> usize {
        let cycle = ctx.cycle;
        let Some(stream) = self.slots.get_mut(slot) else {
            return 0;
        };
        let id = stream.id();

        let moved = match &mut stream.kind {
            StreamKind::MemToPort { access, in_port } => {
                let len = access.peek_len(MEM_WIDTH);
                if let Some(port) = ctx.inputs.get_mut(*in_port) {
                    port.reserve(words_for(len));
                }
                let Some((addr, len)) = access.next_chunk(MEM_WIDTH) else {
                    return 0;
                };
                mem.load(id, addr, len, cycle);
                stream.inflight += 1;
                len
            }
            StreamKind::MemToScratch { access, .. } => {
                let len = access.peek_len(MEM_WIDTH);
                ctx.write_buffer.reserve(len);
                let Some((addr, len)) = access.next_chunk(MEM_WIDTH) else {
                    return 0;
                };
                mem.load(id, addr, len, cycle);
                stream.inflight += 1;
                len
            }
            StreamKind::Config { access } => {
                let Some((addr, len)) = access.next_chunk(MEM_WIDTH) else {
                    return 0;
                };
                mem.load(id, addr, len, cycle);
                stream.inflight += 1;
                len
            }
            StreamKind::IndirectRead { access, in_port } => {
                let Some(word) = index_word(ctx.inputs, access.ind_port()) else {
                    return 0;
                };
                let addr = access.element_addr(word);
                if access.pop_elem() {
                    if let Some(port) = ctx.inputs.get_mut(access.ind_port()) {
                        port.pop();
                    }
                }
                if let Some(port) = ctx.inputs.get_mut(*in_port) {
                    port.reserve(1);
                }
                mem.load(id, addr, DATA_WIDTH, cycle);
                stream.inflight += 1;
                DATA_WIDTH
            }
            StreamKind::PortToMem { access, out_port } => {
                let elem = access.element_bytes();
                let shift = access.shift_bytes();
                let Some((addr, len)) = access.next_chunk(MEM_WIDTH) else {
                    return 0;
                };
                let words = match ctx.outputs.get_mut(*out_port) {
                    Some(port) => port.pop_many(len.div_ceil(elem)),
                    None => return 0,
                };
                let mut data = unpack_words(&words, shift);
                data.truncate(len);
                mem.store(id, addr, &data, cycle);
                stream.bytes += data.len() as u64;
                data.len()
            }
            StreamKind::IndirectWrite { access, out_port } => {
                let Some(word) = index_word(ctx.inputs, access.ind_port()) else {
                    return 0;
                };
                let addr = access.element_addr(word);
                let Some(value) = ctx.outputs.get_mut(*out_port).and_then(|p| p.pop()) else {
                    return 0;
                };
                if access.pop_elem() {
                    if let Some(port) = ctx.inputs.get_mut(access.ind_port()) {
                        port.pop();
                    }
                }
                mem.store(id, addr, &value.to_le_bytes(), cycle);
                stream.bytes += DATA_WIDTH as u64;
                DATA_WIDTH
            }
            _ => 0,
        };
        stream.requests += 1;
        log::trace!("MEM stream {} issued {} bytes", stream, moved);
        moved
    }

    /// Hand a load response to the stream that asked for it.
    fn deliver(&mut self, resp: MemResponse, ctx: &mut ChannelContext<'_>) {
        let Some(stream) = self.slots.find(resp.stream).and_then(|i| self.slots.get_mut(i)) else {
            log::warn!("MEM response for unknown stream {} dropped", resp.stream);
            return;
        };
        let len = resp.data.len();
        match &mut stream.kind {
            StreamKind::MemToPort { in_port: port, .. } | StreamKind::IndirectRead { in_port: port, .. } => {
                if let Some(port) = ctx.inputs.get_mut(*port) {
                    port.push_reserved_bytes(&resp.data);
                }
            }
            StreamKind::MemToScratch { delivered, .. } => {
                ctx.write_buffer.push_reserved(&resp.data);
                *delivered += len as u64;
            }
            StreamKind::Config { .. } => self.config.extend_from_slice(&resp.data),
            _ => {
                log::warn!("MEM stream {} got a load response it did not ask for", stream);
                return;
            }
        }
        stream.inflight = stream.inflight.saturating_sub(1);
        stream.bytes += len as u64;
    }
}

/// Front word of an index port, if one is waiting.
fn index_word(inputs: &PortInterface, port: usize) -> Option<u64> {
    inputs.get(port)?.peek()
}

//! Port-to-port controller.
//!
//! Moves data between port FIFOs only, so no channel bandwidth applies:
//! every ready stream is served each cycle, in arbiter order, limited only
//! by FIFO space. Also delivers port STOREs that arrived from other cores.

use crate::controller::{Channel, ChannelContext, SlotTable, StepOutcome};
use crate::device::dae_spec::{words_for, CONST_PORT_SLOTS, DATA_WIDTH, MULTICAST_SLOTS, PORT_PORT_SLOTS, PORT_WIDTH};
use crate::device::port::unpack_words;
use crate::device::CoreId;
use crate::error::EngineResult;
use crate::stream::{Stream, StreamKind};

/// Words a multicast stream sends per message.
const MULTICAST_WORDS: usize = PORT_WIDTH / DATA_WIDTH;

/// Cores selected by a multicast mask.
fn mask_cores(mask: u64, num_cores: usize) -> Vec<CoreId> {
    (0..num_cores.min(64))
        .filter(|&c| mask & (1 << c) != 0)
        .map(|c| c as CoreId)
        .collect()
}

/// Controller for port-to-port, constant and multicast streams.
#[derive(Debug, Clone)]
pub struct PortController {
    slots: SlotTable,
    /// Words moved into input ports.
    words_moved: u64,
}

impl Default for PortController {
    fn default() -> Self {
        Self::new()
    }
}

impl PortController {
    pub fn new() -> Self {
        Self {
            slots: SlotTable::new(&[
                ("port->port", PORT_PORT_SLOTS),
                ("const->port", CONST_PORT_SLOTS),
                ("multicast", MULTICAST_SLOTS),
            ]),
            words_moved: 0,
        }
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Words moved so far.
    pub fn words_moved(&self) -> u64 {
        self.words_moved
    }

    pub fn accepts(&self, kind: &StreamKind) -> bool {
        self.slots.accepts(kind)
    }

    pub fn has_free_slot(&self, kind: &StreamKind) -> bool {
        self.slots.free_slot(kind).is_some()
    }

    pub fn dispatch(&mut self, stream: Stream) -> Result<usize, Stream> {
        log::debug!("PORT stream {} dispatched", stream);
        self.slots.insert(stream)
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    fn is_ready(stream: &Stream, ctx: &ChannelContext<'_>) -> bool {
        let out_has_data = |port: usize| ctx.outputs.get(port).is_some_and(|p| !p.is_empty());
        let in_has_space = |port: usize| ctx.inputs.get(port).is_some_and(|p| p.free_space() > 0);
        match &stream.kind {
            StreamKind::PortToPort { out_port, in_port, remaining } => {
                *remaining != 0 && out_has_data(*out_port) && in_has_space(*in_port)
            }
            StreamKind::ConstToPort { pattern, in_port } => pattern.active() && in_has_space(*in_port),
            StreamKind::RemoteMulticast { out_port, remaining, .. } => *remaining != 0 && out_has_data(*out_port),
            _ => false,
        }
    }

    /// Run one cycle.
    ///
    /// Reports no channel operations; `bytes` counts the data moved.
    pub fn step(&mut self, ctx: &mut ChannelContext<'_>) -> EngineResult<StepOutcome> {
        let mut outcome = StepOutcome::default();
        let inbound_slot = self.slots.len();

        let mut ready = vec![false; inbound_slot + 1];
        for (i, stream) in self.slots.iter() {
            ready[i] = Self::is_ready(stream, ctx);
        }
        ready[inbound_slot] = ctx.remote.peek_port_delivery().is_some_and(|d| {
            ctx.inputs
                .get(d.port)
                .map_or(true, |p| p.can_push(words_for(d.data.len())))
        });

        let order = ctx.arbiter.order(Channel::Port, &ready);
        if let Some(&first) = order.first() {
            ctx.arbiter.grant(Channel::Port, first);
        }
        for slot in order {
            let words = if slot == inbound_slot {
                self.deliver_inbound(ctx)
            } else {
                self.serve(slot, ctx)?
            };
            if words > 0 {
                self.words_moved += words as u64;
                outcome.bytes += (words * DATA_WIDTH) as u64;
                outcome.progress = true;
            }
        }

        outcome.retired = self
            .slots
            .retire_where(ctx.inputs, ctx.outputs, |s| !s.active());
        for stream in &outcome.retired {
            log::debug!("PORT stream {} retired after {} requests", stream, stream.requests);
            outcome.progress = true;
        }
        Ok(outcome)
    }

    /// Push one remote port delivery into its input port. A delivery that
    /// no longer fits stays queued for a later cycle.
    fn deliver_inbound(&mut self, ctx: &mut ChannelContext<'_>) -> usize {
        let Some(delivery) = ctx.remote.peek_port_delivery() else {
            return 0;
        };
        let port_id = delivery.port;
        let fits = match ctx.inputs.get(port_id) {
            Some(port) => port.can_push(words_for(delivery.data.len())),
            None => true,
        };
        if !fits {
            log::trace!("PORT delivery to input port {} waits for space", port_id);
            return 0;
        }
        let Some(delivery) = ctx.remote.pop_port_delivery() else {
            return 0;
        };
        match ctx.inputs.get_mut(port_id) {
            Some(port) => port.push_bytes(&delivery.data),
            None => {
                log::warn!("PORT delivery for missing input port {} dropped", port_id);
                0
            }
        }
    }

    /// Serve one stream. Returns the words moved.
    fn serve(&mut self, slot: usize, ctx: &mut ChannelContext<'_>) -> EngineResult<usize> {
        let Some(stream) = self.slots.get_mut(slot) else {
            return Ok(0);
        };
        let moved = match &mut stream.kind {
            StreamKind::PortToPort { out_port, in_port, remaining } => {
                let Some(word) = ctx.outputs.get(*out_port).and_then(|p| p.peek()) else {
                    return Ok(0);
                };
                let pushed = ctx.inputs.get_mut(*in_port).is_some_and(|p| p.push(word));
                if pushed {
                    if let Some(out) = ctx.outputs.get_mut(*out_port) {
                        out.pop();
                    }
                    *remaining -= 1;
                    1
                } else {
                    0
                }
            }
            StreamKind::ConstToPort { pattern, in_port } => {
                let Some(port) = ctx.inputs.get_mut(*in_port) else {
                    return Ok(0);
                };
                let mut pushed = 0;
                while pushed < MULTICAST_WORDS && port.free_space() > 0 {
                    let Some(value) = pattern.pop_item() else {
                        break;
                    };
                    port.push(value);
                    pushed += 1;
                }
                pushed
            }
            StreamKind::RemoteMulticast { out_port, remote_port, core_mask, remaining } => {
                let take = (*remaining).min(MULTICAST_WORDS as u64) as usize;
                let words = match ctx.outputs.get_mut(*out_port) {
                    Some(port) => port.pop_many(take),
                    None => return Ok(0),
                };
                let dests = mask_cores(*core_mask, ctx.remote.partitions().num_cores());
                if !dests.is_empty() {
                    ctx.remote
                        .send_port_store(&dests, *remote_port, &unpack_words(&words, 0))?;
                }
                *remaining -= words.len() as u64;
                words.len()
            }
            _ => 0,
        };
        if moved > 0 {
            stream.requests += 1;
            stream.bytes += (moved * DATA_WIDTH) as u64;
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{RoundRobin, StagingBuffer};
    use crate::device::{PartitionMap, PortDirection, PortInterface, Scratchpad};
    use crate::remote::{LoopbackNetwork, MessageKind, RemoteProtocol};
    use crate::stream::{ConstPattern, InstRef, StreamId};

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
                inputs: PortInterface::new(PortDirection::Input, 4, 16),
                outputs: PortInterface::new(PortDirection::Output, 4, 16),
                scratchpad: Scratchpad::new(64),
                write_buffer: StagingBuffer::new(128),
                read_buffer: StagingBuffer::new(128),
                remote: RemoteProtocol::new(PartitionMap::new(core, 4, 64)),
                arbiter: RoundRobin::new(),
            }
        }

        fn step(&mut self, ctrl: &mut PortController) -> StepOutcome {
            let mut ctx = ChannelContext {
                cycle: 0,
                inputs: &mut self.inputs,
                outputs: &mut self.outputs,
                scratchpad: &mut self.scratchpad,
                write_buffer: &mut self.write_buffer,
                read_buffer: &mut self.read_buffer,
                remote: &mut self.remote,
                arbiter: &mut self.arbiter,
            };
            ctrl.step(&mut ctx).unwrap()
        }
    }

    fn stream(id: u64, kind: StreamKind) -> Stream {
        Stream::new(StreamId(id), InstRef::default(), kind)
    }

    #[test]
    fn test_constant_sequence() {
        let mut rig = Rig::new(0);
        let mut ctrl = PortController::new();
        ctrl.dispatch(stream(
            1,
            StreamKind::ConstToPort {
                pattern: ConstPattern::new(7, 2, 9, 1, 2),
                in_port: 1,
            },
        ))
        .unwrap();
        let out = rig.step(&mut ctrl);
        assert_eq!(out.channel_ops, 0);
        assert_eq!(out.retired.len(), 1);
        let words: Vec<u64> = rig.inputs.get(1).unwrap().words().collect();
        assert_eq!(words, vec![7, 7, 9, 7, 7, 9]);
    }

    #[test]
    fn test_constant_respects_fifo_space() {
        let mut rig = Rig::new(0);
        let mut ctrl = PortController::new();
        ctrl.dispatch(stream(
            1,
            StreamKind::ConstToPort {
                pattern: ConstPattern::new(1, 20, 0, 0, 1),
                in_port: 0,
            },
        ))
        .unwrap();
        assert_eq!(rig.step(&mut ctrl).bytes, 64);
        assert_eq!(rig.step(&mut ctrl).bytes, 64);
        // 16-word FIFO is full now.
        assert_eq!(rig.step(&mut ctrl).bytes, 0);
        rig.inputs.get_mut(0).unwrap().pop_many(4);
        let out = rig.step(&mut ctrl);
        assert_eq!(out.bytes, 32);
        assert_eq!(out.retired.len(), 1);
    }

    #[test]
    fn test_port_to_port_one_word_per_cycle() {
        let mut rig = Rig::new(0);
        for w in [10, 20, 30] {
            rig.outputs.get_mut(2).unwrap().push(w);
        }
        let mut ctrl = PortController::new();
        ctrl.dispatch(stream(
            1,
            StreamKind::PortToPort { out_port: 2, in_port: 3, remaining: 2 },
        ))
        .unwrap();
        rig.step(&mut ctrl);
        assert_eq!(rig.inputs.get(3).unwrap().len(), 1);
        let out = rig.step(&mut ctrl);
        assert_eq!(out.retired.len(), 1);
        assert_eq!(rig.inputs.get(3).unwrap().words().collect::<Vec<_>>(), vec![10, 20]);
        assert_eq!(rig.outputs.get(2).unwrap().len(), 1);
    }

    #[test]
    fn test_multicast_to_mask() {
        let mut rig = Rig::new(0);
        for w in 0..10 {
            rig.outputs.get_mut(0).unwrap().push(w);
        }
        let mut ctrl = PortController::new();
        ctrl.dispatch(stream(
            1,
            StreamKind::RemoteMulticast {
                out_port: 0,
                remote_port: 2,
                core_mask: 0b1011,
                remaining: 10,
            },
        ))
        .unwrap();
        rig.step(&mut ctrl);
        let out = rig.step(&mut ctrl);
        assert_eq!(out.retired.len(), 1);

        // Own copy arrives through the inbound delivery queue.
        rig.step(&mut ctrl);
        rig.step(&mut ctrl);
        assert_eq!(rig.inputs.get(2).unwrap().words().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());

        let mut net = LoopbackNetwork::new(4);
        while rig.remote.dispatch(&mut net) {}
        assert_eq!(net.delivered(1, MessageKind::Store), 2);
        assert_eq!(net.delivered(3, MessageKind::Store), 2);
        assert_eq!(net.delivered_total(2), 0);
    }

    #[test]
    fn test_inbound_delivery_waits_for_space() {
        let mut rig = Rig::new(0);
        for w in 100..106 {
            rig.inputs.get_mut(0).unwrap().push(w);
        }
        let mut ctrl = PortController::new();
        ctrl.dispatch(stream(
            1,
            StreamKind::ConstToPort {
                pattern: ConstPattern::new(1, 20, 0, 0, 1),
                in_port: 0,
            },
        ))
        .unwrap();
        let incoming: Vec<u64> = (200..208).collect();
        rig.remote.send_port_store(&[0], 0, &unpack_words(&incoming, 0)).unwrap();

        // The constant stream takes the space first; the delivery must not
        // be split or dropped.
        rig.step(&mut ctrl);
        assert_eq!(rig.inputs.get(0).unwrap().len(), 14);
        assert!(rig.inputs.get(0).unwrap().words().all(|w| w < 200));
        assert_eq!(rig.remote.peek_port_delivery().map(|d| d.data.len()), Some(64));

        rig.inputs.get_mut(0).unwrap().pop_many(14);
        rig.step(&mut ctrl);
        assert!(rig.remote.peek_port_delivery().is_none());
        let delivered: Vec<u64> = rig.inputs.get(0).unwrap().words().filter(|&w| w >= 200).collect();
        assert_eq!(delivered, incoming);
    }

    #[test]
    fn test_mask_cores() {
        assert_eq!(mask_cores(0b101, 2), vec![0]);
        assert_eq!(mask_cores(u64::MAX, 3), vec![0, 1, 2]);
    }
}

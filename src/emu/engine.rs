//! Stream engine orchestrator.
//!
//! The engine owns one core's ports, scratchpad partition, channel
//! controllers and remote protocol state. The host issues commands that
//! become queued streams; every call to [`Engine::step`] is one cycle:
//!
//! ```text
//! dispatch queued streams
//!   -> memory -> scratch read -> scratch write -> port controllers
//!   -> apply a finished configuration load
//!   -> fabric (reformat, fire, reformat)
//!   -> remote protocol (drain inbound, send one outbound)
//!   -> release drained port claims
//! ```
//!
//! # Usage
//!
//! ```
//! use dae_emu::config::EngineConfig;
//! use dae_emu::device::HostMemory;
//! use dae_emu::emu::Engine;
//! use dae_emu::remote::LoopbackNetwork;
//!
//! let mut engine = Engine::new(0, &EngineConfig::default());
//! let mut mem = HostMemory::new();
//! let mut net = LoopbackNetwork::new(1);
//!
//! mem.write_words(0x1000, &[1, 2, 3, 4]);
//! engine.load_dma_to_port(0x1000, 32, 32, 1, 3).unwrap();
//! engine.run(&mut mem, &mut net, 100).unwrap();
//! assert_eq!(engine.inputs().get(3).unwrap().len(), 4);
//! ```

use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;

use crate::config::EngineConfig;
use crate::controller::{
    Channel, ChannelContext, MemoryController, PortController, ScratchReadController, ScratchWriteController,
    StagingBuffer, StepOutcome, StreamArbiter,
};
use crate::device::dae_spec::{DATA_WIDTH, NUM_IN_PORTS, NUM_OUT_PORTS, READ_BUFFER_LEN, WRITE_BUFFER_LEN};
use crate::device::{
    ComputeFabric, CoreId, FabricConfig, MemoryInterface, NullFabric, PartitionMap, PortDirection, PortInterface,
    PortStatus, Scratchpad,
};
use crate::emu::progress::ProgressMonitor;
use crate::emu::stats::EngineStats;
use crate::error::{EngineError, EngineResult, QueueKind};
use crate::remote::{Interconnect, RemoteProtocol, Tag, UpdateOp};
use crate::stream::{
    Barrier, BarrierMask, ConstPattern, IndexWidth, IndirectAccess, InstRef, LinearAccess, ReorderBuffer,
    ScratchCursor, Stream, StreamId, StreamKind,
};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    pub cycle: u64,
    /// Channel operations per controller.
    pub channel_ops: [u32; Channel::COUNT],
    /// Streams retired this cycle.
    pub retired: Vec<StreamId>,
    /// Fabric instances fired.
    pub fired: usize,
    /// Messages taken from the interconnect.
    pub received: usize,
    /// Whether a message went out.
    pub sent: bool,
    pub progress: bool,
}

impl StepReport {
    #[inline]
    pub fn ops(&self, channel: Channel) -> u32 {
        self.channel_ops[channel.index()]
    }
}

/// Controller that schedules a stream kind.
fn channel_for(kind: &StreamKind) -> Channel {
    match kind {
        StreamKind::MemToPort { .. }
        | StreamKind::MemToScratch { .. }
        | StreamKind::Config { .. }
        | StreamKind::IndirectRead { .. }
        | StreamKind::PortToMem { .. }
        | StreamKind::IndirectWrite { .. } => Channel::Memory,
        StreamKind::ScratchToPort { .. } | StreamKind::ScratchToMem { .. } => Channel::ScratchRead,
        StreamKind::PortToScratch { .. } => Channel::ScratchWrite,
        StreamKind::PortToPort { .. } | StreamKind::ConstToPort { .. } | StreamKind::RemoteMulticast { .. } => {
            Channel::Port
        }
    }
}

/// One core's stream engine.
#[derive(Debug)]
pub struct Engine {
    cycle: u64,
    next_id: u64,
    current_inst: InstRef,
    cmd_queue_size: usize,

    inputs: PortInterface,
    outputs: PortInterface,
    scratchpad: Scratchpad,
    write_buffer: StagingBuffer,
    read_buffer: StagingBuffer,
    remote: RemoteProtocol,
    arbiter: Box<dyn StreamArbiter>,
    fabric: Box<dyn ComputeFabric>,

    memory: MemoryController,
    scratch_read: ScratchReadController,
    scratch_write: ScratchWriteController,
    ports: PortController,

    port_queue: VecDeque<Stream>,
    mem_scr_queue: VecDeque<Stream>,
    scr_mem_queue: VecDeque<Stream>,
    /// Streams enqueued and not yet retired, with the resources they touch.
    live: HashMap<StreamId, BarrierMask>,
    /// Barriers still holding back later streams, oldest first.
    barriers: VecDeque<Barrier>,
    config_loading: bool,

    progress: ProgressMonitor,
    stats: EngineStats,
}

impl Engine {
    /// Create the engine for `core`.
    pub fn new(core: CoreId, config: &EngineConfig) -> Self {
        let partitions = PartitionMap::new(core, config.num_cores(), config.partition_size());
        let fifo_len = config.port_fifo_len();
        Self {
            cycle: 0,
            next_id: 0,
            current_inst: InstRef::default(),
            cmd_queue_size: config.cmd_queue_size(),
            inputs: PortInterface::new(PortDirection::Input, NUM_IN_PORTS, fifo_len),
            outputs: PortInterface::new(PortDirection::Output, NUM_OUT_PORTS, fifo_len),
            scratchpad: Scratchpad::new(partitions.partition_size() as usize),
            write_buffer: StagingBuffer::new(WRITE_BUFFER_LEN),
            read_buffer: StagingBuffer::new(READ_BUFFER_LEN),
            remote: RemoteProtocol::new(partitions),
            arbiter: config.arbiter().build(),
            fabric: Box::new(NullFabric),
            memory: MemoryController::new(),
            scratch_read: ScratchReadController::new(),
            scratch_write: ScratchWriteController::new(),
            ports: PortController::new(),
            port_queue: VecDeque::new(),
            mem_scr_queue: VecDeque::new(),
            scr_mem_queue: VecDeque::new(),
            live: HashMap::new(),
            barriers: VecDeque::new(),
            config_loading: false,
            progress: ProgressMonitor::new(config.max_wait()),
            stats: EngineStats::default(),
        }
    }

    pub fn with_fabric(mut self, fabric: Box<dyn ComputeFabric>) -> Self {
        self.fabric = fabric;
        self
    }

    pub fn with_arbiter(mut self, arbiter: Box<dyn StreamArbiter>) -> Self {
        self.arbiter = arbiter;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn core(&self) -> CoreId {
        self.remote.core()
    }

    #[inline]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn inputs(&self) -> &PortInterface {
        &self.inputs
    }

    /// Fabric-side access to the input ports.
    pub fn inputs_mut(&mut self) -> &mut PortInterface {
        &mut self.inputs
    }

    pub fn outputs(&self) -> &PortInterface {
        &self.outputs
    }

    /// Fabric-side access to the output ports.
    pub fn outputs_mut(&mut self) -> &mut PortInterface {
        &mut self.outputs
    }

    pub fn scratchpad(&self) -> &Scratchpad {
        &self.scratchpad
    }

    pub fn scratchpad_mut(&mut self) -> &mut Scratchpad {
        &mut self.scratchpad
    }

    pub fn remote(&self) -> &RemoteProtocol {
        &self.remote
    }

    pub fn partitions(&self) -> &PartitionMap {
        self.remote.partitions()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn progress(&self) -> &ProgressMonitor {
        &self.progress
    }

    /// Tag commands issued from now on with `inst`.
    pub fn set_current_inst(&mut self, inst: InstRef) {
        self.current_inst = inst;
    }

    /// True until stream `id` has retired.
    pub fn is_stream_active(&self, id: StreamId) -> bool {
        self.live.contains_key(&id)
    }

    /// Nothing queued, in flight or waiting to be sent.
    pub fn is_idle(&self) -> bool {
        self.port_queue.is_empty()
            && self.mem_scr_queue.is_empty()
            && self.scr_mem_queue.is_empty()
            && self.barriers.is_empty()
            && !self.config_loading
            && self.controllers_idle()
            && self.remote.is_quiescent()
    }

    fn controllers_idle(&self) -> bool {
        self.memory.is_idle()
            && self.scratch_read.is_idle()
            && self.scratch_write.is_idle()
            && self.ports.is_idle()
            && self.write_buffer.is_idle()
            && self.read_buffer.is_idle()
    }

    /// Writes into this partition have not all landed yet.
    pub fn scratch_writes_pending(&self) -> bool {
        let mem_to_scratch = self
            .memory
            .slots()
            .iter()
            .any(|(_, s)| matches!(s.kind, StreamKind::MemToScratch { .. }));
        mem_to_scratch
            || !self.mem_scr_queue.is_empty()
            || !self.write_buffer.is_idle()
            || !self.scratch_write.is_idle()
            || self.remote.has_scratch_writes()
            || !self.remote.pending().is_empty()
    }

    // ------------------------------------------------------------------
    // Back-pressure
    // ------------------------------------------------------------------

    fn queue(&self, queue: QueueKind) -> &VecDeque<Stream> {
        match queue {
            QueueKind::Port => &self.port_queue,
            QueueKind::MemToScratch => &self.mem_scr_queue,
            QueueKind::ScratchToMem => &self.scr_mem_queue,
        }
    }

    fn queue_mut(&mut self, queue: QueueKind) -> &mut VecDeque<Stream> {
        match queue {
            QueueKind::Port => &mut self.port_queue,
            QueueKind::MemToScratch => &mut self.mem_scr_queue,
            QueueKind::ScratchToMem => &mut self.scr_mem_queue,
        }
    }

    /// Room for a stream touching a port, or a configuration load.
    pub fn can_add_port_stream(&self) -> bool {
        self.port_queue.len() < self.cmd_queue_size
    }

    pub fn can_add_mem_scratch_stream(&self) -> bool {
        self.mem_scr_queue.len() < self.cmd_queue_size
    }

    pub fn can_add_scratch_mem_stream(&self) -> bool {
        self.scr_mem_queue.len() < self.cmd_queue_size
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn enqueue(&mut self, queue: QueueKind, kind: StreamKind) -> EngineResult<StreamId> {
        let capacity = self.cmd_queue_size;
        if self.queue(queue).len() >= capacity {
            return Err(EngineError::QueueFull { queue, capacity });
        }
        let id = StreamId(self.next_id);
        self.next_id += 1;
        let stream = Stream::new(id, self.current_inst, kind);
        log::debug!("core{} enqueued {} on {} queue", self.core(), stream, queue);

        self.stats.record_enqueue(&stream);
        self.live.insert(id, BarrierMask::of(&stream.kind));
        self.progress.bump(self.cycle);
        self.queue_mut(queue).push_back(stream);
        Ok(id)
    }

    fn check_port(&self, direction: PortDirection, port: usize) -> EngineResult<()> {
        let bank = match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        };
        if port >= bank.len() {
            return Err(EngineError::InvalidPort { port, direction });
        }
        Ok(())
    }

    fn check_shift(shift_bytes: usize) -> EngineResult<()> {
        if shift_bytes >= DATA_WIDTH {
            return Err(EngineError::InvalidStream(format!(
                "shift of {} bytes leaves nothing of a {}-byte word",
                shift_bytes, DATA_WIDTH
            )));
        }
        Ok(())
    }

    /// Core owning global scratch address `addr`.
    fn scratch_owner(&self, addr: u64) -> EngineResult<CoreId> {
        let partitions = self.remote.partitions();
        partitions.owner(addr).ok_or(EngineError::InvalidAddress {
            addr,
            num_cores: partitions.num_cores(),
        })
    }

    /// Load `size` configuration words from `addr`.
    ///
    /// `configure(0, 0)` drops all port data immediately and queues nothing.
    pub fn configure(&mut self, addr: u64, size: u64) -> EngineResult<Option<StreamId>> {
        if addr == 0 && size == 0 {
            log::debug!("core{} cleared port data", self.core());
            self.inputs.clear_data();
            self.outputs.clear_data();
            return Ok(None);
        }
        let bytes = size * DATA_WIDTH as u64;
        let access = LinearAccess::new(addr, bytes, bytes, 1);
        self.enqueue(QueueKind::Port, StreamKind::Config { access }).map(Some)
    }

    /// Strided memory read packed contiguously into the scratchpad.
    pub fn load_dma_to_scratch(
        &mut self,
        mem_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        scratch_addr: u64,
    ) -> EngineResult<StreamId> {
        self.scratch_owner(scratch_addr)?;
        let access = LinearAccess::new(mem_addr, stride, access_size, num_strides);
        self.enqueue(
            QueueKind::MemToScratch,
            StreamKind::MemToScratch { access, scratch_addr, delivered: 0 },
        )
    }

    /// Strided scratchpad read written contiguously to memory.
    pub fn write_dma_from_scratch(
        &mut self,
        scratch_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        mem_addr: u64,
    ) -> EngineResult<StreamId> {
        let owner = self.scratch_owner(scratch_addr)?;
        if owner != self.core() {
            return Err(EngineError::RemoteUnsupported {
                operation: "scratch to memory",
                addr: scratch_addr,
                owner,
            });
        }
        let access = LinearAccess::new(scratch_addr, stride, access_size, num_strides);
        self.enqueue(QueueKind::ScratchToMem, StreamKind::ScratchToMem { access, mem_addr })
    }

    pub fn load_dma_to_port(
        &mut self,
        mem_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        in_port: usize,
    ) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Input, in_port)?;
        let access = LinearAccess::new(mem_addr, stride, access_size, num_strides);
        self.enqueue(QueueKind::Port, StreamKind::MemToPort { access, in_port })
    }

    /// Strided scratchpad read into an input port. A base address in
    /// another partition turns the whole stream into remote LOADs.
    pub fn load_scratch_to_port(
        &mut self,
        scratch_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        in_port: usize,
    ) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Input, in_port)?;
        let owner = self.scratch_owner(scratch_addr)?;
        let remote = (owner != self.core()).then(|| ReorderBuffer::new(owner));
        let access = LinearAccess::new(scratch_addr, stride, access_size, num_strides);
        self.enqueue(QueueKind::Port, StreamKind::ScratchToPort { access, in_port, remote })
    }

    /// Drain `num_bytes` from an output port into the scratchpad.
    pub fn write_scratchpad(
        &mut self,
        out_port: usize,
        scratch_addr: u64,
        num_bytes: u64,
        shift_bytes: usize,
    ) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Output, out_port)?;
        Self::check_shift(shift_bytes)?;
        self.scratch_owner(scratch_addr)?;
        let cursor = ScratchCursor::new(scratch_addr, num_bytes, shift_bytes);
        self.enqueue(QueueKind::Port, StreamKind::PortToScratch { cursor, out_port })
    }

    /// Drain an output port into strided memory.
    pub fn write_dma(
        &mut self,
        out_port: usize,
        mem_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        shift_bytes: usize,
    ) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Output, out_port)?;
        Self::check_shift(shift_bytes)?;
        let access = LinearAccess::new(mem_addr, stride, access_size, num_strides).with_shift(shift_bytes);
        self.enqueue(QueueKind::Port, StreamKind::PortToMem { access, out_port })
    }

    /// Move `num_elem` words from an output port to an input port.
    pub fn reroute(&mut self, out_port: usize, in_port: usize, num_elem: u64) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Output, out_port)?;
        self.check_port(PortDirection::Input, in_port)?;
        self.enqueue(
            QueueKind::Port,
            StreamKind::PortToPort { out_port, in_port, remaining: num_elem },
        )
    }

    fn indirect_access(
        &self,
        ind_port: usize,
        ind_type: u8,
        index_addr: u64,
        num_elem: u64,
    ) -> EngineResult<IndirectAccess> {
        self.check_port(PortDirection::Input, ind_port)?;
        let width = IndexWidth::from_type(ind_type)
            .ok_or_else(|| EngineError::InvalidStream(format!("unknown index type {}", ind_type)))?;
        Ok(IndirectAccess::new(ind_port, width, index_addr, num_elem))
    }

    /// Gather `num_elem` words from `index_addr + index * 8`, indices read
    /// from input port `ind_port`.
    pub fn indirect(
        &mut self,
        ind_port: usize,
        ind_type: u8,
        in_port: usize,
        index_addr: u64,
        num_elem: u64,
    ) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Input, in_port)?;
        let access = self.indirect_access(ind_port, ind_type, index_addr, num_elem)?;
        self.enqueue(QueueKind::Port, StreamKind::IndirectRead { access, in_port })
    }

    /// Scatter `num_elem` words from an output port.
    pub fn indirect_write(
        &mut self,
        ind_port: usize,
        ind_type: u8,
        out_port: usize,
        index_addr: u64,
        num_elem: u64,
    ) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Output, out_port)?;
        let access = self.indirect_access(ind_port, ind_type, index_addr, num_elem)?;
        self.enqueue(QueueKind::Port, StreamKind::IndirectWrite { access, out_port })
    }

    /// Feed `constant` x `num_elem` then `constant2` x `num_elem2`, `iters` times.
    pub fn write_constant(
        &mut self,
        in_port: usize,
        constant: u64,
        num_elem: u64,
        constant2: u64,
        num_elem2: u64,
        iters: u64,
    ) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Input, in_port)?;
        let pattern = ConstPattern::new(constant, num_elem, constant2, num_elem2, iters);
        self.enqueue(QueueKind::Port, StreamKind::ConstToPort { pattern, in_port })
    }

    /// Broadcast `num_elem` words from an output port to input `remote_port`
    /// on every core set in `core_mask`.
    pub fn remote_multicast(
        &mut self,
        out_port: usize,
        remote_port: usize,
        core_mask: u64,
        num_elem: u64,
    ) -> EngineResult<StreamId> {
        self.check_port(PortDirection::Output, out_port)?;
        self.check_port(PortDirection::Input, remote_port)?;
        self.enqueue(
            QueueKind::Port,
            StreamKind::RemoteMulticast { out_port, remote_port, core_mask, remaining: num_elem },
        )
    }

    /// Write `value` at every global scratch address in `addrs`.
    pub fn update_scratchpad(&mut self, addrs: &[u64], value: &[u8]) -> EngineResult<Vec<Tag>> {
        self.update_scratchpad_with(addrs, value, UpdateOp::Overwrite)
    }

    /// Combine `value` into every global scratch address in `addrs` with `op`.
    pub fn update_scratchpad_with(&mut self, addrs: &[u64], value: &[u8], op: UpdateOp) -> EngineResult<Vec<Tag>> {
        let tags = self.remote.send_update(addrs, value, op)?;
        self.stats.updates += 1;
        self.progress.bump(self.cycle);
        log::debug!(
            "core{} {:?} update of {} bytes to {} addresses, tags {:?}",
            self.core(),
            op,
            value.len(),
            addrs.len(),
            tags
        );
        Ok(tags)
    }

    /// Hold back streams issued from now on that share a bit of `mask`
    /// until every earlier stream sharing it has retired. With
    /// [`BarrierMask::SCRATCH_WRITE`] buffered and inbound scratch writes
    /// must land as well.
    pub fn insert_barrier(&mut self, mask: BarrierMask) {
        if mask.is_empty() {
            return;
        }
        let barrier = Barrier::new(mask, StreamId(self.next_id));
        log::debug!("core{} barrier on {} before {}", self.core(), mask, barrier.after);
        self.barriers.push_back(barrier);
        self.stats.barriers += 1;
        self.progress.bump(self.cycle);
    }

    /// Whether the host can read a word from an output port.
    pub fn can_receive(&self, port: usize) -> bool {
        self.outputs
            .get(port)
            .is_some_and(|p| !p.is_empty() && p.status() != PortStatus::Busy)
    }

    /// Read one word from an output port.
    pub fn receive(&mut self, port: usize) -> EngineResult<Option<u64>> {
        self.check_port(PortDirection::Output, port)?;
        if !self.can_receive(port) {
            return Ok(None);
        }
        Ok(self.outputs.get_mut(port).and_then(|p| p.pop()))
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn has_free_slot(&self, kind: &StreamKind) -> bool {
        match channel_for(kind) {
            Channel::Memory => self.memory.has_free_slot(kind),
            Channel::ScratchRead => self.scratch_read.has_free_slot(kind),
            Channel::ScratchWrite => self.scratch_write.has_free_slot(kind),
            Channel::Port => self.ports.has_free_slot(kind),
        }
    }

    fn barrier_drained(&self, barrier: &Barrier) -> bool {
        if self.live.iter().any(|(&id, &mask)| barrier.orders_before(id, mask)) {
            return false;
        }
        if barrier.mask.contains(BarrierMask::SCRATCH_WRITE) {
            return self.write_buffer.is_idle()
                && self.scratch_write.is_idle()
                && !self.remote.has_scratch_writes()
                && self.remote.pending().is_empty();
        }
        true
    }

    /// Drop barriers with nothing left in front of them.
    fn retire_barriers(&mut self) -> usize {
        let mut retired = 0;
        let mut i = 0;
        while i < self.barriers.len() {
            if self.barrier_drained(&self.barriers[i]) {
                self.barriers.remove(i);
                retired += 1;
            } else {
                i += 1;
            }
        }
        if retired > 0 {
            log::debug!("core{} retired {} barrier(s)", self.core(), retired);
        }
        retired
    }

    fn held_by_barrier(&self, stream: &Stream) -> bool {
        let mask = BarrierMask::of(&stream.kind);
        self.barriers.iter().any(|b| b.holds(stream.id(), mask))
    }

    /// Hand a stream to its controller.
    fn place(&mut self, stream: Stream) -> EngineResult<()> {
        let rejected = match channel_for(&stream.kind) {
            Channel::Memory => self.memory.dispatch(stream).err(),
            Channel::ScratchRead => self.scratch_read.dispatch(stream).err(),
            Channel::ScratchWrite => self.scratch_write.dispatch(stream).err(),
            Channel::Port => self.ports.dispatch(stream).err(),
        };
        match rejected {
            Some(stream) => Err(EngineError::InvalidStream(format!("no free slot for {}", stream))),
            None => Ok(()),
        }
    }

    /// Move queued streams into controller slots. Returns the count dispatched.
    fn dispatch(&mut self) -> EngineResult<usize> {
        if self.config_loading {
            return Ok(0);
        }
        let mut dispatched = self.retire_barriers();
        dispatched += self.dispatch_port_queue()?;

        if let Some(stream) = self.mem_scr_queue.front() {
            if self.memory.has_free_slot(&stream.kind)
                && self.write_buffer.is_idle()
                && !self.config_loading
                && !self.held_by_barrier(stream)
            {
                if let Some(stream) = self.mem_scr_queue.pop_front() {
                    if let StreamKind::MemToScratch { scratch_addr, .. } = stream.kind {
                        self.write_buffer.start(stream.id(), scratch_addr);
                    }
                    self.place(stream)?;
                    dispatched += 1;
                }
            }
        }

        if let Some(stream) = self.scr_mem_queue.front() {
            if self.scratch_read.has_free_slot(&stream.kind)
                && self.read_buffer.is_idle()
                && !self.config_loading
                && !self.held_by_barrier(stream)
            {
                if let Some(stream) = self.scr_mem_queue.pop_front() {
                    if let StreamKind::ScratchToMem { mem_addr, .. } = stream.kind {
                        self.read_buffer.start(stream.id(), mem_addr);
                    }
                    self.place(stream)?;
                    dispatched += 1;
                }
            }
        }
        Ok(dispatched)
    }

    /// Scan the port queue in order. A stream waits while its controller
    /// has no free slot, a port it claims is held for another location, or
    /// an earlier waiting stream claims the same port, or a barrier holds it
    /// back. A configuration load
    /// waits for the engine to drain and holds back everything behind it.
    fn dispatch_port_queue(&mut self) -> EngineResult<usize> {
        let mut blocked: SmallVec<[(PortDirection, usize); 8]> = SmallVec::new();
        let mut dispatched = 0;
        let mut i = 0;
        while i < self.port_queue.len() {
            let stream = &self.port_queue[i];
            if matches!(stream.kind, StreamKind::Config { .. }) {
                if i == 0 && self.controllers_idle() && !self.held_by_barrier(stream) {
                    if let Some(stream) = self.port_queue.pop_front() {
                        log::info!("core{} loading configuration {}", self.core(), stream.id());
                        self.config_loading = true;
                        self.place(stream)?;
                        dispatched += 1;
                    }
                }
                break;
            }

            let claims = stream.claims();
            let ports_free = claims.iter().all(|c| {
                let bank = match c.direction {
                    PortDirection::Input => &self.inputs,
                    PortDirection::Output => &self.outputs,
                };
                !blocked.contains(&(c.direction, c.port)) && bank.get(c.port).is_some_and(|p| p.can_take(c.loc))
            });
            if !(ports_free && self.has_free_slot(&stream.kind)) || self.held_by_barrier(stream) {
                blocked.extend(claims.iter().map(|c| (c.direction, c.port)));
                i += 1;
                continue;
            }

            if let Some(stream) = self.port_queue.remove(i) {
                for c in &claims {
                    let bank = match c.direction {
                        PortDirection::Input => &mut self.inputs,
                        PortDirection::Output => &mut self.outputs,
                    };
                    if let Some(port) = bank.get_mut(c.port) {
                        port.claim(c.loc)?;
                    }
                }
                self.place(stream)?;
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    // ------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------

    /// Map ports onto the fabric as a finished configuration load describes.
    fn apply_config(&mut self, bytes: &[u8]) {
        let config = FabricConfig::decode(bytes);
        self.inputs.reset();
        self.outputs.reset();
        for (bank, table) in [(&mut self.inputs, &config.inputs), (&mut self.outputs, &config.outputs)] {
            let direction = bank.direction();
            for &(port, lanes) in table {
                match bank.get_mut(port) {
                    Some(p) => p.set_lanes(lanes),
                    None => log::warn!("config maps missing {} port {}", direction, port),
                }
            }
        }
        self.fabric.configure(&config);
        self.config_loading = false;
        self.stats.configs += 1;
        log::info!(
            "core{} configured {} input and {} output ports",
            self.core(),
            config.inputs.len(),
            config.outputs.len()
        );
    }

    /// Stage input data, fire the fabric, drain its outputs. Returns
    /// (instances fired, groups moved).
    fn step_fabric(&mut self) -> (usize, usize) {
        let mut moved: usize = self.inputs.iter_mut().map(|p| p.reformat_in()).sum();
        let fired = self.fabric.fire(&mut self.inputs, &mut self.outputs);
        moved += self.outputs.iter_mut().map(|p| p.reformat_out()).sum::<usize>();
        self.stats.fabric_instances += fired as u64;
        (fired, moved)
    }

    /// Run one cycle.
    pub fn step(&mut self, mem: &mut dyn MemoryInterface, net: &mut dyn Interconnect) -> EngineResult<StepReport> {
        self.cycle += 1;
        let mut report = StepReport {
            cycle: self.cycle,
            ..StepReport::default()
        };

        let mut progress = self.dispatch()? > 0;

        let outcomes: [(Channel, StepOutcome); Channel::COUNT] = {
            let mut ctx = ChannelContext {
                cycle: self.cycle,
                inputs: &mut self.inputs,
                outputs: &mut self.outputs,
                scratchpad: &mut self.scratchpad,
                write_buffer: &mut self.write_buffer,
                read_buffer: &mut self.read_buffer,
                remote: &mut self.remote,
                arbiter: self.arbiter.as_mut(),
            };
            [
                (Channel::Memory, self.memory.step(&mut ctx, mem)?),
                (Channel::ScratchRead, self.scratch_read.step(&mut ctx)?),
                (Channel::ScratchWrite, self.scratch_write.step(&mut ctx)?),
                (Channel::Port, self.ports.step(&mut ctx)?),
            ]
        };

        for (channel, outcome) in outcomes {
            report.channel_ops[channel.index()] = outcome.channel_ops;
            self.stats.record_channel(channel, outcome.channel_ops, outcome.bytes);
            progress |= outcome.progress;
            for stream in &outcome.retired {
                self.live.remove(&stream.id());
                self.stats.streams_completed += 1;
                report.retired.push(stream.id());
            }
            if let Some(bytes) = outcome.config {
                self.apply_config(&bytes);
                progress = true;
            }
        }

        let (fired, moved) = self.step_fabric();
        report.fired = fired;
        progress |= fired > 0 || moved > 0;

        report.received = self.remote.poll(net)?;
        report.sent = self.remote.dispatch(net);
        progress |= report.received > 0 || report.sent;

        progress |= self.inputs.update_status() + self.outputs.update_status() > 0;

        if progress {
            self.progress.bump(self.cycle);
        }
        report.progress = progress;
        log::trace!("core{} cycle {} {:?}", self.core(), self.cycle, report.channel_ops);
        Ok(report)
    }

    /// Error when work remains and nothing has moved for too long.
    pub fn check_progress(&self) -> EngineResult<()> {
        self.progress.check(self.cycle, !self.is_idle())
    }

    /// Step until idle or `max_cycles` have passed. Returns the cycles run.
    pub fn run(
        &mut self,
        mem: &mut dyn MemoryInterface,
        net: &mut dyn Interconnect,
        max_cycles: u64,
    ) -> EngineResult<u64> {
        let start = self.cycle;
        while !self.is_idle() && self.cycle - start < max_cycles {
            self.step(mem, net)?;
            self.check_progress()?;
        }
        Ok(self.cycle - start)
    }
}

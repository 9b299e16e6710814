//! Per-core remote stream protocol.
//!
//! Owns everything that crosses partitions for one core: the tag source,
//! the pending-update table and the outbound queue. Controllers hand it
//! outgoing traffic through the `send_*` methods; inbound messages are
//! decoded once per cycle and sorted into work queues that the
//! controllers drain on their own channels:
//!
//! | Inbound                 | Queue             | Drained by          |
//! |-------------------------|-------------------|---------------------|
//! | STORE to scratchpad     | `scratch_writes`  | scratch write       |
//! | UPDATE values           | `scratch_writes`  | scratch write       |
//! | STORE to port           | `port_deliveries` | port controller     |
//! | LOAD request            | `read_requests`   | scratch read        |
//! | LOAD response           | `read_responses`  | scratch read        |

use std::collections::{BTreeMap, VecDeque};

use byteorder::{ByteOrder, LittleEndian};

use crate::device::dae_spec::{MANIFEST_ADDR_BYTES, MANIFEST_MAX_ADDRS, PACKET_SIZE, PAYLOAD_SENTINEL};
use crate::device::{CoreId, PartitionMap};
use crate::error::{EngineError, EngineResult, ProtocolError};
use crate::remote::message::{
    encode_read_size, LoadHeader, MessageKind, NetMessage, StoreHeader, StoreTarget, UpdateHeader,
};
use crate::remote::network::Interconnect;
use crate::remote::packet::{split_payload, OutboundQueue};
use crate::remote::pending::{PendingTable, ScratchWrite, Tag, TagAllocator, UpdateOp};

/// LOAD request waiting to be served from this core's scratchpad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub requester: CoreId,
    /// Local scratch address.
    pub addr: u64,
    pub len: usize,
    pub request_ptr: u8,
    pub reorder: u8,
}

/// LOAD response for one of this core's remote reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub request_ptr: u8,
    pub reorder: u8,
    pub data: Vec<u8>,
}

/// Bytes bound for one of this core's input ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDelivery {
    pub port: usize,
    pub data: Vec<u8>,
}

/// Message counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolStats {
    /// Messages queued for sending, by kind.
    pub queued: [u64; MessageKind::COUNT],
    /// Messages received, by kind.
    pub received: [u64; MessageKind::COUNT],
    /// Manifest addresses naming another partition.
    pub dropped_foreign: u64,
    /// UPDATE commands issued.
    pub updates: u64,
}

/// Remote protocol state for one core.
#[derive(Debug, Clone)]
pub struct RemoteProtocol {
    partitions: PartitionMap,
    tags: TagAllocator,
    pending: PendingTable,
    outbound: OutboundQueue,
    read_requests: VecDeque<ReadRequest>,
    read_responses: VecDeque<ReadResponse>,
    scratch_writes: VecDeque<ScratchWrite>,
    port_deliveries: VecDeque<PortDelivery>,
    stats: ProtocolStats,
}

impl RemoteProtocol {
    pub fn new(partitions: PartitionMap) -> Self {
        Self {
            tags: TagAllocator::new(partitions.core()),
            partitions,
            pending: PendingTable::new(),
            outbound: OutboundQueue::new(),
            read_requests: VecDeque::new(),
            read_responses: VecDeque::new(),
            scratch_writes: VecDeque::new(),
            port_deliveries: VecDeque::new(),
            stats: ProtocolStats::default(),
        }
    }

    #[inline]
    pub fn core(&self) -> CoreId {
        self.partitions.core()
    }

    pub fn partitions(&self) -> &PartitionMap {
        &self.partitions
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    fn enqueue(
        &mut self,
        kind: MessageKind,
        header: u64,
        payload: &[u8],
        destinations: &[CoreId],
    ) -> Result<(), ProtocolError> {
        let msg = NetMessage::new(kind, header, payload, self.core(), destinations)?;
        self.stats.queued[kind.bits() as usize] += 1;
        self.outbound.push(msg);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------

    /// Write `data` into `dest`'s scratchpad at local address `addr`.
    pub fn send_store(&mut self, dest: CoreId, addr: u64, data: &[u8]) -> Result<(), ProtocolError> {
        for (i, chunk) in split_payload(data).enumerate() {
            let header = StoreHeader {
                addr: ((addr + (i * PACKET_SIZE) as u64) & 0xFFFF) as u16,
                len: chunk.len() as u8,
                target: StoreTarget::Scratch,
            };
            self.enqueue(MessageKind::Store, header.encode(), chunk, &[dest])?;
        }
        Ok(())
    }

    /// Push `data` into input `port` on every core in `dests`.
    ///
    /// A copy for this core is delivered locally instead of going out on
    /// the interconnect.
    pub fn send_port_store(&mut self, dests: &[CoreId], port: usize, data: &[u8]) -> Result<(), ProtocolError> {
        let me = self.core();
        if dests.contains(&me) {
            self.port_deliveries.push_back(PortDelivery { port, data: data.to_vec() });
        }
        let others: Vec<CoreId> = dests.iter().copied().filter(|&c| c != me).collect();
        if others.is_empty() {
            return Ok(());
        }
        for chunk in split_payload(data) {
            let header = StoreHeader {
                addr: port as u16,
                len: chunk.len() as u8,
                target: StoreTarget::Port,
            };
            self.enqueue(MessageKind::Store, header.encode(), chunk, &others)?;
        }
        Ok(())
    }

    /// Ask `dest` for `len` bytes at its local address `addr`.
    pub fn send_read_request(
        &mut self,
        dest: CoreId,
        addr: u64,
        len: usize,
        request_ptr: u8,
        reorder: u8,
    ) -> Result<(), ProtocolError> {
        let header = LoadHeader {
            addr: (addr & 0xFFFF) as u16,
            request_ptr,
            size_code: encode_read_size(len)?,
            reorder,
        };
        let requester = (self.core() as u64).to_le_bytes();
        self.enqueue(MessageKind::Load, header.encode(), &requester, &[dest])
    }

    /// Answer a read request with the bytes it asked for.
    pub fn send_read_response(&mut self, req: &ReadRequest, data: &[u8]) -> Result<(), ProtocolError> {
        let header = LoadHeader {
            addr: (req.addr & 0xFFFF) as u16,
            request_ptr: req.request_ptr,
            size_code: encode_read_size(data.len())?,
            reorder: req.reorder,
        };
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(PAYLOAD_SENTINEL);
        payload.extend_from_slice(data);
        self.enqueue(MessageKind::Load, header.encode(), &payload, &[req.requester])
    }

    /// Combine `value` into every global address in `addrs` with `op`.
    ///
    /// Local destinations become local scratch writes with no network
    /// traffic. Foreign destinations are grouped by owning core; each group
    /// of up to `MANIFEST_MAX_ADDRS` addresses gets its own tag, one
    /// manifest and the value packets. Returns the tags used.
    pub fn send_update(&mut self, addrs: &[u64], value: &[u8], op: UpdateOp) -> EngineResult<Vec<Tag>> {
        let mut foreign: BTreeMap<CoreId, Vec<u64>> = BTreeMap::new();
        let mut local = Vec::new();
        for &addr in addrs {
            let owner = self.partitions.owner(addr).ok_or(EngineError::InvalidAddress {
                addr,
                num_cores: self.partitions.num_cores(),
            })?;
            if owner == self.core() {
                local.push(self.partitions.local(addr));
            } else {
                foreign.entry(owner).or_default().push(addr);
            }
        }
        self.stats.updates += 1;

        for dest in local {
            for (i, chunk) in split_payload(value).enumerate() {
                self.scratch_writes.push_back(ScratchWrite {
                    addr: dest + (i * PACKET_SIZE) as u64,
                    data: chunk.to_vec(),
                    op,
                });
            }
        }

        let mut tags = Vec::new();
        for (owner, group) in foreign {
            for batch in group.chunks(MANIFEST_MAX_ADDRS) {
                let tag = self.tags.next_tag();
                let mut manifest = vec![0u8; batch.len() * MANIFEST_ADDR_BYTES];
                for (slot, &addr) in manifest.chunks_exact_mut(MANIFEST_ADDR_BYTES).zip(batch) {
                    LittleEndian::write_u24(slot, addr as u32);
                }
                let header = UpdateHeader::Manifest {
                    tag,
                    value_bytes: value.len() as u32,
                    addr_count: batch.len() as u8,
                    op,
                };
                self.enqueue(MessageKind::Update, header.encode(), &manifest, &[owner])?;

                for chunk in split_payload(value) {
                    let header = UpdateHeader::Value { tag, len: chunk.len() as u8 };
                    self.enqueue(MessageKind::Update, header.encode(), chunk, &[owner])?;
                }
                log::debug!(
                    "REMOTE core{} update tag {:#06x}: {} addrs, {} bytes -> core{}",
                    self.core(),
                    tag,
                    batch.len(),
                    value.len(),
                    owner
                );
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    /// Hand one queued message to the interconnect.
    pub fn dispatch(&mut self, net: &mut dyn Interconnect) -> bool {
        self.outbound.dispatch(net)
    }

    // ------------------------------------------------------------------
    // Incoming
    // ------------------------------------------------------------------

    /// Drain every frame waiting for this core. A frame that fails to
    /// decode means the interconnect is out of sync and is fatal.
    pub fn poll(&mut self, net: &mut dyn Interconnect) -> Result<usize, ProtocolError> {
        let mut count = 0;
        while let Some(frame) = net.receive(self.core()) {
            let msg = NetMessage::decode(&frame)?;
            self.receive(msg);
            count += 1;
        }
        Ok(count)
    }

    /// Sort one decoded message into the work queues.
    pub fn receive(&mut self, msg: NetMessage) {
        self.stats.received[msg.kind.bits() as usize] += 1;
        match msg.kind {
            MessageKind::Store => {
                let header = StoreHeader::decode(msg.header);
                let data = msg.payload().to_vec();
                match header.target {
                    StoreTarget::Scratch => self
                        .scratch_writes
                        .push_back(ScratchWrite::store(header.addr as u64, data)),
                    StoreTarget::Port => self.port_deliveries.push_back(PortDelivery {
                        port: header.addr as usize,
                        data,
                    }),
                }
            }
            MessageKind::Load => {
                let header = LoadHeader::decode(msg.header);
                if msg.is_load_response() {
                    self.read_responses.push_back(ReadResponse {
                        request_ptr: header.request_ptr,
                        reorder: header.reorder,
                        data: msg.payload()[1..].to_vec(),
                    });
                } else {
                    let requester = LittleEndian::read_u64(msg.payload()) as CoreId;
                    self.read_requests.push_back(ReadRequest {
                        requester,
                        addr: header.addr as u64,
                        len: header.data_bytes(),
                        request_ptr: header.request_ptr,
                        reorder: header.reorder,
                    });
                }
            }
            MessageKind::Update => match UpdateHeader::decode(msg.header) {
                UpdateHeader::Manifest { tag, value_bytes, op, .. } => {
                    let mut destinations = Vec::new();
                    for raw in msg.payload().chunks_exact(MANIFEST_ADDR_BYTES) {
                        let addr = LittleEndian::read_u24(raw) as u64;
                        if self.partitions.is_local(addr) {
                            destinations.push(self.partitions.local(addr));
                        } else {
                            self.stats.dropped_foreign += 1;
                            log::warn!(
                                "REMOTE core{} manifest {:#06x} names foreign address {:#x}",
                                self.core(),
                                tag,
                                addr
                            );
                        }
                    }
                    self.pending.insert(tag, destinations, value_bytes as usize, op);
                }
                UpdateHeader::Value { tag, .. } => {
                    let writes = self.pending.apply(tag, msg.payload());
                    self.scratch_writes.extend(writes);
                }
            },
        }
    }

    // ------------------------------------------------------------------
    // Work queues
    // ------------------------------------------------------------------

    pub fn pop_read_request(&mut self) -> Option<ReadRequest> {
        self.read_requests.pop_front()
    }

    pub fn has_read_requests(&self) -> bool {
        !self.read_requests.is_empty()
    }

    pub fn pop_read_response(&mut self) -> Option<ReadResponse> {
        self.read_responses.pop_front()
    }

    pub fn pop_scratch_write(&mut self) -> Option<ScratchWrite> {
        self.scratch_writes.pop_front()
    }

    pub fn has_scratch_writes(&self) -> bool {
        !self.scratch_writes.is_empty()
    }

    pub fn peek_port_delivery(&self) -> Option<&PortDelivery> {
        self.port_deliveries.front()
    }

    pub fn pop_port_delivery(&mut self) -> Option<PortDelivery> {
        self.port_deliveries.pop_front()
    }

    /// True when nothing is queued in either direction and no update is
    /// waiting for value bytes.
    pub fn is_quiescent(&self) -> bool {
        self.outbound.is_empty()
            && self.read_requests.is_empty()
            && self.read_responses.is_empty()
            && self.scratch_writes.is_empty()
            && self.port_deliveries.is_empty()
            && self.pending.is_empty()
    }
}

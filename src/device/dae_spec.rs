//! DAE stream engine architecture constants.
//!
//! Channel widths, buffer depths and controller slot counts for the
//! modeled accelerator. Values that a deployment may want to tune
//! (queue depth, partition size, stuck threshold) have defaults here and
//! are overridable through [`crate::config::EngineConfig`].

// ============================================================================
// Datapath widths
// ============================================================================

/// Bytes per port word. Every port element is one 64-bit word.
pub const DATA_WIDTH: usize = 8;

/// Bandwidth quantum of the memory channel, bytes per cycle.
pub const MEM_WIDTH: usize = 64;

/// Bandwidth quantum of the scratchpad read and write channels, bytes per cycle.
pub const SCR_WIDTH: usize = 64;

/// Bytes a constant stream may push into a port in one cycle.
pub const PORT_WIDTH: usize = 64;

// ============================================================================
// Ports
// ============================================================================

/// Vector port FIFO capacity in words.
pub const VP_LEN: usize = 64;

/// Number of input ports (engine to fabric).
pub const NUM_IN_PORTS: usize = 32;

/// Number of output ports (fabric to engine).
pub const NUM_OUT_PORTS: usize = 32;

/// Instances a fabric lane may hold ready before reformatting stalls.
pub const LANE_DEPTH: usize = 8;

// ============================================================================
// Scratchpad
// ============================================================================

/// Default bytes of scratchpad owned by one core.
pub const DEFAULT_PARTITION_SIZE: u64 = 16 * 1024;

/// Largest partition the 16-bit remote address field can reach.
pub const MAX_PARTITION_SIZE: u64 = 1 << 16;

/// Bytes staged between the memory channel and the scratch-write channel.
pub const WRITE_BUFFER_LEN: usize = 128;

/// Bytes staged between the scratch-read channel and the memory channel.
pub const READ_BUFFER_LEN: usize = 128;

// ============================================================================
// Command queues and progress
// ============================================================================

/// Default bound on each command queue.
pub const CMD_QUEUE_SIZE: usize = 16;

/// Default cycles without forward progress before the engine counts as stuck.
pub const MAX_WAIT: u64 = 1000;

// ============================================================================
// Controller slot counts
// ============================================================================

/// Concurrent memory to port streams.
pub const MEM_PORT_SLOTS: usize = 10;

/// Concurrent indirect read (gather) streams.
pub const INDIRECT_READ_SLOTS: usize = 4;

/// Concurrent port to memory streams.
pub const PORT_MEM_SLOTS: usize = 4;

/// Concurrent indirect write (scatter) streams.
pub const INDIRECT_WRITE_SLOTS: usize = 4;

/// Concurrent scratch to port streams.
pub const SCR_PORT_SLOTS: usize = 4;

/// Concurrent port to port streams.
pub const PORT_PORT_SLOTS: usize = 4;

/// Concurrent constant to port streams.
pub const CONST_PORT_SLOTS: usize = 4;

/// Concurrent remote port multicast streams.
pub const MULTICAST_SLOTS: usize = 2;

// ============================================================================
// Remote protocol
// ============================================================================

/// Network packet payload size in bytes.
pub const PACKET_SIZE: usize = 64;

/// Remote reads above 8 bytes are multiples of this.
pub const BANK_WIDTH: usize = 8;

/// Largest remote read that fits a response packet (after the sentinel byte).
pub const MAX_REMOTE_READ: usize = 56;

/// Reorder entries a remote read stream may have in flight.
pub const REORDER_ENTRIES: usize = 8;

/// Per-core update sequence period; tags wrap after this many updates.
pub const TAG_PERIOD: u16 = 1024;

/// Largest core id representable in a tag (6 bits).
pub const MAX_CORES: usize = 64;

/// Bytes per address in an update manifest.
pub const MANIFEST_ADDR_BYTES: usize = 3;

/// Addresses that fit one manifest packet with room for the sentinel.
pub const MANIFEST_MAX_ADDRS: usize = 20;

/// End-of-payload marker inside manifest and value packets.
pub const PAYLOAD_SENTINEL: u8 = 0xFF;

// ============================================================================
// Helpers
// ============================================================================

/// Number of port words needed to carry `bytes` bytes.
#[inline]
pub const fn words_for(bytes: usize) -> usize {
    (bytes + DATA_WIDTH - 1) / DATA_WIDTH
}

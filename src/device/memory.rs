//! Memory-system collaborator interface.
//!
//! The engine never models cache or DRAM timing itself. The memory
//! controller issues loads and stores through [`MemoryInterface`] and
//! collects load responses when they become available.
//!
//! Contract: responses for one stream come back in the order their loads
//! were issued. Responses of different streams may interleave freely.

use crate::stream::StreamId;

/// Completed load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemResponse {
    /// Stream that issued the load.
    pub stream: StreamId,
    /// Address the load started at.
    pub addr: u64,
    pub data: Vec<u8>,
}

/// Abstract memory system.
pub trait MemoryInterface {
    /// Start a load of `size` bytes at `addr` on behalf of `stream`.
    fn load(&mut self, stream: StreamId, addr: u64, size: usize, cycle: u64);

    /// Write `data` at `addr`. Stores are not acknowledged.
    fn store(&mut self, stream: StreamId, addr: u64, data: &[u8], cycle: u64);

    /// Next load response ready at `cycle`, if any.
    fn poll_response(&mut self, cycle: u64) -> Option<MemResponse>;

    /// Loads issued but not yet returned.
    fn pending_loads(&self) -> usize;
}

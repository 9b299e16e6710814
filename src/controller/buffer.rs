//! Byte staging between two channels.
//!
//! Memory-to-scratch data passes through a write buffer (filled by the
//! memory channel, drained by the scratch write channel) and
//! scratch-to-memory data through a read buffer (filled by the scratch
//! read channel, drained by the memory channel). Each buffer serves one
//! stream at a time and holds a contiguous run of bytes bound for
//! consecutive destination addresses.

use std::collections::VecDeque;

use crate::stream::StreamId;

/// Bounded contiguous byte run with a moving destination address.
#[derive(Debug, Clone)]
pub struct StagingBuffer {
    data: VecDeque<u8>,
    /// Stream the buffered bytes belong to.
    owner: Option<StreamId>,
    /// Destination of the first buffered byte.
    addr: u64,
    capacity: usize,
    /// Space promised to requests still in flight.
    reserved: usize,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            owner: None,
            addr: 0,
            capacity,
            reserved: 0,
        }
    }

    /// Hand an idle buffer to `owner`, draining to `addr` onwards.
    pub fn start(&mut self, owner: StreamId, addr: u64) {
        debug_assert!(self.is_idle());
        self.owner = Some(owner);
        self.addr = addr;
    }

    #[inline]
    pub fn owner(&self) -> Option<StreamId> {
        self.owner
    }

    /// Destination of the next byte to drain.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.addr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.data.len() + self.reserved)
    }

    /// No data and nothing promised.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.data.is_empty() && self.reserved == 0
    }

    /// Hold `len` bytes of space for a request in flight.
    pub fn reserve(&mut self, len: usize) -> bool {
        if self.free_space() < len {
            return false;
        }
        self.reserved += len;
        true
    }

    /// Append bytes into reserved space.
    pub fn push_reserved(&mut self, bytes: &[u8]) {
        self.reserved = self.reserved.saturating_sub(bytes.len());
        self.data.extend(bytes);
    }

    /// Append bytes without a reservation. Returns false when they do not fit.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if self.free_space() < bytes.len() {
            return false;
        }
        self.data.extend(bytes);
        true
    }

    /// Take up to `max` bytes with their destination address.
    pub fn pop_chunk(&mut self, max: usize) -> Option<(u64, Vec<u8>)> {
        if self.data.is_empty() || max == 0 {
            return None;
        }
        let n = max.min(self.data.len());
        let chunk: Vec<u8> = self.data.drain(..n).collect();
        let addr = self.addr;
        self.addr += n as u64;
        Some((addr, chunk))
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.reserved = 0;
    }
}

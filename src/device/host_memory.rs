//! Simulated main memory behind the engine's memory channel.
//!
//! Sparse page storage plus a fixed-latency response queue. Loads are
//! served from the contents at issue time and become visible to the
//! memory controller `latency` cycles later; stores apply immediately.
//!
//! # Usage
//!
//! ```
//! use dae_emu::device::HostMemory;
//!
//! let mut mem = HostMemory::with_latency(4);
//! mem.write_words(0x1000, &[1, 2, 3, 4]);
//! assert_eq!(mem.read_words(0x1000, 4), vec![1, 2, 3, 4]);
//! ```

use std::collections::{BTreeMap, VecDeque};

use byteorder::{ByteOrder, LittleEndian};

use crate::device::memory::{MemResponse, MemoryInterface};
use crate::stream::StreamId;

/// Load waiting out its latency.
#[derive(Debug, Clone)]
struct PendingLoad {
    ready_cycle: u64,
    response: MemResponse,
}

/// Simulated main memory.
///
/// Pages are allocated on first write; unwritten memory reads as zero.
pub struct HostMemory {
    /// Sparse storage: page_address -> page_data
    pages: BTreeMap<u64, Box<[u8; Self::PAGE_SIZE]>>,

    /// Cycles between a load being issued and its response.
    latency: u64,

    /// Loads in issue order.
    pending: VecDeque<PendingLoad>,

    /// Statistics
    total_bytes_written: u64,
    total_bytes_read: u64,
    loads: u64,
    stores: u64,
}

impl HostMemory {
    /// Page size for sparse storage.
    pub const PAGE_SIZE: usize = 4096;

    /// Page address mask (lower 12 bits are offset)
    const PAGE_MASK: u64 = !(Self::PAGE_SIZE as u64 - 1);

    /// Create an empty memory that answers loads in the cycle they are issued.
    pub fn new() -> Self {
        Self::with_latency(0)
    }

    /// Create an empty memory with a fixed load latency.
    pub fn with_latency(latency: u64) -> Self {
        Self {
            pages: BTreeMap::new(),
            latency,
            pending: VecDeque::new(),
            total_bytes_written: 0,
            total_bytes_read: 0,
            loads: 0,
            stores: 0,
        }
    }

    #[inline]
    pub fn latency(&self) -> u64 {
        self.latency
    }

    fn get_or_create_page(&mut self, addr: u64) -> &mut [u8; Self::PAGE_SIZE] {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages
            .entry(page_addr)
            .or_insert_with(|| Box::new([0u8; Self::PAGE_SIZE]))
    }

    fn get_page(&self, addr: u64) -> Option<&[u8; Self::PAGE_SIZE]> {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages.get(&page_addr).map(|b| b.as_ref())
    }

    /// Write a byte slice to memory.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        let mut current_addr = addr;
        let mut remaining = data;

        while !remaining.is_empty() {
            let page = self.get_or_create_page(current_addr);
            let offset = (current_addr & (Self::PAGE_SIZE as u64 - 1)) as usize;
            let to_write = remaining.len().min(Self::PAGE_SIZE - offset);

            page[offset..offset + to_write].copy_from_slice(&remaining[..to_write]);

            current_addr += to_write as u64;
            remaining = &remaining[to_write..];
        }

        self.total_bytes_written += data.len() as u64;
    }

    /// Read bytes from memory into a buffer.
    pub fn read_bytes(&self, addr: u64, buf: &mut [u8]) {
        let mut current_addr = addr;
        let mut offset_in_buf = 0;

        while offset_in_buf < buf.len() {
            let page_offset = (current_addr & (Self::PAGE_SIZE as u64 - 1)) as usize;
            let to_read = (buf.len() - offset_in_buf).min(Self::PAGE_SIZE - page_offset);
            let dst = &mut buf[offset_in_buf..offset_in_buf + to_read];

            match self.get_page(current_addr) {
                Some(page) => dst.copy_from_slice(&page[page_offset..page_offset + to_read]),
                None => dst.fill(0),
            }

            current_addr += to_read as u64;
            offset_in_buf += to_read;
        }
    }

    /// Read `len` bytes into a new vector.
    pub fn read_vec(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.read_bytes(addr, &mut buf);
        buf
    }

    /// Write 64-bit words (little-endian) starting at `addr`.
    pub fn write_words(&mut self, addr: u64, words: &[u64]) {
        let mut bytes = vec![0u8; words.len() * 8];
        LittleEndian::write_u64_into(words, &mut bytes);
        self.write_bytes(addr, &bytes);
    }

    /// Read `count` 64-bit words (little-endian) starting at `addr`.
    pub fn read_words(&self, addr: u64, count: usize) -> Vec<u64> {
        let mut bytes = vec![0u8; count * 8];
        self.read_bytes(addr, &mut bytes);
        let mut words = vec![0u64; count];
        LittleEndian::read_u64_into(&bytes, &mut words);
        words
    }

    #[inline]
    pub fn read_u64(&self, addr: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf);
        LittleEndian::read_u64(&buf)
    }

    #[inline]
    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write_words(addr, &[value]);
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    /// Loads and stores served through the memory interface.
    pub fn request_counts(&self) -> (u64, u64) {
        (self.loads, self.stores)
    }

    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    /// Clear all memory and pending loads.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.pending.clear();
        self.total_bytes_written = 0;
        self.total_bytes_read = 0;
        self.loads = 0;
        self.stores = 0;
    }

    /// Hexdump a memory range for debugging.
    pub fn hexdump(&self, addr: u64, len: usize) -> String {
        let mut result = String::new();
        let mut buf = vec![0u8; len];
        self.read_bytes(addr, &mut buf);

        for (i, chunk) in buf.chunks(16).enumerate() {
            result.push_str(&format!("{:016x}: ", addr + (i * 16) as u64));
            for byte in chunk {
                result.push_str(&format!("{:02x} ", byte));
            }
            result.push('\n');
        }
        result
    }
}

impl MemoryInterface for HostMemory {
    fn load(&mut self, stream: StreamId, addr: u64, size: usize, cycle: u64) {
        let mut data = vec![0u8; size];
        self.read_bytes(addr, &mut data);
        self.total_bytes_read += size as u64;
        self.loads += 1;
        log::trace!("HostMemory load {} @{:#x} +{} (cycle {})", stream, addr, size, cycle);
        self.pending.push_back(PendingLoad {
            ready_cycle: cycle + self.latency,
            response: MemResponse { stream, addr, data },
        });
    }

    fn store(&mut self, stream: StreamId, addr: u64, data: &[u8], cycle: u64) {
        log::trace!("HostMemory store {} @{:#x} +{} (cycle {})", stream, addr, data.len(), cycle);
        self.stores += 1;
        self.write_bytes(addr, data);
    }

    fn poll_response(&mut self, cycle: u64) -> Option<MemResponse> {
        // Fixed latency keeps the queue sorted by ready cycle.
        if self.pending.front()?.ready_cycle > cycle {
            return None;
        }
        self.pending.pop_front().map(|p| p.response)
    }

    fn pending_loads(&self) -> usize {
        self.pending.len()
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMemory")
            .field("allocated_pages", &self.pages.len())
            .field("latency", &self.latency)
            .field("pending_loads", &self.pending.len())
            .field("total_bytes_written", &self.total_bytes_written)
            .field("total_bytes_read", &self.total_bytes_read)
            .finish()
    }
}

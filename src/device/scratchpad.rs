//! Banked scratchpad partitions.
//!
//! The scratchpad is one global address space cut into equal partitions,
//! one per core:
//!
//! ```text
//! global address:  | core 0 partition | core 1 partition | ... |
//!                  0                  P                  2P
//! owner = global / P        local = global mod P
//! ```
//!
//! Each engine owns only its own partition's backing store. Accesses to
//! other partitions go through the remote stream protocol.

use byteorder::{ByteOrder, LittleEndian};

use crate::device::CoreId;

/// Mapping between global scratch addresses and (core, local address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMap {
    core: CoreId,
    num_cores: usize,
    partition_size: u64,
}

impl PartitionMap {
    pub fn new(core: CoreId, num_cores: usize, partition_size: u64) -> Self {
        Self {
            core,
            num_cores: num_cores.max(1),
            partition_size: partition_size.max(1),
        }
    }

    /// Core this map is seen from.
    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    #[inline]
    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    #[inline]
    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    /// Core owning a global address, if any does.
    #[inline]
    pub fn owner(&self, global: u64) -> Option<CoreId> {
        let owner = global / self.partition_size;
        (owner < self.num_cores as u64).then_some(owner as CoreId)
    }

    #[inline]
    pub fn is_local(&self, global: u64) -> bool {
        self.owner(global) == Some(self.core)
    }

    /// Offset within the owning partition.
    #[inline]
    pub fn local(&self, global: u64) -> u64 {
        global % self.partition_size
    }

    /// Global address of `local` in `core`'s partition.
    #[inline]
    pub fn global(&self, core: CoreId, local: u64) -> u64 {
        core as u64 * self.partition_size + local % self.partition_size
    }
}

/// One core's scratchpad partition.
///
/// Addresses are local offsets; accesses running past the end wrap to
/// the start of the partition.
#[derive(Debug, Clone)]
pub struct Scratchpad {
    data: Vec<u8>,
    bytes_read: u64,
    bytes_written: u64,
}

impl Scratchpad {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size.max(1)],
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Read `buf.len()` bytes starting at local address `addr`.
    pub fn read(&mut self, addr: u64, buf: &mut [u8]) {
        let size = self.data.len();
        let mut offset = (addr % size as u64) as usize;
        let mut done = 0;
        while done < buf.len() {
            let n = (buf.len() - done).min(size - offset);
            buf[done..done + n].copy_from_slice(&self.data[offset..offset + n]);
            done += n;
            offset = 0;
        }
        self.bytes_read += buf.len() as u64;
    }

    /// Read `len` bytes into a new vector.
    pub fn read_vec(&mut self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf);
        buf
    }

    /// Write `data` starting at local address `addr`.
    pub fn write(&mut self, addr: u64, data: &[u8]) {
        let size = self.data.len();
        let mut offset = (addr % size as u64) as usize;
        let mut done = 0;
        while done < data.len() {
            let n = (data.len() - done).min(size - offset);
            self.data[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
            offset = 0;
        }
        self.bytes_written += data.len() as u64;
    }

    /// Peek a word without counting it as channel traffic.
    pub fn peek_u64(&self, addr: u64) -> u64 {
        let mut buf = [0u8; 8];
        let size = self.data.len();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.data[(addr as usize + i) % size];
        }
        LittleEndian::read_u64(&buf)
    }

    /// Peek bytes without counting them as channel traffic.
    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let size = self.data.len();
        (0..len).map(|i| self.data[(addr as usize + i) % size]).collect()
    }

    /// Preload words without counting them as channel traffic.
    pub fn load_words(&mut self, addr: u64, words: &[u64]) {
        let size = self.data.len();
        let mut buf = [0u8; 8];
        for (i, &word) in words.iter().enumerate() {
            LittleEndian::write_u64(&mut buf, word);
            for (j, &b) in buf.iter().enumerate() {
                self.data[(addr as usize + i * 8 + j) % size] = b;
            }
        }
    }

    /// (bytes read, bytes written) through the channels.
    pub fn traffic(&self) -> (u64, u64) {
        (self.bytes_read, self.bytes_written)
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_map() {
        let map = PartitionMap::new(1, 4, 0x1000);
        assert_eq!(map.owner(0x0FFF), Some(0));
        assert_eq!(map.owner(0x1000), Some(1));
        assert_eq!(map.owner(0x4000), None);
        assert!(map.is_local(0x1800));
        assert!(!map.is_local(0x2800));
        assert_eq!(map.local(0x2804), 0x804);
        assert_eq!(map.global(3, 0x10), 0x3010);
    }

    #[test]
    fn test_read_write() {
        let mut scr = Scratchpad::new(256);
        scr.write(0x10, &[1, 2, 3, 4]);
        assert_eq!(scr.read_vec(0x10, 4), vec![1, 2, 3, 4]);
        assert_eq!(scr.traffic(), (4, 4));
    }

    #[test]
    fn test_wraps_at_partition_end() {
        let mut scr = Scratchpad::new(16);
        scr.write(14, &[9, 8, 7, 6]);
        assert_eq!(scr.peek(0, 2), vec![7, 6]);
        assert_eq!(scr.read_vec(14, 4), vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_word_helpers() {
        let mut scr = Scratchpad::new(64);
        scr.load_words(8, &[0x0102_0304_0506_0708, 42]);
        assert_eq!(scr.peek_u64(8), 0x0102_0304_0506_0708);
        assert_eq!(scr.peek_u64(16), 42);
        assert_eq!(scr.traffic(), (0, 0));
    }
}

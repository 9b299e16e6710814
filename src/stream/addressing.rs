//! Address generation for strided and linear streams.
//!
//! A strided stream touches `num_strides` accesses of `access_size` bytes
//! each, the start of every access `stride` bytes after the previous one.
//! Channels move data in bandwidth quanta, so one access may take several
//! cycles; the generator tracks how far into the current access it is.
//!
//! # Address Generation
//!
//! For a stream with:
//! - Base address: 0x1000
//! - access_size = 24, stride = 64, num_strides = 3
//! - quantum = 16 bytes
//!
//! Generated chunks:
//! ```text
//! Access 0: (0x1000, 16), (0x1010, 8)
//! Access 1: (0x1040, 16), (0x1050, 8)
//! Access 2: (0x1080, 16), (0x1090, 8)
//! ```
//!
//! Strides only move forward; a generator never rewinds.

use crate::device::dae_spec::DATA_WIDTH;

/// Shape of a stream's address sequence, used for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPattern {
    /// No bytes to move.
    None,
    /// One contiguous block.
    PureContig,
    /// The same block read repeatedly (stride 0).
    SimpleRepeated,
    /// Blocks separated by gaps.
    SimpleStride,
    /// Blocks that overlap their neighbours.
    Overlap,
    /// Constant generator, no addresses.
    Const,
    /// Port to port recurrence.
    Recurrence,
    /// Data-dependent gather/scatter.
    Indirect,
}

impl AccessPattern {
    /// Number of pattern kinds.
    pub const COUNT: usize = 8;

    /// All patterns in index order.
    pub const ALL: [AccessPattern; Self::COUNT] = [
        AccessPattern::None,
        AccessPattern::PureContig,
        AccessPattern::SimpleRepeated,
        AccessPattern::SimpleStride,
        AccessPattern::Overlap,
        AccessPattern::Const,
        AccessPattern::Recurrence,
        AccessPattern::Indirect,
    ];

    /// Classify a strided access shape.
    pub fn classify(access_size: u64, stride: u64, num_strides: u64) -> Self {
        if access_size == 0 || num_strides == 0 {
            AccessPattern::None
        } else if access_size == stride || num_strides == 1 {
            AccessPattern::PureContig
        } else if stride == 0 {
            AccessPattern::SimpleRepeated
        } else if stride > access_size {
            AccessPattern::SimpleStride
        } else {
            AccessPattern::Overlap
        }
    }

    /// Dense index for histogram storage.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short name for reports.
    pub fn name(self) -> &'static str {
        match self {
            AccessPattern::None => "none",
            AccessPattern::PureContig => "contig",
            AccessPattern::SimpleRepeated => "repeated",
            AccessPattern::SimpleStride => "strided",
            AccessPattern::Overlap => "overlap",
            AccessPattern::Const => "const",
            AccessPattern::Recurrence => "recurrence",
            AccessPattern::Indirect => "indirect",
        }
    }
}

/// Strided address generator shared by every memory- or scratch-side stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearAccess {
    /// Start address of the current access.
    addr: u64,
    /// Bytes per access.
    access_size: u64,
    /// Distance between access starts.
    stride: u64,
    /// Accesses not yet completed.
    num_strides: u64,
    /// Accesses requested at creation.
    orig_strides: u64,
    /// Bytes of the current access already generated.
    bytes_in_access: u64,
    /// Low bytes dropped from each port word.
    shift_bytes: usize,
}

impl LinearAccess {
    /// Create a generator. A zero-sized access has no work.
    pub fn new(addr: u64, stride: u64, access_size: u64, num_strides: u64) -> Self {
        let num_strides = if access_size == 0 { 0 } else { num_strides };
        Self {
            addr,
            access_size,
            stride,
            num_strides,
            orig_strides: num_strides,
            bytes_in_access: 0,
            shift_bytes: 0,
        }
    }

    /// Drop the low `shift_bytes` bytes of every port word this stream moves.
    pub fn with_shift(mut self, shift_bytes: usize) -> Self {
        self.shift_bytes = shift_bytes.min(DATA_WIDTH - 1);
        self
    }

    /// True while accesses remain.
    #[inline]
    pub fn active(&self) -> bool {
        self.num_strides != 0
    }

    /// Address the next chunk starts at.
    #[inline]
    pub fn current_addr(&self) -> u64 {
        self.addr + self.bytes_in_access
    }

    #[inline]
    pub fn access_size(&self) -> u64 {
        self.access_size
    }

    #[inline]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Accesses not yet completed.
    #[inline]
    pub fn num_strides(&self) -> u64 {
        self.num_strides
    }

    #[inline]
    pub fn shift_bytes(&self) -> usize {
        self.shift_bytes
    }

    /// Bytes each port word carries after the shift.
    #[inline]
    pub fn element_bytes(&self) -> usize {
        DATA_WIDTH - self.shift_bytes
    }

    /// Bytes left in the current access.
    #[inline]
    pub fn remaining_in_access(&self) -> u64 {
        if self.active() {
            self.access_size - self.bytes_in_access
        } else {
            0
        }
    }

    /// Bytes left across all accesses.
    pub fn remaining_bytes(&self) -> u64 {
        if !self.active() {
            return 0;
        }
        self.num_strides * self.access_size - self.bytes_in_access
    }

    /// Size of the chunk `next_chunk(max)` would return, without advancing.
    #[inline]
    pub fn peek_len(&self, max: usize) -> usize {
        self.remaining_in_access().min(max as u64) as usize
    }

    /// Generate the next chunk of at most `max` bytes.
    ///
    /// Chunks never cross an access boundary. Returns None once finished
    /// or when `max` is zero.
    pub fn next_chunk(&mut self, max: usize) -> Option<(u64, usize)> {
        if !self.active() || max == 0 {
            return None;
        }

        let addr = self.current_addr();
        let len = self.peek_len(max);
        self.bytes_in_access += len as u64;

        if self.bytes_in_access == self.access_size {
            self.bytes_in_access = 0;
            self.addr = self.addr.wrapping_add(self.stride);
            self.num_strides -= 1;
        }

        Some((addr, len))
    }

    /// Classification of the original shape.
    pub fn pattern(&self) -> AccessPattern {
        AccessPattern::classify(self.access_size, self.stride, self.orig_strides)
    }
}

/// Linear cursor for streams writing a contiguous scratch range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchCursor {
    addr: u64,
    num_bytes: u64,
    shift_bytes: usize,
}

impl ScratchCursor {
    pub fn new(addr: u64, num_bytes: u64, shift_bytes: usize) -> Self {
        Self {
            addr,
            num_bytes,
            shift_bytes: shift_bytes.min(DATA_WIDTH - 1),
        }
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.num_bytes != 0
    }

    #[inline]
    pub fn current_addr(&self) -> u64 {
        self.addr
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.num_bytes
    }

    #[inline]
    pub fn shift_bytes(&self) -> usize {
        self.shift_bytes
    }

    /// Bytes each port word carries after the shift.
    #[inline]
    pub fn element_bytes(&self) -> usize {
        DATA_WIDTH - self.shift_bytes
    }

    /// Take the next chunk of at most `max` bytes.
    pub fn next_chunk(&mut self, max: usize) -> Option<(u64, usize)> {
        if !self.active() || max == 0 {
            return None;
        }
        let len = self.num_bytes.min(max as u64);
        let addr = self.addr;
        self.addr += len;
        self.num_bytes -= len;
        Some((addr, len as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_chunks() {
        let mut gen = LinearAccess::new(0x1000, 64, 64, 4);
        assert_eq!(gen.pattern(), AccessPattern::PureContig);
        assert_eq!(gen.remaining_bytes(), 256);

        let chunks: Vec<_> = std::iter::from_fn(|| gen.next_chunk(64)).collect();
        assert_eq!(chunks, vec![(0x1000, 64), (0x1040, 64), (0x1080, 64), (0x10C0, 64)]);
        assert!(!gen.active());
        assert_eq!(gen.remaining_bytes(), 0);
        assert_eq!(gen.next_chunk(64), None);
    }

    #[test]
    fn test_chunks_split_access() {
        let mut gen = LinearAccess::new(0x1000, 64, 24, 3);
        assert_eq!(gen.pattern(), AccessPattern::SimpleStride);

        assert_eq!(gen.next_chunk(16), Some((0x1000, 16)));
        assert_eq!(gen.remaining_in_access(), 8);
        assert_eq!(gen.next_chunk(16), Some((0x1010, 8)));
        assert_eq!(gen.num_strides(), 2);
        assert_eq!(gen.next_chunk(16), Some((0x1040, 16)));
        assert_eq!(gen.remaining_bytes(), 8 + 24);
    }

    #[test]
    fn test_active_tracks_stride_count() {
        let mut gen = LinearAccess::new(0, 8, 8, 2);
        assert!(gen.active());
        gen.next_chunk(8);
        assert!(gen.active());
        gen.next_chunk(8);
        assert!(!gen.active());
        assert_eq!(gen.num_strides(), 0);
    }

    #[test]
    fn test_zero_sized_access_is_inactive() {
        let gen = LinearAccess::new(0x40, 8, 0, 10);
        assert!(!gen.active());
        assert_eq!(gen.pattern(), AccessPattern::None);
    }

    #[test]
    fn test_pattern_classification() {
        assert_eq!(AccessPattern::classify(8, 0, 4), AccessPattern::SimpleRepeated);
        assert_eq!(AccessPattern::classify(16, 8, 4), AccessPattern::Overlap);
        assert_eq!(AccessPattern::classify(16, 100, 1), AccessPattern::PureContig);
        assert_eq!(AccessPattern::classify(16, 16, 0), AccessPattern::None);
    }

    #[test]
    fn test_repeated_stride_rereads() {
        let mut gen = LinearAccess::new(0x200, 0, 8, 3);
        let addrs: Vec<_> = std::iter::from_fn(|| gen.next_chunk(64)).map(|(a, _)| a).collect();
        assert_eq!(addrs, vec![0x200, 0x200, 0x200]);
    }

    #[test]
    fn test_scratch_cursor() {
        let mut cur = ScratchCursor::new(0x100, 20, 0);
        assert_eq!(cur.element_bytes(), 8);
        assert_eq!(cur.next_chunk(16), Some((0x100, 16)));
        assert_eq!(cur.next_chunk(16), Some((0x110, 4)));
        assert!(!cur.active());
        assert_eq!(cur.next_chunk(16), None);
    }

    #[test]
    fn test_shift_limits_element_bytes() {
        let gen = LinearAccess::new(0, 8, 8, 1).with_shift(4);
        assert_eq!(gen.element_bytes(), 4);
        let cur = ScratchCursor::new(0, 8, 12);
        assert_eq!(cur.shift_bytes(), 7);
    }
}

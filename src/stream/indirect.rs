//! Index decoding for indirect (gather/scatter) streams.
//!
//! Indices arrive packed in 64-bit port words. An index type selects the
//! index width, and a per-word cursor walks the packed indices from the
//! least significant end:
//!
//! ```text
//! type 0: 1 x 8-byte index per word
//! type 1: 2 x 4-byte indices
//! type 2: 4 x 2-byte indices
//! type 3: 8 x 1-byte indices
//! ```
//!
//! Every index selects one `DATA_WIDTH` element at `index_addr + index * DATA_WIDTH`.

use crate::device::dae_spec::DATA_WIDTH;

/// Width of one packed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    B8,
    B4,
    B2,
    B1,
}

impl IndexWidth {
    /// Decode the command's index type field.
    pub fn from_type(ind_type: u8) -> Option<Self> {
        match ind_type {
            0 => Some(IndexWidth::B8),
            1 => Some(IndexWidth::B4),
            2 => Some(IndexWidth::B2),
            3 => Some(IndexWidth::B1),
            _ => None,
        }
    }

    /// Bytes per index.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            IndexWidth::B8 => 8,
            IndexWidth::B4 => 4,
            IndexWidth::B2 => 2,
            IndexWidth::B1 => 1,
        }
    }

    #[inline]
    pub fn mask(self) -> u64 {
        match self {
            IndexWidth::B8 => u64::MAX,
            IndexWidth::B4 => 0xFFFF_FFFF,
            IndexWidth::B2 => 0xFFFF,
            IndexWidth::B1 => 0xFF,
        }
    }

    /// Indices packed in one port word.
    #[inline]
    pub fn per_word(self) -> usize {
        DATA_WIDTH / self.bytes()
    }
}

/// Address state of an indirect stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectAccess {
    ind_port: usize,
    width: IndexWidth,
    index_addr: u64,
    num_elements: u64,
    index_in_word: usize,
}

impl IndirectAccess {
    pub fn new(ind_port: usize, width: IndexWidth, index_addr: u64, num_elements: u64) -> Self {
        Self {
            ind_port,
            width,
            index_addr,
            num_elements,
            index_in_word: 0,
        }
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.num_elements != 0
    }

    /// Input port the packed indices are read from.
    #[inline]
    pub fn ind_port(&self) -> usize {
        self.ind_port
    }

    #[inline]
    pub fn width(&self) -> IndexWidth {
        self.width
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.num_elements
    }

    /// Extract the index under the cursor from a packed word.
    #[inline]
    pub fn calc_index(&self, word: u64) -> u64 {
        let shift = self.index_in_word * self.width.bytes() * 8;
        // B8 has a single index per word, so the shift is always zero there.
        (word >> shift) & self.width.mask()
    }

    /// Element address selected by the index under the cursor.
    #[inline]
    pub fn element_addr(&self, word: u64) -> u64 {
        self.index_addr
            .wrapping_add(self.calc_index(word).wrapping_mul(DATA_WIDTH as u64))
    }

    /// Consume one element.
    ///
    /// Returns true when the current index word is used up (all its
    /// indices consumed, or the stream just finished) and should be popped.
    pub fn pop_elem(&mut self) -> bool {
        if !self.active() {
            return false;
        }
        self.num_elements -= 1;
        self.index_in_word += 1;
        if self.index_in_word == self.width.per_word() || self.num_elements == 0 {
            self.index_in_word = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_width_decode() {
        assert_eq!(IndexWidth::from_type(0), Some(IndexWidth::B8));
        assert_eq!(IndexWidth::from_type(3), Some(IndexWidth::B1));
        assert_eq!(IndexWidth::from_type(4), None);
        assert_eq!(IndexWidth::B2.per_word(), 4);
    }

    #[test]
    fn test_packed_indices() {
        let mut acc = IndirectAccess::new(5, IndexWidth::B2, 0x4000, 6);
        let word = 0x0004_0003_0002_0001u64;

        let mut addrs = Vec::new();
        let mut pops = Vec::new();
        for _ in 0..4 {
            addrs.push(acc.element_addr(word));
            pops.push(acc.pop_elem());
        }
        assert_eq!(addrs, vec![0x4008, 0x4010, 0x4018, 0x4020]);
        assert_eq!(pops, vec![false, false, false, true]);
        assert_eq!(acc.remaining(), 2);
    }

    #[test]
    fn test_partial_word_popped_at_end() {
        let mut acc = IndirectAccess::new(0, IndexWidth::B1, 0, 3);
        assert!(!acc.pop_elem());
        assert!(!acc.pop_elem());
        assert!(acc.pop_elem());
        assert!(!acc.active());
        assert!(!acc.pop_elem());
    }

    #[test]
    fn test_full_width_index() {
        let acc = IndirectAccess::new(0, IndexWidth::B8, 0x100, 1);
        assert_eq!(acc.calc_index(0x1234_5678_9ABC), 0x1234_5678_9ABC);
        assert_eq!(acc.element_addr(3), 0x118);
    }
}

//! Vector ports between the stream engine and the compute fabric.
//!
//! Input ports carry words from streams into the fabric; output ports carry
//! fabric results back out to streams. Each port is a bounded FIFO plus a
//! small status machine that keeps streams of different location kinds
//! from interleaving on one port.
//!
//! # Status
//!
//! ```text
//!            claim(loc)               finish_stream()
//!   FREE ──────────────► BUSY ─────────────────────► COMPLETE
//!    ▲                    ▲                              │
//!    │                    └──── claim(same loc) ─────────┤
//!    └──────────── drained (outstanding == 0) ───────────┘
//! ```
//!
//! # Fabric lanes
//!
//! A port mapped onto `lanes` fabric lanes reformats its FIFO into
//! per-lane staging buffers: every group of `lanes` words becomes one
//! instance, one word per lane. Ports with zero lanes are not connected
//! to the fabric and keep their data in the FIFO (index ports, for one).

use std::collections::VecDeque;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use smallvec::SmallVec;

use crate::device::dae_spec::{DATA_WIDTH, LANE_DEPTH};
use crate::error::PortError;

/// Resource kind feeding (input) or draining (output) a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Loc {
    #[default]
    None,
    Memory,
    Scratch,
    Port,
    Const,
}

/// Port status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortStatus {
    #[default]
    Free,
    Busy,
    Complete,
}

/// Direction relative to the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Engine to fabric.
    Input,
    /// Fabric to engine.
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// Pack bytes into little-endian port words, zero-padding the last word.
pub fn pack_words(bytes: &[u8]) -> SmallVec<[u64; 8]> {
    bytes
        .chunks(DATA_WIDTH)
        .map(|chunk| {
            if chunk.len() == DATA_WIDTH {
                LittleEndian::read_u64(chunk)
            } else {
                let mut buf = [0u8; DATA_WIDTH];
                buf[..chunk.len()].copy_from_slice(chunk);
                LittleEndian::read_u64(&buf)
            }
        })
        .collect()
}

/// Unpack words into bytes, dropping the low `shift_bytes` bytes of each word.
pub fn unpack_words(words: &[u64], shift_bytes: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * (DATA_WIDTH - shift_bytes));
    let mut buf = [0u8; DATA_WIDTH];
    for &word in words {
        LittleEndian::write_u64(&mut buf, word);
        out.extend_from_slice(&buf[shift_bytes..]);
    }
    out
}

/// One vector port.
#[derive(Debug, Clone)]
pub struct VectorPort {
    id: usize,
    direction: PortDirection,
    status: PortStatus,
    loc: Loc,
    /// Streams claimed and not yet drained.
    outstanding: u32,
    fifo: VecDeque<u64>,
    capacity: usize,
    /// FIFO space promised to in-flight responses.
    reserved: usize,
    lanes: usize,
    staging: Vec<VecDeque<u64>>,
    /// Running count of words pushed into the FIFO.
    pushed: u64,
    /// Running count of words popped from the FIFO.
    popped: u64,
    /// Pop counts at which a finished stream's data is fully drained.
    release_marks: VecDeque<u64>,
}

impl VectorPort {
    pub fn new(id: usize, direction: PortDirection, capacity: usize) -> Self {
        Self {
            id,
            direction,
            status: PortStatus::Free,
            loc: Loc::None,
            outstanding: 0,
            fifo: VecDeque::with_capacity(capacity),
            capacity,
            reserved: 0,
            lanes: 0,
            staging: Vec::new(),
            pushed: 0,
            popped: 0,
            release_marks: VecDeque::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    #[inline]
    pub fn status(&self) -> PortStatus {
        self.status
    }

    /// Location of the streams currently owning the port.
    #[inline]
    pub fn loc(&self) -> Loc {
        self.loc
    }

    #[inline]
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Whether a stream of location `loc` may claim the port now.
    #[inline]
    pub fn can_take(&self, loc: Loc) -> bool {
        match self.status {
            PortStatus::Free => true,
            PortStatus::Complete => self.loc == loc,
            PortStatus::Busy => false,
        }
    }

    /// Claim the port for a stream of location `loc`.
    pub fn claim(&mut self, loc: Loc) -> Result<(), PortError> {
        if !self.can_take(loc) {
            return Err(PortError::Unavailable {
                port: self.id,
                direction: self.direction,
                status: self.status,
                owner: self.loc,
                requested: loc,
            });
        }
        self.status = PortStatus::Busy;
        self.loc = loc;
        self.outstanding += 1;
        Ok(())
    }

    /// The claiming stream produced or consumed its last word.
    ///
    /// The claim is released once every word the stream pushed has been
    /// popped again (input ports), or immediately (output ports, where
    /// the stream itself is the consumer).
    pub fn finish_stream(&mut self) {
        self.status = PortStatus::Complete;
        let mark = match self.direction {
            PortDirection::Input => self.pushed,
            PortDirection::Output => self.popped,
        };
        self.release_marks.push_back(mark);
        self.update_status();
    }

    /// Release claims whose data has drained. Returns true if the status changed.
    pub fn update_status(&mut self) -> bool {
        let before = self.status;
        while let Some(&mark) = self.release_marks.front() {
            if self.popped < mark {
                break;
            }
            self.release_marks.pop_front();
            self.outstanding = self.outstanding.saturating_sub(1);
            if self.outstanding == 0 && self.status == PortStatus::Complete {
                self.status = PortStatus::Free;
                self.loc = Loc::None;
            }
        }
        before != self.status
    }

    // ------------------------------------------------------------------
    // FIFO
    // ------------------------------------------------------------------

    #[inline]
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Words that can still be pushed or reserved.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.fifo.len() + self.reserved)
    }

    #[inline]
    pub fn can_push(&self, words: usize) -> bool {
        self.free_space() >= words
    }

    /// Hold space for words that will arrive later.
    pub fn reserve(&mut self, words: usize) -> bool {
        if !self.can_push(words) {
            return false;
        }
        self.reserved += words;
        true
    }

    #[inline]
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Push a word. Returns false (and drops nothing) when full.
    pub fn push(&mut self, word: u64) -> bool {
        if self.free_space() == 0 {
            return false;
        }
        self.fifo.push_back(word);
        self.pushed += 1;
        true
    }

    /// Push bytes as words, all or nothing. Returns the number of words
    /// pushed, zero when they do not all fit.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> usize {
        let words = pack_words(bytes);
        if !self.can_push(words.len()) {
            return 0;
        }
        for &w in &words {
            self.push(w);
        }
        words.len()
    }

    /// Push bytes into space held by an earlier `reserve`.
    pub fn push_reserved_bytes(&mut self, bytes: &[u8]) -> usize {
        let words = pack_words(bytes);
        let claimed = words.len().min(self.reserved);
        self.reserved -= claimed;
        words.into_iter().take_while(|&w| self.push(w)).count()
    }

    #[inline]
    pub fn peek(&self) -> Option<u64> {
        self.fifo.front().copied()
    }

    pub fn pop(&mut self) -> Option<u64> {
        let word = self.fifo.pop_front()?;
        self.popped += 1;
        Some(word)
    }

    /// Pop up to `n` words.
    pub fn pop_many(&mut self, n: usize) -> SmallVec<[u64; 8]> {
        let n = n.min(self.fifo.len());
        self.popped += n as u64;
        self.fifo.drain(..n).collect()
    }

    /// Words in FIFO order, for inspection.
    pub fn words(&self) -> impl Iterator<Item = u64> + '_ {
        self.fifo.iter().copied()
    }

    // ------------------------------------------------------------------
    // Fabric lanes
    // ------------------------------------------------------------------

    #[inline]
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Map the port onto `lanes` fabric lanes (0 disconnects it).
    pub fn set_lanes(&mut self, lanes: usize) {
        self.lanes = lanes;
        self.staging = vec![VecDeque::with_capacity(LANE_DEPTH); lanes];
    }

    /// Instances staged and ready for the fabric.
    #[inline]
    pub fn num_ready(&self) -> usize {
        self.staging.iter().map(VecDeque::len).min().unwrap_or(0)
    }

    /// Move complete word groups from the FIFO into the lane buffers.
    pub fn reformat_in(&mut self) -> usize {
        if self.lanes == 0 {
            return 0;
        }
        let mut moved = 0;
        while self.fifo.len() >= self.lanes && self.num_ready() < LANE_DEPTH {
            for lane in 0..self.lanes {
                if let Some(word) = self.fifo.pop_front() {
                    self.staging[lane].push_back(word);
                }
            }
            self.popped += self.lanes as u64;
            moved += 1;
        }
        moved
    }

    /// Take one instance (one word per lane).
    pub fn pop_instance(&mut self) -> Option<SmallVec<[u64; 8]>> {
        if self.lanes == 0 || self.num_ready() == 0 {
            return None;
        }
        Some(self.staging.iter_mut().filter_map(VecDeque::pop_front).collect())
    }

    /// Whether the lane buffers can take another instance.
    #[inline]
    pub fn can_push_instance(&self) -> bool {
        self.lanes != 0 && self.staging.iter().all(|lane| lane.len() < LANE_DEPTH)
    }

    /// Stage one fabric output instance. `values` beyond the lane count are ignored.
    pub fn push_instance(&mut self, values: &[u64]) -> bool {
        if !self.can_push_instance() || values.len() < self.lanes {
            return false;
        }
        for (lane, &value) in self.staging.iter_mut().zip(values) {
            lane.push_back(value);
        }
        true
    }

    /// Move staged output instances into the FIFO, lane order within each.
    pub fn reformat_out(&mut self) -> usize {
        if self.lanes == 0 {
            return 0;
        }
        let mut moved = 0;
        while self.num_ready() > 0 && self.free_space() >= self.lanes {
            for lane in 0..self.lanes {
                if let Some(word) = self.staging[lane].pop_front() {
                    self.fifo.push_back(word);
                }
            }
            self.pushed += self.lanes as u64;
            moved += 1;
        }
        moved
    }

    // ------------------------------------------------------------------
    // Reset
    // ------------------------------------------------------------------

    /// Drop buffered data, keeping status and lane mapping.
    pub fn clear_data(&mut self) {
        self.popped += self.fifo.len() as u64;
        self.fifo.clear();
        for lane in &mut self.staging {
            lane.clear();
        }
        self.update_status();
    }

    /// Return to the freshly configured state.
    pub fn reset(&mut self) {
        let (id, direction, capacity) = (self.id, self.direction, self.capacity);
        *self = Self::new(id, direction, capacity);
    }
}

/// A bank of ports of one direction.
#[derive(Debug, Clone)]
pub struct PortInterface {
    direction: PortDirection,
    ports: Vec<VectorPort>,
}

impl PortInterface {
    pub fn new(direction: PortDirection, count: usize, capacity: usize) -> Self {
        Self {
            direction,
            ports: (0..count).map(|id| VectorPort::new(id, direction, capacity)).collect(),
        }
    }

    #[inline]
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    #[inline]
    pub fn get(&self, id: usize) -> Option<&VectorPort> {
        self.ports.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: usize) -> Option<&mut VectorPort> {
        self.ports.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VectorPort> {
        self.ports.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VectorPort> {
        self.ports.iter_mut()
    }

    /// Ports connected to the fabric.
    pub fn mapped(&self) -> impl Iterator<Item = &VectorPort> {
        self.ports.iter().filter(|p| p.lanes() != 0)
    }

    /// Release drained claims on every port. Returns the ports that changed.
    pub fn update_status(&mut self) -> usize {
        self.ports.iter_mut().filter_map(|p| p.update_status().then_some(())).count()
    }

    /// True when no port holds data, reservations or claims.
    pub fn is_quiescent(&self) -> bool {
        self.ports
            .iter()
            .all(|p| p.status() == PortStatus::Free && p.reserved() == 0)
    }

    pub fn clear_data(&mut self) {
        self.ports.iter_mut().for_each(VectorPort::clear_data);
    }

    pub fn reset(&mut self) {
        self.ports.iter_mut().for_each(VectorPort::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_bytes_all_or_nothing() {
        let mut port = VectorPort::new(0, PortDirection::Input, 4);
        port.push(1);
        port.push(2);
        assert_eq!(port.push_bytes(&[9; 24]), 0);
        assert_eq!(port.len(), 2);
        assert_eq!(port.push_bytes(&[9; 16]), 2);
        assert_eq!(port.len(), 4);
    }

    #[test]
    fn test_pack_unpack() {
        let words = pack_words(&[1, 0, 0, 0, 0, 0, 0, 0, 2, 3]);
        assert_eq!(words.as_slice(), &[1, 0x0302]);
        assert_eq!(unpack_words(&[0x0807_0605_0403_0201], 0), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(unpack_words(&[0x0807_0605_0403_0201], 6), vec![7, 8]);
        assert!(pack_words(&[]).is_empty());
    }

    #[test]
    fn test_fifo_backpressure() {
        let mut port = VectorPort::new(0, PortDirection::Input, 2);
        assert!(port.push(1));
        assert!(port.push(2));
        assert!(!port.push(3));
        assert_eq!(port.pop(), Some(1));
        assert_eq!(port.free_space(), 1);
    }

    #[test]
    fn test_reservation_holds_space() {
        let mut port = VectorPort::new(0, PortDirection::Input, 4);
        assert!(port.reserve(3));
        assert_eq!(port.free_space(), 1);
        assert!(!port.reserve(2));
        assert_eq!(port.push_reserved_bytes(&[0xAA; 24]), 3);
        assert_eq!(port.reserved(), 0);
        assert_eq!(port.len(), 3);
    }

    #[test]
    fn test_status_lifecycle() {
        let mut port = VectorPort::new(3, PortDirection::Input, 8);
        assert!(port.can_take(Loc::Memory));
        port.claim(Loc::Memory).unwrap();
        assert_eq!(port.status(), PortStatus::Busy);
        assert!(!port.can_take(Loc::Memory));
        assert!(port.claim(Loc::Scratch).is_err());

        port.push(10);
        port.push(11);
        port.finish_stream();
        assert_eq!(port.status(), PortStatus::Complete);
        assert!(port.can_take(Loc::Memory));
        assert!(!port.can_take(Loc::Const));

        port.pop();
        port.update_status();
        assert_eq!(port.status(), PortStatus::Complete);
        port.pop();
        assert!(port.update_status());
        assert_eq!(port.status(), PortStatus::Free);
        assert_eq!(port.outstanding(), 0);
        assert_eq!(port.loc(), Loc::None);
    }

    #[test]
    fn test_same_location_follow_on() {
        let mut port = VectorPort::new(1, PortDirection::Input, 8);
        port.claim(Loc::Scratch).unwrap();
        port.push(1);
        port.finish_stream();

        // Second stream takes over before the first one's data drained.
        port.claim(Loc::Scratch).unwrap();
        assert_eq!(port.outstanding(), 2);
        port.push(2);

        port.pop();
        port.update_status();
        assert_eq!(port.status(), PortStatus::Busy);
        assert_eq!(port.outstanding(), 1);

        port.finish_stream();
        port.pop();
        port.update_status();
        assert_eq!(port.status(), PortStatus::Free);
    }

    #[test]
    fn test_output_port_releases_on_finish() {
        let mut port = VectorPort::new(0, PortDirection::Output, 8);
        port.claim(Loc::Memory).unwrap();
        port.push(5);
        port.pop();
        port.finish_stream();
        assert_eq!(port.status(), PortStatus::Free);
    }

    #[test]
    fn test_lane_reformat() {
        let mut port = VectorPort::new(0, PortDirection::Input, 16);
        port.set_lanes(2);
        for w in 1..=5 {
            port.push(w);
        }
        assert_eq!(port.reformat_in(), 2);
        assert_eq!(port.len(), 1);
        assert_eq!(port.num_ready(), 2);
        assert_eq!(port.pop_instance().unwrap().as_slice(), &[1, 2]);
        assert_eq!(port.pop_instance().unwrap().as_slice(), &[3, 4]);
        assert!(port.pop_instance().is_none());
    }

    #[test]
    fn test_output_lanes() {
        let mut port = VectorPort::new(0, PortDirection::Output, 16);
        assert!(!port.push_instance(&[1]));
        port.set_lanes(2);
        assert!(port.push_instance(&[1, 2]));
        assert!(port.push_instance(&[3, 4]));
        assert_eq!(port.reformat_out(), 2);
        assert_eq!(port.words().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_interface_bank() {
        let mut bank = PortInterface::new(PortDirection::Output, 4, 8);
        assert_eq!(bank.len(), 4);
        assert!(bank.get(4).is_none());
        bank.get_mut(2).unwrap().set_lanes(1);
        assert_eq!(bank.mapped().count(), 1);
        assert!(bank.is_quiescent());
        bank.get_mut(1).unwrap().claim(Loc::Port).unwrap();
        assert!(!bank.is_quiescent());
        bank.reset();
        assert!(bank.is_quiescent());
        assert_eq!(bank.mapped().count(), 0);
    }
}

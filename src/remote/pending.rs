//! Update tags and the pending-request table.
//!
//! A tag is 16 bits: the sending core in the high 6 bits and a per-core
//! sequence number in the low 10 bits, wrapping every 1024 updates.
//!
//! The receiver records each manifest under its tag and fans the value
//! bytes that follow out to every recorded destination. Because tags
//! wrap, a tag may be reused while an older entry is still waiting for
//! values. Entries for one tag therefore queue in arrival order and values
//! always feed the oldest one; one sender's packets reach one receiver in
//! order, so a reused tag never touches an unretired entry.

use std::collections::{HashMap, VecDeque};

use crate::device::dae_spec::TAG_PERIOD;
use crate::device::{CoreId, Scratchpad};

/// Update tag.
pub type Tag = u16;

/// Bits of the tag holding the sequence number.
const SEQ_BITS: u32 = 10;

/// Compose a tag from a core and a sequence number.
#[inline]
pub fn make_tag(core: CoreId, seq: u16) -> Tag {
    ((core as u16 & 0x3F) << SEQ_BITS) | (seq % TAG_PERIOD)
}

/// Sending core of a tag.
#[inline]
pub fn tag_core(tag: Tag) -> CoreId {
    (tag >> SEQ_BITS) as CoreId
}

/// Sequence number of a tag.
#[inline]
pub fn tag_seq(tag: Tag) -> u16 {
    tag & (TAG_PERIOD - 1)
}

/// Per-core tag source.
#[derive(Debug, Clone)]
pub struct TagAllocator {
    core: CoreId,
    last: u16,
}

impl TagAllocator {
    pub fn new(core: CoreId) -> Self {
        Self { core, last: 0 }
    }

    /// Next tag; the first one issued has sequence number 1.
    pub fn next_tag(&mut self) -> Tag {
        self.last = (self.last + 1) % TAG_PERIOD;
        make_tag(self.core, self.last)
    }
}

/// How update value bytes combine with the scratchpad contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateOp {
    /// Replace the destination bytes.
    #[default]
    Overwrite,
    /// Wrapping add, little-endian, per 8-byte lane. A short tail adds at
    /// its own width.
    Add,
}

impl UpdateOp {
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            UpdateOp::Add
        } else {
            UpdateOp::Overwrite
        }
    }

    #[inline]
    pub fn bit(self) -> bool {
        self == UpdateOp::Add
    }

    /// Combine `value` into `dest` in place.
    pub fn combine(self, dest: &mut [u8], value: &[u8]) {
        match self {
            UpdateOp::Overwrite => {
                let n = dest.len().min(value.len());
                dest[..n].copy_from_slice(&value[..n]);
            }
            UpdateOp::Add => {
                for (lane, add) in dest.chunks_mut(8).zip(value.chunks(8)) {
                    let mut carry = 0u16;
                    for (d, &v) in lane.iter_mut().zip(add) {
                        let sum = *d as u16 + v as u16 + carry;
                        *d = sum as u8;
                        carry = sum >> 8;
                    }
                }
            }
        }
    }
}

/// Write produced by a remote STORE or an update fan-out, in local addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchWrite {
    pub addr: u64,
    pub data: Vec<u8>,
    pub op: UpdateOp,
}

impl ScratchWrite {
    /// Plain write of `data` at `addr`.
    pub fn store(addr: u64, data: Vec<u8>) -> Self {
        Self { addr, data, op: UpdateOp::Overwrite }
    }

    /// Perform the write. Returns the bytes written.
    pub fn apply(&self, scratchpad: &mut Scratchpad) -> usize {
        match self.op {
            UpdateOp::Overwrite => scratchpad.write(self.addr, &self.data),
            UpdateOp::Add => {
                let mut current = scratchpad.read_vec(self.addr, self.data.len());
                self.op.combine(&mut current, &self.data);
                scratchpad.write(self.addr, &current);
            }
        }
        self.data.len()
    }
}

/// Destinations waiting for one update's value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Local scratch addresses.
    pub destinations: Vec<u64>,
    /// Value bytes the manifest announced.
    pub expected: usize,
    /// Value bytes applied so far.
    pub received: usize,
    pub op: UpdateOp,
}

impl PendingEntry {
    #[inline]
    pub fn bytes_waiting(&self) -> usize {
        self.expected - self.received
    }
}

/// Tag to pending-destination table, owned by one core's protocol.
#[derive(Debug, Default, Clone)]
pub struct PendingTable {
    entries: HashMap<Tag, VecDeque<PendingEntry>>,
    dropped_values: u64,
    retired: u64,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a manifest. Manifests expecting no value bytes retire at once.
    pub fn insert(&mut self, tag: Tag, destinations: Vec<u64>, expected: usize, op: UpdateOp) {
        if expected == 0 || destinations.is_empty() {
            self.retired += 1;
            return;
        }
        let queue = self.entries.entry(tag).or_default();
        if !queue.is_empty() {
            log::debug!(
                "Pending tag {:#06x} reused with {} entries live; queueing",
                tag,
                queue.len()
            );
        }
        queue.push_back(PendingEntry {
            destinations,
            expected,
            received: 0,
            op,
        });
    }

    /// Apply value bytes for `tag`.
    ///
    /// Returns the writes to perform, one per destination. Bytes for an
    /// unknown tag, or beyond what the oldest entry still expects, are
    /// dropped and counted.
    pub fn apply(&mut self, tag: Tag, bytes: &[u8]) -> Vec<ScratchWrite> {
        let Some(queue) = self.entries.get_mut(&tag) else {
            self.dropped_values += bytes.len() as u64;
            log::warn!("Pending: {} value bytes for unknown tag {:#06x} dropped", bytes.len(), tag);
            return Vec::new();
        };
        let Some(entry) = queue.front_mut() else {
            self.dropped_values += bytes.len() as u64;
            return Vec::new();
        };

        let take = bytes.len().min(entry.bytes_waiting());
        if take < bytes.len() {
            self.dropped_values += (bytes.len() - take) as u64;
            log::warn!(
                "Pending: tag {:#06x} got {} bytes past its expected count",
                tag,
                bytes.len() - take
            );
        }

        let offset = entry.received as u64;
        let writes = entry
            .destinations
            .iter()
            .map(|&dest| ScratchWrite {
                addr: dest + offset,
                data: bytes[..take].to_vec(),
                op: entry.op,
            })
            .collect();
        entry.received += take;

        if entry.bytes_waiting() == 0 {
            queue.pop_front();
            self.retired += 1;
            if queue.is_empty() {
                self.entries.remove(&tag);
            }
        }
        writes
    }

    /// Live entries for a tag.
    pub fn live(&self, tag: Tag) -> usize {
        self.entries.get(&tag).map_or(0, VecDeque::len)
    }

    /// Oldest live entry for a tag.
    pub fn front(&self, tag: Tag) -> Option<&PendingEntry> {
        self.entries.get(&tag).and_then(VecDeque::front)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entries across all tags.
    pub fn len(&self) -> usize {
        self.entries.values().map(VecDeque::len).sum()
    }

    /// Value bytes dropped for unknown tags or overrun.
    pub fn dropped_values(&self) -> u64 {
        self.dropped_values
    }

    pub fn retired(&self) -> u64 {
        self.retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_layout() {
        let tag = make_tag(5, 3);
        assert_eq!(tag, (5 << 10) | 3);
        assert_eq!(tag_core(tag), 5);
        assert_eq!(tag_seq(tag), 3);
    }

    #[test]
    fn test_tag_wraps_after_period() {
        let mut tags = TagAllocator::new(2);
        let first = tags.next_tag();
        assert_eq!(tag_seq(first), 1);
        for _ in 1..TAG_PERIOD {
            let tag = tags.next_tag();
            assert_eq!(tag_core(tag), 2);
            assert_ne!(tag, first);
        }
        assert_eq!(tags.next_tag(), first);
    }

    #[test]
    fn test_fan_out_to_destinations() {
        let mut table = PendingTable::new();
        table.insert(9, vec![0x10, 0x40], 4, UpdateOp::Overwrite);
        assert_eq!(table.len(), 1);

        let writes = table.apply(9, &[1, 2]);
        assert_eq!(
            writes,
            vec![
                ScratchWrite::store(0x10, vec![1, 2]),
                ScratchWrite::store(0x40, vec![1, 2]),
            ]
        );
        assert_eq!(table.front(9).unwrap().bytes_waiting(), 2);

        let writes = table.apply(9, &[3, 4]);
        assert_eq!(writes[1], ScratchWrite::store(0x42, vec![3, 4]));
        assert!(table.is_empty());
        assert_eq!(table.retired(), 1);
    }

    #[test]
    fn test_unknown_tag_dropped() {
        let mut table = PendingTable::new();
        assert!(table.apply(77, &[1, 2, 3]).is_empty());
        assert_eq!(table.dropped_values(), 3);
    }

    #[test]
    fn test_overrun_dropped() {
        let mut table = PendingTable::new();
        table.insert(1, vec![0], 2, UpdateOp::Overwrite);
        let writes = table.apply(1, &[5, 6, 7]);
        assert_eq!(writes[0].data, vec![5, 6]);
        assert_eq!(table.dropped_values(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_reused_tag_queues_behind_live_entry() {
        let mut table = PendingTable::new();
        table.insert(3, vec![0x100], 2, UpdateOp::Overwrite);
        table.insert(3, vec![0x200], 2, UpdateOp::Overwrite);
        assert_eq!(table.live(3), 2);

        let first = table.apply(3, &[1, 1]);
        assert_eq!(first, vec![ScratchWrite::store(0x100, vec![1, 1])]);
        assert_eq!(table.live(3), 1);

        let second = table.apply(3, &[2, 2]);
        assert_eq!(second, vec![ScratchWrite::store(0x200, vec![2, 2])]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_add_entry_carries_op() {
        let mut table = PendingTable::new();
        table.insert(6, vec![0x20], 8, UpdateOp::Add);
        let writes = table.apply(6, &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(writes[0].op, UpdateOp::Add);

        let mut scratch = Scratchpad::new(256);
        scratch.load_words(0x20, &[41]);
        writes[0].apply(&mut scratch);
        writes[0].apply(&mut scratch);
        assert_eq!(scratch.peek_u64(0x20), 43);
    }

    #[test]
    fn test_add_wraps_per_lane() {
        let mut dest = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        let value = vec![1, 0, 0, 0, 0, 0, 0, 0, 1, 0];
        UpdateOp::Add.combine(&mut dest, &value);
        assert_eq!(&dest[..8], &[0; 8]);
        assert_eq!(&dest[8..], &[0x00, 0x01]);

        let mut dest = vec![9, 9, 9];
        UpdateOp::Overwrite.combine(&mut dest, &[1, 2, 3]);
        assert_eq!(dest, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_manifest_retires() {
        let mut table = PendingTable::new();
        table.insert(4, vec![0x8], 0, UpdateOp::Overwrite);
        assert!(table.is_empty());
        assert_eq!(table.retired(), 1);
    }
}

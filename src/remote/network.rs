//! Interconnect collaborator.
//!
//! The protocol hands encoded frames to an [`Interconnect`] and pulls
//! frames addressed to its core back out. Timing, routing and retries
//! belong to the implementation; [`LoopbackNetwork`] is a zero-latency
//! in-memory one for tests and multi-core scenarios.

use std::collections::VecDeque;

use crate::device::CoreId;
use crate::remote::message::MessageKind;

/// Abstract interconnect between cores.
pub trait Interconnect {
    /// Send one frame to every core in `destinations`.
    fn send(&mut self, frame: &[u8], destinations: &[CoreId]);

    /// Next frame waiting for `core`.
    fn receive(&mut self, core: CoreId) -> Option<Vec<u8>>;
}

/// In-memory interconnect delivering frames in send order per destination.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    inboxes: Vec<VecDeque<Vec<u8>>>,
    /// Frames delivered per destination core and message kind.
    delivered: Vec<[u64; MessageKind::COUNT]>,
    dropped: u64,
}

impl LoopbackNetwork {
    pub fn new(num_cores: usize) -> Self {
        Self {
            inboxes: vec![VecDeque::new(); num_cores],
            delivered: vec![[0; MessageKind::COUNT]; num_cores],
            dropped: 0,
        }
    }

    /// Frames delivered to `core` of the given kind.
    pub fn delivered(&self, core: CoreId, kind: MessageKind) -> u64 {
        self.delivered
            .get(core as usize)
            .map_or(0, |counts| counts[kind.bits() as usize])
    }

    /// All frames delivered to `core`.
    pub fn delivered_total(&self, core: CoreId) -> u64 {
        self.delivered.get(core as usize).map_or(0, |c| c.iter().sum())
    }

    /// Frames waiting in `core`'s inbox.
    pub fn pending(&self, core: CoreId) -> usize {
        self.inboxes.get(core as usize).map_or(0, VecDeque::len)
    }

    /// True when every inbox is empty.
    pub fn is_idle(&self) -> bool {
        self.inboxes.iter().all(VecDeque::is_empty)
    }

    /// Frames sent to cores that do not exist.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Place a raw frame straight into an inbox.
    pub fn inject(&mut self, core: CoreId, frame: Vec<u8>) {
        if let Some(inbox) = self.inboxes.get_mut(core as usize) {
            inbox.push_back(frame);
        }
    }
}

impl Interconnect for LoopbackNetwork {
    fn send(&mut self, frame: &[u8], destinations: &[CoreId]) {
        for &dest in destinations {
            let Some(inbox) = self.inboxes.get_mut(dest as usize) else {
                log::warn!("Loopback: frame for missing core {} dropped", dest);
                self.dropped += 1;
                continue;
            };
            inbox.push_back(frame.to_vec());
            if let Some(kind) = frame.first().and_then(|&b| MessageKind::from_bits(b).ok()) {
                self.delivered[dest as usize][kind.bits() as usize] += 1;
            }
        }
    }

    fn receive(&mut self, core: CoreId) -> Option<Vec<u8>> {
        self.inboxes.get_mut(core as usize)?.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multicast_delivery() {
        let mut net = LoopbackNetwork::new(3);
        net.send(&[1, 0xAA], &[0, 2]);
        assert_eq!(net.pending(0), 1);
        assert_eq!(net.pending(1), 0);
        assert_eq!(net.delivered(2, MessageKind::Store), 1);
        assert_eq!(net.receive(2), Some(vec![1, 0xAA]));
        assert_eq!(net.receive(2), None);
        assert!(!net.is_idle());
    }

    #[test]
    fn test_missing_core_dropped() {
        let mut net = LoopbackNetwork::new(1);
        net.send(&[0], &[4]);
        assert_eq!(net.dropped(), 1);
        assert!(net.is_idle());
        assert_eq!(net.receive(4), None);
    }
}

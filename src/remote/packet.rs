//! Payload fragmentation and the per-core outbound queue.
//!
//! Payloads larger than one packet are cut into `PACKET_SIZE` pieces in
//! order. Messages leave the core through a single FIFO, one per cycle,
//! so emission order is program order; arrival order across different
//! destinations is up to the interconnect.

use std::collections::VecDeque;

use crate::device::dae_spec::PACKET_SIZE;
use crate::remote::message::NetMessage;
use crate::remote::network::Interconnect;

/// Split a payload into packet-sized pieces. An empty payload yields none.
pub fn split_payload(payload: &[u8]) -> std::slice::Chunks<'_, u8> {
    payload.chunks(PACKET_SIZE)
}

/// Concatenate packet payloads back into one buffer.
pub fn reassemble<'a, I>(packets: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    packets.into_iter().flatten().copied().collect()
}

/// FIFO of messages waiting for the interconnect.
#[derive(Debug, Default, Clone)]
pub struct OutboundQueue {
    queue: VecDeque<NetMessage>,
    sent: u64,
    high_water: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: NetMessage) {
        self.queue.push_back(msg);
        self.high_water = self.high_water.max(self.queue.len());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Messages handed to the interconnect so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Deepest the queue has been.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetMessage> {
        self.queue.iter()
    }

    /// Hand the oldest message to the interconnect. At most one per call.
    pub fn dispatch(&mut self, net: &mut dyn Interconnect) -> bool {
        let Some(msg) = self.queue.pop_front() else {
            return false;
        };
        log::trace!(
            "Outbound {:?} core{} -> {:?} header {:#x}",
            msg.kind,
            msg.source,
            msg.destinations.as_slice(),
            msg.header
        );
        net.send(&msg.encode(), &msg.destinations);
        self.sent += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::message::MessageKind;
    use crate::remote::network::LoopbackNetwork;

    #[test]
    fn test_split_reassemble_all_sizes() {
        for n in 0..=3 * PACKET_SIZE + 1 {
            let payload: Vec<u8> = (0..n).map(|i| (i * 7 % 251) as u8).collect();
            let packets: Vec<&[u8]> = split_payload(&payload).collect();

            assert_eq!(packets.len(), n.div_ceil(PACKET_SIZE));
            assert!(packets.iter().all(|p| !p.is_empty() && p.len() <= PACKET_SIZE));
            assert_eq!(reassemble(packets), payload);
        }
    }

    #[test]
    fn test_zero_length_payload_has_no_packets() {
        assert_eq!(split_payload(&[]).count(), 0);
        assert!(reassemble(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_dispatch_one_per_call_in_order() {
        let mut out = OutboundQueue::new();
        let mut net = LoopbackNetwork::new(2);
        for header in 0..3u64 {
            out.push(NetMessage::new(MessageKind::Store, header, &[], 0, &[1]).unwrap());
        }
        assert_eq!(out.high_water(), 3);

        assert!(out.dispatch(&mut net));
        assert_eq!(out.len(), 2);
        assert!(out.dispatch(&mut net));
        assert!(out.dispatch(&mut net));
        assert!(!out.dispatch(&mut net));
        assert_eq!(out.sent(), 3);

        let headers: Vec<u64> = std::iter::from_fn(|| net.receive(1))
            .map(|frame| NetMessage::decode(&frame).unwrap().header)
            .collect();
        assert_eq!(headers, vec![0, 1, 2]);
    }
}

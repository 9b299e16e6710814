//! Engine statistics.

use std::fmt;

use crate::controller::Channel;
use crate::stream::{AccessPattern, Stream};

/// Counters accumulated over an engine's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub streams_enqueued: u64,
    pub streams_completed: u64,
    /// Channel operations per channel.
    pub channel_ops: [u64; Channel::COUNT],
    /// Bytes moved per channel.
    pub channel_bytes: [u64; Channel::COUNT],
    /// Instances fired by the compute fabric.
    pub fabric_instances: u64,
    /// Streams enqueued per access pattern.
    pub patterns: [u64; AccessPattern::COUNT],
    /// UPDATE commands issued.
    pub updates: u64,
    /// Configuration loads applied.
    pub configs: u64,
    /// Stream barriers inserted.
    pub barriers: u64,
}

impl EngineStats {
    pub fn record_enqueue(&mut self, stream: &Stream) {
        self.streams_enqueued += 1;
        self.patterns[stream.pattern().index()] += 1;
    }

    pub fn record_channel(&mut self, channel: Channel, ops: u32, bytes: u64) {
        self.channel_ops[channel.index()] += ops as u64;
        self.channel_bytes[channel.index()] += bytes;
    }

    /// Memory channel requests issued.
    pub fn memory_requests(&self) -> u64 {
        self.channel_ops[Channel::Memory.index()]
    }

    pub fn bytes(&self, channel: Channel) -> u64 {
        self.channel_bytes[channel.index()]
    }

    pub fn pattern_count(&self, pattern: AccessPattern) -> u64 {
        self.patterns[pattern.index()]
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "streams: {} enqueued, {} completed",
            self.streams_enqueued, self.streams_completed
        )?;
        for channel in Channel::ALL {
            writeln!(
                f,
                "  {:7} {:8} ops {:10} bytes",
                channel.name(),
                self.channel_ops[channel.index()],
                self.channel_bytes[channel.index()]
            )?;
        }
        writeln!(f, "fabric instances: {}", self.fabric_instances)?;
        writeln!(f, "updates: {}, barriers: {}", self.updates, self.barriers)?;
        write!(f, "patterns:")?;
        for pattern in AccessPattern::ALL {
            let count = self.patterns[pattern.index()];
            if count > 0 {
                write!(f, " {}={}", pattern.name(), count)?;
            }
        }
        Ok(())
    }
}

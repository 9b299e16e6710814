//! Stream arbitration per channel.
//!
//! Each controller owns a slot table; every cycle it marks which slots are
//! ready and asks the arbiter in what order to try them. Channels with a
//! bandwidth limit take the first slot of that order; the port controller
//! walks the whole order.
//!
//! # Round robin
//!
//! The shipped policy remembers, per channel, the slot granted last and
//! scans forward cyclically from the one after it. With `k` ready slots on a
//! channel, every one of them is granted within `k` consecutive grants.
//!
//! ```
//! use dae_emu::controller::arbiter::{Channel, RoundRobin, StreamArbiter};
//!
//! let mut arb = RoundRobin::new();
//! let ready = [true, false, true, true];
//! let picks: Vec<usize> = (0..3)
//!     .map(|_| arb.select(Channel::Memory, &ready).unwrap())
//!     .collect();
//! assert_eq!(picks, vec![0, 2, 3]);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Physical channel a controller schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Memory,
    ScratchRead,
    ScratchWrite,
    Port,
}

impl Channel {
    pub const COUNT: usize = 4;

    pub const ALL: [Channel; Self::COUNT] = [
        Channel::Memory,
        Channel::ScratchRead,
        Channel::ScratchWrite,
        Channel::Port,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Channel::Memory => 0,
            Channel::ScratchRead => 1,
            Channel::ScratchWrite => 2,
            Channel::Port => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Memory => "MEM",
            Channel::ScratchRead => "SCR_RD",
            Channel::ScratchWrite => "SCR_WR",
            Channel::Port => "PORT",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduling policy over one channel's slot table.
pub trait StreamArbiter: fmt::Debug {
    /// Ready slots in the order they should be tried this cycle.
    fn order(&self, channel: Channel, ready: &[bool]) -> Vec<usize>;

    /// Record that `slot` was serviced.
    fn grant(&mut self, channel: Channel, slot: usize);

    /// Pick and grant the first ready slot, if any.
    fn select(&mut self, channel: Channel, ready: &[bool]) -> Option<usize> {
        let slot = self.order(channel, ready).into_iter().next()?;
        self.grant(channel, slot);
        Some(slot)
    }
}

/// Per-channel round-robin arbiter.
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    /// Last granted slot per channel.
    last: [Option<usize>; Channel::COUNT],
    /// Grants per channel.
    grants: [u64; Channel::COUNT],
    /// Grants made while another slot was also ready.
    contention: [u64; Channel::COUNT],
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last slot granted on a channel.
    pub fn last_granted(&self, channel: Channel) -> Option<usize> {
        self.last[channel.index()]
    }

    pub fn grants(&self, channel: Channel) -> u64 {
        self.grants[channel.index()]
    }

    /// Grants that had to pass over another ready slot.
    pub fn contention(&self, channel: Channel) -> u64 {
        self.contention[channel.index()]
    }
}

impl StreamArbiter for RoundRobin {
    fn order(&self, channel: Channel, ready: &[bool]) -> Vec<usize> {
        let n = ready.len();
        if n == 0 {
            return Vec::new();
        }
        let start = self.last[channel.index()].map_or(0, |last| (last + 1) % n);
        (0..n).map(|i| (start + i) % n).filter(|&slot| ready[slot]).collect()
    }

    fn grant(&mut self, channel: Channel, slot: usize) {
        let c = channel.index();
        self.last[c] = Some(slot);
        self.grants[c] += 1;
    }

    fn select(&mut self, channel: Channel, ready: &[bool]) -> Option<usize> {
        let order = self.order(channel, ready);
        let slot = *order.first()?;
        if order.len() > 1 {
            self.contention[channel.index()] += 1;
        }
        self.grant(channel, slot);
        Some(slot)
    }
}

/// Always favours the lowest ready slot. Starves higher slots under load;
/// useful for comparing against round robin.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPriority;

impl StreamArbiter for FixedPriority {
    fn order(&self, _channel: Channel, ready: &[bool]) -> Vec<usize> {
        ready
            .iter()
            .enumerate()
            .filter_map(|(slot, &r)| r.then_some(slot))
            .collect()
    }

    fn grant(&mut self, _channel: Channel, _slot: usize) {}
}

/// Arbitration policy selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterPolicy {
    #[default]
    RoundRobin,
    Fixed,
}

impl ArbiterPolicy {
    pub fn build(self) -> Box<dyn StreamArbiter> {
        match self {
            ArbiterPolicy::RoundRobin => Box::new(RoundRobin::new()),
            ArbiterPolicy::Fixed => Box::new(FixedPriority),
        }
    }
}

impl FromStr for ArbiterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(ArbiterPolicy::RoundRobin),
            "fixed" => Ok(ArbiterPolicy::Fixed),
            other => Err(format!("unknown arbiter policy '{}'", other)),
        }
    }
}

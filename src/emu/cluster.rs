//! Several cores sharing one partitioned scratchpad.
//!
//! Each core gets its own engine and main memory; all engines share one
//! [`LoopbackNetwork`]. Every cluster cycle steps the engines in core
//! order, so a message sent by a lower core can be received by a higher
//! core in the same cycle.

use crate::config::EngineConfig;
use crate::device::{ComputeFabric, CoreId, HostMemory};
use crate::emu::engine::{Engine, StepReport};
use crate::error::EngineResult;
use crate::remote::LoopbackNetwork;

/// Engines, memories and interconnect of a multi-core system.
#[derive(Debug)]
pub struct Cluster {
    engines: Vec<Engine>,
    memories: Vec<HostMemory>,
    net: LoopbackNetwork,
    cycle: u64,
}

impl Cluster {
    pub fn new(config: &EngineConfig) -> Self {
        let num_cores = config.num_cores();
        Self {
            engines: (0..num_cores).map(|c| Engine::new(c as CoreId, config)).collect(),
            memories: (0..num_cores)
                .map(|_| HostMemory::with_latency(config.mem_latency()))
                .collect(),
            net: LoopbackNetwork::new(num_cores),
            cycle: 0,
        }
    }

    /// Give every core its own fabric built by `make`.
    pub fn with_fabrics<F>(mut self, mut make: F) -> Self
    where
        F: FnMut(CoreId) -> Box<dyn ComputeFabric>,
    {
        self.engines = self
            .engines
            .into_iter()
            .map(|engine| {
                let core = engine.core();
                engine.with_fabric(make(core))
            })
            .collect();
        self
    }

    #[inline]
    pub fn num_cores(&self) -> usize {
        self.engines.len()
    }

    #[inline]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn engine(&self, core: CoreId) -> Option<&Engine> {
        self.engines.get(core as usize)
    }

    pub fn engine_mut(&mut self, core: CoreId) -> Option<&mut Engine> {
        self.engines.get_mut(core as usize)
    }

    pub fn memory(&self, core: CoreId) -> Option<&HostMemory> {
        self.memories.get(core as usize)
    }

    pub fn memory_mut(&mut self, core: CoreId) -> Option<&mut HostMemory> {
        self.memories.get_mut(core as usize)
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.net
    }

    /// All engines idle and nothing left on the interconnect.
    pub fn is_idle(&self) -> bool {
        self.net.is_idle() && self.engines.iter().all(Engine::is_idle)
    }

    /// One cycle on every core.
    pub fn step(&mut self) -> EngineResult<Vec<StepReport>> {
        self.cycle += 1;
        self.engines
            .iter_mut()
            .zip(self.memories.iter_mut())
            .map(|(engine, mem)| engine.step(mem, &mut self.net))
            .collect()
    }

    /// Step until idle or `max_cycles` have passed. Returns the cycles run.
    pub fn run(&mut self, max_cycles: u64) -> EngineResult<u64> {
        let start = self.cycle;
        while !self.is_idle() && self.cycle - start < max_cycles {
            self.step()?;
            for engine in &self.engines {
                engine.check_progress()?;
            }
        }
        log::debug!("cluster ran {} cycles", self.cycle - start);
        Ok(self.cycle - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MessageKind, UpdateOp};

    const PART: u64 = 1024;

    fn cluster(cores: usize) -> Cluster {
        Cluster::new(&EngineConfig {
            num_cores: Some(cores),
            partition_size: Some(PART),
            ..Default::default()
        })
    }

    #[test]
    fn test_update_across_partitions() {
        let mut cluster = cluster(2);
        let value = 0xABCD_0123_u64.to_le_bytes();
        let addrs = [0x10, 0x18, 0x20, PART + 0x40, PART + 0x48];

        let tags = cluster.engine_mut(0).unwrap().update_scratchpad(&addrs, &value).unwrap();
        assert_eq!(tags.len(), 1);
        cluster.run(100).unwrap();

        let net = cluster.network();
        assert_eq!(net.delivered(1, MessageKind::Update), 2);
        assert_eq!(net.delivered_total(1), 2);
        assert_eq!(net.delivered_total(0), 0);

        let local = cluster.engine(0).unwrap().scratchpad();
        for addr in [0x10, 0x18, 0x20] {
            assert_eq!(local.peek_u64(addr), 0xABCD_0123);
        }
        let remote = cluster.engine(1).unwrap().scratchpad();
        assert_eq!(remote.peek_u64(0x40), 0xABCD_0123);
        assert_eq!(remote.peek_u64(0x48), 0xABCD_0123);
    }

    #[test]
    fn test_local_update_has_no_traffic() {
        let mut cluster = cluster(2);
        let engine = cluster.engine_mut(1).unwrap();
        let tags = engine
            .update_scratchpad(&[PART + 8, PART + 16, PART + 24, PART + 32, PART + 40], &[5; 8])
            .unwrap();
        assert!(tags.is_empty());
        assert!(engine.scratch_writes_pending());

        cluster.run(100).unwrap();
        assert_eq!(cluster.network().delivered_total(0), 0);
        assert_eq!(cluster.network().delivered_total(1), 0);
        assert_eq!(cluster.engine(1).unwrap().scratchpad().peek(8, 8), vec![5; 8]);
    }

    #[test]
    fn test_add_updates_accumulate() {
        let mut cluster = cluster(2);
        cluster.engine_mut(1).unwrap().scratchpad_mut().load_words(0x40, &[100]);
        cluster.engine_mut(0).unwrap().scratchpad_mut().load_words(0x10, &[u64::MAX]);

        let one = 1u64.to_le_bytes();
        for _ in 0..3 {
            cluster
                .engine_mut(0)
                .unwrap()
                .update_scratchpad_with(&[0x10, PART + 0x40], &one, UpdateOp::Add)
                .unwrap();
        }
        cluster
            .engine_mut(1)
            .unwrap()
            .update_scratchpad_with(&[PART + 0x40], &10u64.to_le_bytes(), UpdateOp::Add)
            .unwrap();
        cluster.run(500).unwrap();

        assert_eq!(cluster.engine(0).unwrap().scratchpad().peek_u64(0x10), 2);
        assert_eq!(cluster.engine(1).unwrap().scratchpad().peek_u64(0x40), 113);
        assert!(cluster.engine(1).unwrap().remote().pending().is_empty());
    }

    #[test]
    fn test_tag_wrap_keeps_updates_in_order() {
        let mut cluster = cluster(2);
        let engine = cluster.engine_mut(0).unwrap();
        let mut tags = Vec::new();
        for i in 0..1025u64 {
            tags.extend(engine.update_scratchpad(&[PART + 0x80], &i.to_le_bytes()).unwrap());
        }
        assert_eq!(tags.len(), 1025);
        assert_eq!(tags[0], tags[1024]);
        assert_ne!(tags[0], tags[1023]);

        cluster.run(10_000).unwrap();
        let remote = cluster.engine(1).unwrap();
        assert_eq!(remote.scratchpad().peek_u64(0x80), 1024);
        assert_eq!(remote.remote().pending().dropped_values(), 0);
        assert!(remote.remote().pending().is_empty());
    }

    #[test]
    fn test_remote_scratch_read() {
        let mut cluster = cluster(2);
        cluster.engine_mut(1).unwrap().scratchpad_mut().load_words(0x10, &[11, 22, 33]);

        let id = cluster
            .engine_mut(0)
            .unwrap()
            .load_scratch_to_port(PART + 0x10, 24, 24, 1, 4)
            .unwrap();
        cluster.run(100).unwrap();

        let engine = cluster.engine(0).unwrap();
        assert!(!engine.is_stream_active(id));
        assert_eq!(engine.inputs().get(4).unwrap().words().collect::<Vec<_>>(), vec![11, 22, 33]);
        assert_eq!(cluster.network().delivered(1, MessageKind::Load), 1);
        assert_eq!(cluster.network().delivered(0, MessageKind::Load), 1);
    }

    #[test]
    fn test_remote_scratch_write() {
        let mut cluster = cluster(2);
        let data: Vec<u8> = (0..96).collect();
        cluster.memory_mut(0).unwrap().write_bytes(0x2000, &data);

        cluster
            .engine_mut(0)
            .unwrap()
            .load_dma_to_scratch(0x2000, 96, 96, 1, PART + 0x100)
            .unwrap();
        cluster.run(100).unwrap();

        assert_eq!(cluster.network().delivered(1, MessageKind::Store), 2);
        assert_eq!(cluster.engine(1).unwrap().scratchpad().peek(0x100, 96), data);
    }

    #[test]
    fn test_multicast_reaches_every_core_in_mask() {
        let mut cluster = cluster(3);
        let engine = cluster.engine_mut(0).unwrap();
        for w in 100..104 {
            engine.outputs_mut().get_mut(1).unwrap().push(w);
        }
        engine.remote_multicast(1, 6, 0b101, 4).unwrap();
        cluster.run(100).unwrap();

        let expected = vec![100, 101, 102, 103];
        for core in [0, 2] {
            let words: Vec<u64> = cluster.engine(core).unwrap().inputs().get(6).unwrap().words().collect();
            assert_eq!(words, expected);
        }
        assert!(cluster.engine(1).unwrap().inputs().get(6).unwrap().is_empty());
    }
}

//! TOML scenario files.
//!
//! A scenario preloads memory and scratchpads, issues a list of engine
//! commands, runs the cluster and compares port, scratchpad and memory
//! contents against expectations.
//!
//! # Format
//!
//! ```toml
//! [scenario]
//! name = "mem_to_port"
//! max_cycles = 100
//!
//! [config]
//! num_cores = 1
//!
//! [[memory]]
//! addr = 0x1000
//! words = [1, 2, 3, 4]
//!
//! [[command]]
//! op = "load_dma_to_port"
//! mem_addr = 0x1000
//! stride = 32
//! access_size = 32
//! num_strides = 1
//! in_port = 3
//!
//! [[expect]]
//! port = 3
//! words = [1, 2, 3, 4]
//! ```

use std::fmt;
use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::device::{ComputeFabric, CoreId, NullFabric, Passthrough, PortDirection};
use crate::emu::{Cluster, EngineStats};
use crate::error::EngineResult;
use crate::remote::UpdateOp;
use crate::stream::BarrierMask;

/// A complete scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub scenario: ScenarioInfo,
    #[serde(default)]
    pub config: EngineConfig,
    #[serde(default)]
    pub fabric: FabricDef,
    #[serde(default)]
    pub memory: Vec<Preload>,
    #[serde(default)]
    pub scratch: Vec<Preload>,
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandDef>,
    #[serde(default)]
    pub expect: Vec<PortExpect>,
    #[serde(default)]
    pub expect_memory: Vec<Preload>,
    #[serde(default)]
    pub expect_scratch: Vec<Preload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,
}

fn default_max_cycles() -> u64 {
    10_000
}

/// Fabric installed on every core. No routes means a fabric that never fires.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FabricDef {
    /// (input port, output port) pairs copied instance by instance.
    #[serde(default)]
    pub passthrough: Vec<(usize, usize)>,
}

/// Data placed at (or expected at) an address of one core.
#[derive(Debug, Clone, Deserialize)]
pub struct Preload {
    #[serde(default)]
    pub core: CoreId,
    pub addr: u64,
    #[serde(default)]
    pub words: Vec<u64>,
    #[serde(default)]
    pub bytes: Vec<u8>,
}

impl Preload {
    /// Little-endian bytes: `words` first, then `bytes`.
    pub fn data(&self) -> Vec<u8> {
        let mut data: Vec<u8> = self.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        data.extend_from_slice(&self.bytes);
        data
    }
}

/// Expected contents of one port after the run.
#[derive(Debug, Clone, Deserialize)]
pub struct PortExpect {
    #[serde(default)]
    pub core: CoreId,
    pub port: usize,
    #[serde(default)]
    pub direction: Direction,
    pub words: Vec<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Input,
    Output,
}

impl From<Direction> for PortDirection {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Input => PortDirection::Input,
            Direction::Output => PortDirection::Output,
        }
    }
}

/// A command and the core that issues it.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandDef {
    #[serde(default)]
    pub core: CoreId,
    #[serde(flatten)]
    pub command: Command,
}

/// Engine commands, one variant per command API call.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Configure {
        addr: u64,
        size: u64,
    },
    LoadDmaToScratch {
        mem_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        scratch_addr: u64,
    },
    WriteDmaFromScratch {
        scratch_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        mem_addr: u64,
    },
    LoadDmaToPort {
        mem_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        in_port: usize,
    },
    LoadScratchToPort {
        scratch_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        in_port: usize,
    },
    WriteScratchpad {
        out_port: usize,
        scratch_addr: u64,
        num_bytes: u64,
        #[serde(default)]
        shift_bytes: usize,
    },
    WriteDma {
        out_port: usize,
        mem_addr: u64,
        stride: u64,
        access_size: u64,
        num_strides: u64,
        #[serde(default)]
        shift_bytes: usize,
    },
    Reroute {
        out_port: usize,
        in_port: usize,
        num_elem: u64,
    },
    Indirect {
        ind_port: usize,
        ind_type: u8,
        in_port: usize,
        index_addr: u64,
        num_elem: u64,
    },
    IndirectWrite {
        ind_port: usize,
        ind_type: u8,
        out_port: usize,
        index_addr: u64,
        num_elem: u64,
    },
    WriteConstant {
        in_port: usize,
        constant: u64,
        num_elem: u64,
        #[serde(default)]
        constant2: u64,
        #[serde(default)]
        num_elem2: u64,
        #[serde(default = "one")]
        iters: u64,
    },
    RemoteMulticast {
        out_port: usize,
        remote_port: usize,
        core_mask: u64,
        num_elem: u64,
    },
    /// `value` words are combined little-endian into every address.
    UpdateScratchpad {
        addrs: Vec<u64>,
        value: Vec<u64>,
        #[serde(default)]
        update: UpdateKind,
    },
    /// Order later streams touching `mask` behind earlier ones.
    InsertBarrier {
        mask: Vec<BarrierResource>,
    },
    /// Host write straight into an output port.
    PushOutput {
        port: usize,
        words: Vec<u64>,
    },
}

fn one() -> u64 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    #[default]
    Overwrite,
    Add,
}

impl From<UpdateKind> for UpdateOp {
    fn from(k: UpdateKind) -> Self {
        match k {
            UpdateKind::Overwrite => UpdateOp::Overwrite,
            UpdateKind::Add => UpdateOp::Add,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierResource {
    ScratchRead,
    ScratchWrite,
    Memory,
}

impl From<BarrierResource> for BarrierMask {
    fn from(r: BarrierResource) -> Self {
        match r {
            BarrierResource::ScratchRead => BarrierMask::SCRATCH_READ,
            BarrierResource::ScratchWrite => BarrierMask::SCRATCH_WRITE,
            BarrierResource::Memory => BarrierMask::MEMORY,
        }
    }
}

impl Command {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Configure { .. } => "configure",
            Command::LoadDmaToScratch { .. } => "load_dma_to_scratch",
            Command::WriteDmaFromScratch { .. } => "write_dma_from_scratch",
            Command::LoadDmaToPort { .. } => "load_dma_to_port",
            Command::LoadScratchToPort { .. } => "load_scratch_to_port",
            Command::WriteScratchpad { .. } => "write_scratchpad",
            Command::WriteDma { .. } => "write_dma",
            Command::Reroute { .. } => "reroute",
            Command::Indirect { .. } => "indirect",
            Command::IndirectWrite { .. } => "indirect_write",
            Command::WriteConstant { .. } => "write_constant",
            Command::RemoteMulticast { .. } => "remote_multicast",
            Command::UpdateScratchpad { .. } => "update_scratchpad",
            Command::InsertBarrier { .. } => "insert_barrier",
            Command::PushOutput { .. } => "push_output",
        }
    }
}

/// Where a mismatch was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Port { core: CoreId, port: usize, direction: PortDirection },
    Memory { core: CoreId, addr: u64 },
    Scratch { core: CoreId, addr: u64 },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Port { core, port, direction } => write!(f, "core{} {} port {}", core, direction, port),
            Target::Memory { core, addr } => write!(f, "core{} memory {:#x}", core, addr),
            Target::Scratch { core, addr } => write!(f, "core{} scratch {:#x}", core, addr),
        }
    }
}

/// First differing element of one expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub target: Target,
    pub index: usize,
    pub expected: Option<u64>,
    pub actual: Option<u64>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<u64>| v.map_or_else(|| "nothing".to_string(), |v| format!("{:#x}", v));
        write!(
            f,
            "{}[{}]: expected {}, got {}",
            self.target,
            self.index,
            show(self.expected),
            show(self.actual)
        )
    }
}

/// Result of running a scenario.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub cycles: u64,
    pub checks: usize,
    pub mismatches: Vec<Mismatch>,
    pub error: Option<String>,
    pub stats: Vec<EngineStats>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.mismatches.is_empty()
    }
}

impl Scenario {
    /// Load a scenario from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let scenario: Self = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let cores = self.config.num_cores();
        let core_refs = self
            .memory
            .iter()
            .chain(&self.scratch)
            .chain(&self.expect_memory)
            .chain(&self.expect_scratch)
            .map(|p| p.core)
            .chain(self.commands.iter().map(|c| c.core))
            .chain(self.expect.iter().map(|e| e.core));
        for core in core_refs {
            if core as usize >= cores {
                bail!("core {} referenced but the scenario has {} cores", core, cores);
            }
        }
        Ok(())
    }

    /// Build the cluster with preloads applied and commands issued.
    pub fn build(&self) -> EngineResult<Cluster> {
        let routes = self.fabric.passthrough.clone();
        let mut cluster = Cluster::new(&self.config).with_fabrics(|_| -> Box<dyn ComputeFabric> {
            if routes.is_empty() {
                Box::new(NullFabric)
            } else {
                Box::new(Passthrough::new(routes.clone()))
            }
        });

        for preload in &self.memory {
            if let Some(mem) = cluster.memory_mut(preload.core) {
                mem.write_bytes(preload.addr, &preload.data());
            }
        }
        for preload in &self.scratch {
            if let Some(engine) = cluster.engine_mut(preload.core) {
                let local = engine.partitions().local(preload.addr);
                engine.scratchpad_mut().write(local, &preload.data());
            }
        }
        for def in &self.commands {
            issue(&mut cluster, def)?;
        }
        Ok(cluster)
    }

    /// Build, run to idle and compare expectations.
    pub fn run(&self) -> ScenarioOutcome {
        self.execute().1
    }

    /// Like [`run`](Self::run), also handing back the cluster for inspection.
    /// The cluster is `None` when a command was rejected.
    pub fn execute(&self) -> (Option<Cluster>, ScenarioOutcome) {
        let mut outcome = ScenarioOutcome {
            name: self.scenario.name.clone(),
            cycles: 0,
            checks: 0,
            mismatches: Vec::new(),
            error: None,
            stats: Vec::new(),
        };

        let mut cluster = match self.build() {
            Ok(c) => c,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return (None, outcome);
            }
        };
        log::info!(
            "scenario {}: {} commands on {} cores",
            self.scenario.name,
            self.commands.len(),
            cluster.num_cores()
        );

        match cluster.run(self.scenario.max_cycles) {
            Ok(cycles) => outcome.cycles = cycles,
            Err(e) => outcome.error = Some(e.to_string()),
        }
        if outcome.error.is_none() && !cluster.is_idle() {
            outcome.error = Some(format!("not idle after {} cycles", self.scenario.max_cycles));
        }

        self.check(&cluster, &mut outcome);
        outcome.stats = (0..cluster.num_cores())
            .filter_map(|c| cluster.engine(c as CoreId).map(|e| e.stats().clone()))
            .collect();
        (Some(cluster), outcome)
    }

    fn check(&self, cluster: &Cluster, outcome: &mut ScenarioOutcome) {
        for exp in &self.expect {
            let direction = PortDirection::from(exp.direction);
            let actual: Vec<u64> = cluster
                .engine(exp.core)
                .and_then(|e| match direction {
                    PortDirection::Input => e.inputs().get(exp.port),
                    PortDirection::Output => e.outputs().get(exp.port),
                })
                .map(|p| p.words().collect())
                .unwrap_or_default();
            let target = Target::Port { core: exp.core, port: exp.port, direction };
            compare(outcome, target, &exp.words, &actual);
        }
        for exp in &self.expect_memory {
            let expected = pack(&exp.data());
            let actual = cluster
                .memory(exp.core)
                .map(|m| pack(&m.read_vec(exp.addr, exp.data().len())))
                .unwrap_or_default();
            compare(outcome, Target::Memory { core: exp.core, addr: exp.addr }, &expected, &actual);
        }
        for exp in &self.expect_scratch {
            let expected = pack(&exp.data());
            let actual = cluster
                .engine(exp.core)
                .map(|e| {
                    let local = e.partitions().local(exp.addr);
                    pack(&e.scratchpad().peek(local, exp.data().len()))
                })
                .unwrap_or_default();
            compare(outcome, Target::Scratch { core: exp.core, addr: exp.addr }, &expected, &actual);
        }
    }
}

/// Words from little-endian bytes; a short tail is zero-padded.
fn pack(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks(8)
        .map(|c| {
            let mut buf = [0u8; 8];
            buf[..c.len()].copy_from_slice(c);
            u64::from_le_bytes(buf)
        })
        .collect()
}

fn compare(outcome: &mut ScenarioOutcome, target: Target, expected: &[u64], actual: &[u64]) {
    outcome.checks += 1;
    let len = expected.len().max(actual.len());
    if let Some(index) = (0..len).find(|&i| expected.get(i) != actual.get(i)) {
        outcome.mismatches.push(Mismatch {
            target,
            index,
            expected: expected.get(index).copied(),
            actual: actual.get(index).copied(),
        });
    }
}

fn issue(cluster: &mut Cluster, def: &CommandDef) -> EngineResult<()> {
    let Some(engine) = cluster.engine_mut(def.core) else {
        return Ok(());
    };
    log::debug!("core{} issuing {}", def.core, def.command.name());
    match def.command {
        Command::Configure { addr, size } => {
            engine.configure(addr, size)?;
        }
        Command::LoadDmaToScratch { mem_addr, stride, access_size, num_strides, scratch_addr } => {
            engine.load_dma_to_scratch(mem_addr, stride, access_size, num_strides, scratch_addr)?;
        }
        Command::WriteDmaFromScratch { scratch_addr, stride, access_size, num_strides, mem_addr } => {
            engine.write_dma_from_scratch(scratch_addr, stride, access_size, num_strides, mem_addr)?;
        }
        Command::LoadDmaToPort { mem_addr, stride, access_size, num_strides, in_port } => {
            engine.load_dma_to_port(mem_addr, stride, access_size, num_strides, in_port)?;
        }
        Command::LoadScratchToPort { scratch_addr, stride, access_size, num_strides, in_port } => {
            engine.load_scratch_to_port(scratch_addr, stride, access_size, num_strides, in_port)?;
        }
        Command::WriteScratchpad { out_port, scratch_addr, num_bytes, shift_bytes } => {
            engine.write_scratchpad(out_port, scratch_addr, num_bytes, shift_bytes)?;
        }
        Command::WriteDma { out_port, mem_addr, stride, access_size, num_strides, shift_bytes } => {
            engine.write_dma(out_port, mem_addr, stride, access_size, num_strides, shift_bytes)?;
        }
        Command::Reroute { out_port, in_port, num_elem } => {
            engine.reroute(out_port, in_port, num_elem)?;
        }
        Command::Indirect { ind_port, ind_type, in_port, index_addr, num_elem } => {
            engine.indirect(ind_port, ind_type, in_port, index_addr, num_elem)?;
        }
        Command::IndirectWrite { ind_port, ind_type, out_port, index_addr, num_elem } => {
            engine.indirect_write(ind_port, ind_type, out_port, index_addr, num_elem)?;
        }
        Command::WriteConstant { in_port, constant, num_elem, constant2, num_elem2, iters } => {
            engine.write_constant(in_port, constant, num_elem, constant2, num_elem2, iters)?;
        }
        Command::RemoteMulticast { out_port, remote_port, core_mask, num_elem } => {
            engine.remote_multicast(out_port, remote_port, core_mask, num_elem)?;
        }
        Command::UpdateScratchpad { ref addrs, ref value, update } => {
            let bytes: Vec<u8> = value.iter().flat_map(|w| w.to_le_bytes()).collect();
            engine.update_scratchpad_with(addrs, &bytes, update.into())?;
        }
        Command::InsertBarrier { ref mask } => {
            let mask = mask
                .iter()
                .fold(BarrierMask::NONE, |acc, &r| acc | BarrierMask::from(r));
            engine.insert_barrier(mask);
        }
        Command::PushOutput { port, ref words } => {
            if let Some(p) = engine.outputs_mut().get_mut(port) {
                for &w in words {
                    p.push(w);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEM_TO_PORT: &str = r#"
[scenario]
name = "mem_to_port"
max_cycles = 100

[[memory]]
addr = 0x1000
words = [1, 2, 3, 4, 5, 6, 7, 8]

[[command]]
op = "load_dma_to_port"
mem_addr = 0x1000
stride = 32
access_size = 32
num_strides = 2
in_port = 3

[[expect]]
port = 3
words = [1, 2, 3, 4, 5, 6, 7, 8]
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_toml(MEM_TO_PORT).unwrap();
        assert_eq!(scenario.scenario.name, "mem_to_port");
        assert_eq!(scenario.scenario.max_cycles, 100);
        assert_eq!(scenario.commands.len(), 1);
        assert_eq!(scenario.commands[0].core, 0);
        assert!(matches!(
            scenario.commands[0].command,
            Command::LoadDmaToPort { mem_addr: 0x1000, in_port: 3, .. }
        ));
        assert_eq!(scenario.expect[0].direction, Direction::Input);
    }

    #[test]
    fn test_run_mem_to_port() {
        let outcome = Scenario::from_toml(MEM_TO_PORT).unwrap().run();
        assert!(outcome.passed(), "{:?}", outcome);
        assert_eq!(outcome.checks, 1);
        assert_eq!(outcome.stats[0].streams_completed, 1);
    }

    #[test]
    fn test_constant_defaults() {
        let toml = r#"
[scenario]
name = "const"

[[command]]
op = "write_constant"
in_port = 1
constant = 7
num_elem = 3

[[expect]]
port = 1
words = [7, 7, 7]
"#;
        let scenario = Scenario::from_toml(toml).unwrap();
        assert!(matches!(
            scenario.commands[0].command,
            Command::WriteConstant { constant2: 0, num_elem2: 0, iters: 1, .. }
        ));
        assert!(scenario.run().passed());
    }

    #[test]
    fn test_mismatch_reported() {
        let toml = MEM_TO_PORT.replacen(
            "[[expect]]\nport = 3\nwords = [1, 2, 3, 4, 5, 6, 7, 8]",
            "[[expect]]\nport = 3\nwords = [1, 2, 3, 9]",
            1,
        );
        let outcome = Scenario::from_toml(&toml).unwrap().run();
        assert!(!outcome.passed());
        let mismatch = &outcome.mismatches[0];
        assert_eq!(mismatch.index, 3);
        assert_eq!(mismatch.expected, Some(9));
        assert_eq!(mismatch.actual, Some(4));
        assert_eq!(mismatch.to_string(), "core0 input port 3[3]: expected 0x9, got 0x4");
    }

    #[test]
    fn test_cross_partition_update() {
        let toml = r#"
[scenario]
name = "update"

[config]
num_cores = 2
partition_size = 1024

[[command]]
op = "update_scratchpad"
addrs = [0x10, 0x410]
value = [0x1234]

[[expect_scratch]]
core = 0
addr = 0x10
words = [0x1234]

[[expect_scratch]]
core = 1
addr = 0x410
words = [0x1234]
"#;
        let outcome = Scenario::from_toml(toml).unwrap().run();
        assert!(outcome.passed(), "{:?}", outcome.mismatches);
        assert_eq!(outcome.checks, 2);
    }

    #[test]
    fn test_barrier_and_add_update() {
        let toml = r#"
[scenario]
name = "barrier_add"

[config]
num_cores = 2
partition_size = 1024

[[memory]]
addr = 0x100
words = [10, 20, 30, 40]

[[scratch]]
core = 1
addr = 0x420
words = [5]

[[command]]
op = "load_dma_to_scratch"
mem_addr = 0x100
stride = 32
access_size = 32
num_strides = 1
scratch_addr = 0x40

[[command]]
op = "insert_barrier"
mask = ["scratch_write", "scratch_read"]

[[command]]
op = "load_scratch_to_port"
scratch_addr = 0x40
stride = 32
access_size = 32
num_strides = 1
in_port = 2

[[command]]
op = "update_scratchpad"
addrs = [0x420]
value = [7]
update = "add"

[[expect]]
port = 2
words = [10, 20, 30, 40]

[[expect_scratch]]
core = 1
addr = 0x420
words = [12]
"#;
        let outcome = Scenario::from_toml(toml).unwrap().run();
        assert!(outcome.passed(), "{:?} {:?}", outcome.error, outcome.mismatches);
    }

    #[test]
    fn test_scratch_round_trip_to_memory() {
        let toml = r#"
[scenario]
name = "scratch_round_trip"

[[memory]]
addr = 0x100
words = [10, 20, 30, 40]

[[command]]
op = "load_dma_to_scratch"
mem_addr = 0x100
stride = 32
access_size = 32
num_strides = 1
scratch_addr = 0x40

[[expect_scratch]]
addr = 0x40
words = [10, 20, 30, 40]
"#;
        assert!(Scenario::from_toml(toml).unwrap().run().passed());
    }

    #[test]
    fn test_bundled_scenarios_pass() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        let mut count = 0;
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let outcome = Scenario::from_file(&path).unwrap().run();
            assert!(outcome.passed(), "{}: {:?} {:?}", outcome.name, outcome.error, outcome.mismatches);
            count += 1;
        }
        assert!(count >= 5);
    }

    #[test]
    fn test_unknown_core_rejected() {
        let toml = r#"
[scenario]
name = "bad"

[[command]]
core = 3
op = "reroute"
out_port = 0
in_port = 0
num_elem = 1
"#;
        let err = Scenario::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("core 3"));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let toml = r#"
[scenario]
name = "bad"

[[command]]
op = "teleport"
"#;
        assert!(Scenario::from_toml(toml).is_err());
    }

    #[test]
    fn test_invalid_command_is_an_error_outcome() {
        let toml = r#"
[scenario]
name = "bad_port"

[[command]]
op = "write_constant"
in_port = 999
constant = 1
num_elem = 1
"#;
        let outcome = Scenario::from_toml(toml).unwrap().run();
        assert!(!outcome.passed());
        assert!(outcome.error.unwrap().contains("999"));
    }
}

//! dae-emu library
//!
//! Cycle-driven emulation of the stream engine in a decoupled
//! access/execute spatial accelerator: stream descriptors, the channel
//! controllers that serve them, vector ports to the compute fabric and
//! the protocol that stitches partitioned scratchpads together.

pub mod config;
pub mod controller;
pub mod device;
pub mod emu;
pub mod error;
pub mod remote;
pub mod stream;
pub mod testing;

pub use config::EngineConfig;
pub use emu::{Cluster, Engine};
pub use error::{EngineError, EngineResult};

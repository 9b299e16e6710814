//! Engine orchestration.
//!
//! [`Engine`] is one core's stream engine: command API, dispatch and the
//! per-cycle controller schedule. [`Cluster`] wires several engines to a
//! shared interconnect so partition-crossing streams can be exercised
//! end to end.
//!
//! # Example
//!
//! ```
//! use dae_emu::config::EngineConfig;
//! use dae_emu::emu::Cluster;
//!
//! let config = EngineConfig {
//!     num_cores: Some(2),
//!     partition_size: Some(1024),
//!     ..Default::default()
//! };
//! let mut cluster = Cluster::new(&config);
//! cluster
//!     .engine_mut(0)
//!     .unwrap()
//!     .update_scratchpad(&[0x10, 1024 + 0x10], &[1, 2, 3, 4, 5, 6, 7, 8])
//!     .unwrap();
//! cluster.run(100).unwrap();
//! assert_eq!(cluster.engine(1).unwrap().scratchpad().peek_u64(0x10), 0x0807_0605_0403_0201);
//! ```

pub mod cluster;
pub mod engine;
pub mod progress;
pub mod stats;

pub use cluster::Cluster;
pub use engine::{Engine, StepReport};
pub use progress::ProgressMonitor;
pub use stats::EngineStats;

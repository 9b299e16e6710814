//! Hardware state owned by one core's stream engine.
//!
//! This module provides:
//! - Architecture constants (channel widths, slot counts, packet layout)
//! - Vector ports between the engine and the compute fabric
//! - The core's scratchpad partition and the global partition map
//! - Collaborator interfaces for main memory and the compute fabric
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────── core N ────────────────┐
//!   main memory ◄─┤ memory ch.   ┌────────────┐            │
//!                 │              │  stream    │  in ports  │   ┌─────────┐
//!                 │ scratch rd ─►│  engine    ├───────────►├──►│ fabric  │
//!   scratchpad ◄─►│ scratch wr ◄─┤            │◄───────────┤◄──┤         │
//!   partition N   │              └─────┬──────┘  out ports │   └─────────┘
//!                 └────────────────────┼───────────────────┘
//!                                      ▼
//!                          interconnect (other partitions)
//! ```

pub mod dae_spec;
pub mod fabric;
pub mod host_memory;
pub mod memory;
pub mod port;
pub mod scratchpad;

pub use fabric::{ComputeFabric, FabricConfig, NullFabric, Passthrough};
pub use host_memory::HostMemory;
pub use memory::{MemResponse, MemoryInterface};
pub use port::{Loc, PortDirection, PortInterface, PortStatus, VectorPort};
pub use scratchpad::{PartitionMap, Scratchpad};

/// Core identifier. Six bits travel in update tags, so at most 64 cores.
pub type CoreId = u8;

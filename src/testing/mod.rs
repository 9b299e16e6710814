//! Scenario-driven testing.
//!
//! This module provides infrastructure for:
//! - Describing a run (preloads, commands, expectations) in a TOML file
//! - Running it on a [`Cluster`](crate::emu::Cluster)
//! - Reporting the first mismatch per expected port or region
//!
//! # Usage
//!
//! ```bash
//! cargo run -- scenarios/mem_to_port.toml
//! ```

pub mod scenario;

pub use scenario::{Command, CommandDef, Mismatch, Scenario, ScenarioOutcome, Target};

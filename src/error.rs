//! Error types for the stream engine.
//!
//! Three families, mirroring where a failure originates:
//! - [`EngineError`]: command API and cycle stepping
//! - [`ProtocolError`]: decoding network messages (always fatal to the engine)
//! - [`PortError`]: vector port status transitions

use std::fmt;

use thiserror::Error;

use crate::device::port::{Loc, PortDirection, PortStatus};
use crate::device::CoreId;

/// Command queue a stream is placed on before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Streams touching a port, plus configuration loads.
    Port,
    /// Memory to scratchpad streams.
    MemToScratch,
    /// Scratchpad to memory streams.
    ScratchToMem,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Port => write!(f, "port"),
            QueueKind::MemToScratch => write!(f, "memory-to-scratch"),
            QueueKind::ScratchToMem => write!(f, "scratch-to-memory"),
        }
    }
}

/// Errors raised by the engine command API and step loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Command issued without checking the matching `can_add_*` predicate.
    #[error("{queue} command queue is full ({capacity} entries)")]
    QueueFull { queue: QueueKind, capacity: usize },

    /// Port id outside the configured port bank.
    #[error("invalid {direction} port {port}")]
    InvalidPort { port: usize, direction: PortDirection },

    /// Scratchpad address beyond the last partition.
    #[error("scratch address {addr:#x} is outside all {num_cores} partitions")]
    InvalidAddress { addr: u64, num_cores: usize },

    /// Operation that cannot be forwarded to another partition.
    #[error("{operation} cannot target scratch address {addr:#x} owned by core {owner}")]
    RemoteUnsupported {
        operation: &'static str,
        addr: u64,
        owner: CoreId,
    },

    /// Malformed stream parameters.
    #[error("invalid stream parameters: {0}")]
    InvalidStream(String),

    /// No forward progress within the configured threshold.
    #[error("no forward progress for {waited} cycles (last progress at cycle {last_progress})")]
    Stuck { waited: u64, last_progress: u64 },

    /// Interconnect desynchronization.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Port claimed against its status.
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Errors decoding or building network messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Message type outside LOAD/STORE/UPDATE.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// Frame shorter than its fixed layout.
    #[error("truncated message: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// Remote read length with no size-code encoding.
    #[error("remote read of {0} bytes cannot be encoded")]
    BadReadSize(usize),

    /// Payload larger than one packet.
    #[error("payload of {len} bytes exceeds packet size {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Message with no destination cores.
    #[error("message has no destinations")]
    NoDestination,
}

/// Errors from vector port status transitions.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    /// Port cannot be claimed for the requested location.
    #[error("{direction} port {port} is {status:?} for {owner:?}, cannot take for {requested:?}")]
    Unavailable {
        port: usize,
        direction: PortDirection,
        status: PortStatus,
        owner: Loc,
        requested: Loc,
    },
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::QueueFull {
            queue: QueueKind::Port,
            capacity: 16,
        };
        assert_eq!(err.to_string(), "port command queue is full (16 entries)");

        let err: EngineError = ProtocolError::UnknownMessageType(3).into();
        assert_eq!(err.to_string(), "unknown message type 3");
    }

    #[test]
    fn test_port_error_display() {
        let err = PortError::Unavailable {
            port: 4,
            direction: PortDirection::Input,
            status: PortStatus::Busy,
            owner: Loc::Memory,
            requested: Loc::Scratch,
        };
        assert!(err.to_string().starts_with("input port 4 is Busy"));
    }
}

use std::path::PathBuf;

use thiserror::Error;

use crate::memory::Address;
use crate::memory::cache::LineState;
use crate::protocol::message::MessageKind;
use crate::topology::NodeId;

/// Top-level error type for the simulator
#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Invalid workload: {0}")]
    WorkloadError(#[from] WorkloadError),

    #[error("Coherence violation: {0}")]
    CoherenceError(#[from] CoherenceError),

    #[error("Execution error: {0}")]
    ExecutionError(#[from] ExecutionError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

/// Errors raised while building a configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Node count {0} is outside the supported range {1}..={2}")]
    NodeCount(usize, usize, usize),

    #[error("Chip count {0} is outside the supported range {1}..={2}")]
    ChipCount(usize, usize, usize),

    #[error("Cores per chip {0} is outside the supported range {1}..={2}")]
    CoresPerChip(usize, usize, usize),

    #[error("Memory size must be at least one word")]
    EmptyMemory,

    #[error("Protocol {0} does not support a chip layout")]
    UnsupportedChipLayout(String),

    #[error("Unknown protocol '{0}'. Expected 'MSI', 'MESI' or 'PIRANHA'.")]
    UnknownProtocol(String),
}

/// Errors related to workloads and trace files
#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error("Operation {index} targets node {node} of {node_count}")]
    UnknownNode {
        index: usize,
        node: NodeId,
        node_count: usize,
    },

    #[error("Operation {index} targets {address:#x} past {memory_size} words")]
    AddressOutOfRange {
        index: usize,
        address: Address,
        memory_size: usize,
    },

    #[error("Failed to parse trace '{path}' at line {line}: {reason}")]
    ParseError {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Unreachable protocol states. Any of these means the state machine
/// entered an undefined transition.
#[derive(Error, Debug, PartialEq)]
pub enum CoherenceError {
    #[error("Message addressed to node {0}, which does not exist")]
    UnknownNode(NodeId),

    #[error("{protocol} never handles a {kind} message sent to {target}")]
    UnexpectedMessage {
        protocol: &'static str,
        kind: MessageKind,
        target: String,
    },

    #[error("{protocol} has no transition from line state {state}")]
    UnexpectedState {
        protocol: &'static str,
        state: LineState,
    },

    #[error("{0} message at address {1:#x} carries no requester")]
    MissingRequester(MessageKind, Address),

    #[error("Address {address:#x} is writable by both {first} and {second}")]
    MultipleWriters {
        address: Address,
        first: NodeId,
        second: NodeId,
    },

    #[error("Directory entry for {address:#x} is inconsistent: {reason}")]
    DirectoryInconsistency { address: Address, reason: String },
}

/// Errors raised while driving a simulation
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Step limit reached: {0} steps without completing the workload")]
    StepLimitReached(u64),

    #[error("No snapshot left to step back to")]
    EmptyHistory,
}

/// Type alias for Result with SimulatorError
pub type SimulatorResult<T> = Result<T, SimulatorError>;

//! Coherence protocols
//!
//! Each protocol is a pure function pair: a CPU-request handler consulted
//! when an operation starts, and a message handler consulted once per
//! delivered message. Handlers only read the simulation state; every effect
//! is returned in a [`ProtocolResult`] for the engine to apply.

pub mod mesi;
pub mod message;
pub mod msi;
pub mod piranha;

use crate::config::{ProtocolKind, SimulationConfig};
use crate::error::{CoherenceError, ConfigError};
use crate::memory::cache::{CacheLine, LineState, Node};
use crate::memory::directory::{Directory, DirectoryEntry};
use crate::memory::{Address, Memory, Word};
use crate::topology::{ChipLayout, NodeId};
use crate::workload::Operation;
use message::{Message, Packet};

/// A cache line transition on one node
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateChange {
    pub node: NodeId,
    pub address: Address,
    pub old_state: LineState,
    pub new_line: CacheLine,
}

impl StateChange {
    pub fn new_state(&self) -> LineState {
        self.new_line.state()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryUpdate {
    pub address: Address,
    pub data: Word,
}

/// Replacement value for one directory entry
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryUpdate {
    pub address: Address,
    pub entry: DirectoryEntry,
}

/// Side effects requested by a handler
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProtocolResult {
    pub messages: Vec<Packet>,
    pub state_changes: Vec<StateChange>,
    pub memory_updates: Vec<MemoryUpdate>,
    pub directory_updates: Vec<DirectoryUpdate>,
    /// Set when the operation finished without any traffic
    pub complete: bool,
}

impl ProtocolResult {
    /// A hit: no traffic, nothing changes
    pub fn hit() -> Self {
        Self { complete: true, ..Self::default() }
    }

    /// A miss that puts one request on the wire
    pub fn request(packet: Packet) -> Self {
        Self { messages: vec![packet], ..Self::default() }
    }

    pub fn send(&mut self, packet: Packet) {
        self.messages.push(packet);
    }

    /// Record `node` moving from `old_state` to `new_line` at `address`
    pub fn transition(
        &mut self,
        node: NodeId,
        address: Address,
        old_state: LineState,
        new_line: CacheLine,
    ) {
        self.state_changes.push(StateChange {
            node,
            address,
            old_state,
            new_line,
        });
    }

    pub fn write_memory(&mut self, address: Address, data: Word) {
        self.memory_updates.push(MemoryUpdate { address, data });
    }

    pub fn update_directory(
        &mut self,
        address: Address,
        entry: DirectoryEntry,
    ) {
        self.directory_updates.push(DirectoryUpdate { address, entry });
    }

    /// Mark complete when nothing further is in flight
    fn settle(mut self) -> Self {
        self.complete = self.messages.is_empty();
        self
    }
}

/// The active coherence protocol. Adding a variant forces every
/// dispatch below to handle it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Msi,
    Mesi,
    Piranha(ChipLayout),
}

impl Protocol {
    /// Protocol selected by a configuration, validating it first
    pub fn from_config(
        config: &SimulationConfig,
    ) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        Ok(match config.protocol {
            ProtocolKind::Msi => Protocol::Msi,
            ProtocolKind::Mesi => Protocol::Mesi,
            ProtocolKind::Piranha => match config.chip_layout() {
                Some(layout) => Protocol::Piranha(layout),
                None => {
                    return Err(ConfigError::UnsupportedChipLayout(
                        config.protocol.to_string(),
                    ))
                }
            },
        })
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            Protocol::Msi => ProtocolKind::Msi,
            Protocol::Mesi => ProtocolKind::Mesi,
            Protocol::Piranha(_) => ProtocolKind::Piranha,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// State of a line that has never been touched
    pub fn initial_state(&self) -> LineState {
        LineState::Invalid
    }

    /// Consulted when the engine launches a new operation.
    /// Only the requester's own line decides hit or miss, so memory and
    /// the directory are never read here.
    pub fn handle_cpu_request(
        &self,
        op: &Operation,
        nodes: &[Node],
        _memory: &Memory,
        _directory: &Directory,
    ) -> Result<ProtocolResult, CoherenceError> {
        let node = nodes
            .get(op.node)
            .ok_or(CoherenceError::UnknownNode(op.node))?;
        match self {
            Protocol::Msi => msi::handle_cpu_request(op, node),
            Protocol::Mesi => mesi::handle_cpu_request(op, node),
            Protocol::Piranha(layout) => {
                piranha::handle_cpu_request(layout, op, node)
            }
        }
    }

    /// Consulted once per delivered message
    pub fn handle_message(
        &self,
        msg: &Message,
        nodes: &[Node],
        memory: &Memory,
        directory: &Directory,
    ) -> Result<ProtocolResult, CoherenceError> {
        let result = match self {
            Protocol::Msi => msi::handle_message(msg, nodes, memory)?,
            Protocol::Mesi => mesi::handle_message(msg, nodes, memory)?,
            Protocol::Piranha(layout) => piranha::handle_message(
                layout, msg, nodes, memory, directory,
            )?,
        };
        Ok(result.settle())
    }
}

/// Look up the sender of a bus transaction
pub(crate) fn requesting_node<'a>(
    msg: &Message,
    nodes: &'a [Node],
) -> Result<&'a Node, CoherenceError> {
    let id = msg.from.node().ok_or_else(|| {
        CoherenceError::UnexpectedMessage {
            protocol: "bus",
            kind: msg.kind,
            target: msg.from.to_string(),
        }
    })?;
    nodes.get(id).ok_or(CoherenceError::UnknownNode(id))
}

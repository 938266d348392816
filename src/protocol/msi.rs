//! MSI snooping protocol

use log::trace;

use super::message::{Endpoint, Message, MessageKind, Packet};
use super::{requesting_node, ProtocolResult};
use crate::error::CoherenceError;
use crate::memory::cache::{CacheLine, LineState, Node};
use crate::memory::Memory;
use crate::workload::{Operation, OperationType};

const NAME: &str = "MSI";

pub fn handle_cpu_request(
    op: &Operation,
    node: &Node,
) -> Result<ProtocolResult, CoherenceError> {
    let line = node.cache.line(op.address);
    let bus_request = |kind| {
        let from = Endpoint::Node(node.id);
        Packet::make(kind, from, Endpoint::Bus, op.address).with_data(op.data)
    };

    match (op.kind, line) {
        (
            OperationType::Read,
            CacheLine::Modified(_) | CacheLine::Shared(_),
        ) => Ok(ProtocolResult::hit()),
        (OperationType::Read, CacheLine::Invalid) => {
            Ok(ProtocolResult::request(bus_request(MessageKind::BusRd)))
        }
        (OperationType::Write, CacheLine::Modified(data)) => {
            let mut result = ProtocolResult::hit();
            result.transition(
                node.id,
                op.address,
                LineState::Modified,
                CacheLine::Modified(op.data.unwrap_or(data)),
            );
            Ok(result)
        }
        (OperationType::Write, CacheLine::Shared(_) | CacheLine::Invalid) => {
            Ok(ProtocolResult::request(bus_request(MessageKind::BusRdX)))
        }
        (_, other) => Err(CoherenceError::UnexpectedState {
            protocol: NAME,
            state: other.state(),
        }),
    }
}

pub fn handle_message(
    msg: &Message,
    nodes: &[Node],
    memory: &Memory,
) -> Result<ProtocolResult, CoherenceError> {
    match (msg.to, msg.kind) {
        (Endpoint::Bus, MessageKind::BusRd | MessageKind::BusRdX) => {
            snoop(msg, nodes, memory)
        }
        (Endpoint::Memory, MessageKind::Flush) => {
            let mut result = ProtocolResult::default();
            if let Some(data) = msg.data {
                result.write_memory(msg.address, data);
            }
            Ok(result)
        }
        (to, kind) => Err(CoherenceError::UnexpectedMessage {
            protocol: NAME,
            kind,
            target: to.to_string(),
        }),
    }
}

/// Every node other than the requester observes the bus transaction
fn snoop(
    msg: &Message,
    nodes: &[Node],
    memory: &Memory,
) -> Result<ProtocolResult, CoherenceError> {
    let requester = requesting_node(msg, nodes)?;
    let address = msg.address;
    let mut result = ProtocolResult::default();

    // A flushed dirty value always beats a clean copy, which beats memory
    let mut flushed = None;
    let mut supplied = None;

    for node in nodes.iter().filter(|node| node.id != requester.id) {
        let line = node.cache.line(address);
        let next = match (msg.kind, line) {
            (_, CacheLine::Modified(data)) => {
                flushed = Some(data);
                result.send(
                    Packet::make(
                        MessageKind::Flush,
                        Endpoint::Node(node.id),
                        Endpoint::Memory,
                        address,
                    )
                    .with_data(Some(data)),
                );
                if msg.kind == MessageKind::BusRd {
                    CacheLine::Shared(data)
                } else {
                    CacheLine::Invalid
                }
            }
            (MessageKind::BusRd, CacheLine::Shared(data)) => {
                supplied.get_or_insert(data);
                continue;
            }
            (MessageKind::BusRdX, CacheLine::Shared(data)) => {
                supplied.get_or_insert(data);
                CacheLine::Invalid
            }
            (_, CacheLine::Invalid) => continue,
            (_, other) => {
                return Err(CoherenceError::UnexpectedState {
                    protocol: NAME,
                    state: other.state(),
                })
            }
        };
        trace!(
            "P{} snoops {} @{:#x}: {} -> {}",
            node.id,
            msg.kind,
            address,
            line.state(),
            next.state()
        );
        result.transition(node.id, address, line.state(), next);
    }

    let winning = flushed
        .or(supplied)
        .unwrap_or_else(|| memory.read(address));
    let new_line = match msg.kind {
        MessageKind::BusRdX => {
            CacheLine::Modified(msg.data.unwrap_or(winning))
        }
        _ => CacheLine::Shared(winning),
    };
    let old_state = requester.cache.state(address);
    result.transition(requester.id, address, old_state, new_line);

    Ok(result)
}

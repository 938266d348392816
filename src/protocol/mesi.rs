//! MESI snooping protocol.
//!
//! Adds the Exclusive state to MSI: a sole clean copy that may be
//! upgraded to Modified without any bus transaction.

use log::trace;

use super::message::{Endpoint, Message, MessageKind, Packet};
use super::{requesting_node, ProtocolResult};
use crate::error::CoherenceError;
use crate::memory::cache::{CacheLine, LineState, Node};
use crate::memory::{Address, Memory, Word};
use crate::workload::{Operation, OperationType};

const NAME: &str = "MESI";

pub fn handle_cpu_request(
    op: &Operation,
    node: &Node,
) -> Result<ProtocolResult, CoherenceError> {
    let line = node.cache.line(op.address);
    let bus_request = |kind| {
        let from = Endpoint::Node(node.id);
        let packet = Packet::make(kind, from, Endpoint::Bus, op.address);
        ProtocolResult::request(packet.with_data(op.data))
    };

    match (op.kind, line) {
        (
            OperationType::Read,
            CacheLine::Modified(_)
            | CacheLine::Exclusive(_)
            | CacheLine::Shared(_),
        ) => Ok(ProtocolResult::hit()),
        (OperationType::Read, CacheLine::Invalid) => {
            Ok(bus_request(MessageKind::BusRd))
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
        // Silent upgrade: nobody else can hold a copy
        (OperationType::Write, CacheLine::Exclusive(data)) => {
            let mut result = ProtocolResult::hit();
            result.transition(
                node.id,
                op.address,
                LineState::Exclusive,
                CacheLine::Modified(op.data.unwrap_or(data)),
            );
            Ok(result)
        }
        (OperationType::Write, CacheLine::Shared(_)) => {
            Ok(bus_request(MessageKind::BusUpgr))
        }
        (OperationType::Write, CacheLine::Invalid) => {
            Ok(bus_request(MessageKind::BusRdX))
        }
        (_, other) => Err(unexpected_state(other)),
    }
}

pub fn handle_message(
    msg: &Message,
    nodes: &[Node],
    memory: &Memory,
) -> Result<ProtocolResult, CoherenceError> {
    match (msg.to, msg.kind) {
        (
            Endpoint::Bus,
            MessageKind::BusRd | MessageKind::BusRdX | MessageKind::BusUpgr,
        ) => snoop(msg, nodes, memory),
        (Endpoint::Memory, MessageKind::Flush | MessageKind::FlushOpt) => {
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

fn snoop(
    msg: &Message,
    nodes: &[Node],
    memory: &Memory,
) -> Result<ProtocolResult, CoherenceError> {
    let requester = requesting_node(msg, nodes)?;
    let address = msg.address;
    let mut result = ProtocolResult::default();

    let mut shared_signal = false;
    let mut flushed = None;
    let mut supplied = None;

    for node in nodes.iter().filter(|node| node.id != requester.id) {
        let line = node.cache.line(address);
        let next = match (msg.kind, line) {
            (MessageKind::BusRd, CacheLine::Modified(data)) => {
                flushed = Some(data);
                shared_signal = true;
                result.send(flush_opt(node, address, data));
                CacheLine::Shared(data)
            }
            (MessageKind::BusRd, CacheLine::Exclusive(data)) => {
                supplied.get_or_insert(data);
                shared_signal = true;
                CacheLine::Shared(data)
            }
            (MessageKind::BusRd, CacheLine::Shared(data)) => {
                supplied.get_or_insert(data);
                shared_signal = true;
                continue;
            }
            (MessageKind::BusRdX, CacheLine::Modified(data)) => {
                flushed = Some(data);
                result.send(flush_opt(node, address, data));
                CacheLine::Invalid
            }
            (
                MessageKind::BusRdX,
                CacheLine::Exclusive(data) | CacheLine::Shared(data),
            ) => {
                supplied.get_or_insert(data);
                CacheLine::Invalid
            }
            // The upgrader already holds valid data
            (MessageKind::BusUpgr, CacheLine::Shared(_)) => CacheLine::Invalid,
            (_, CacheLine::Invalid) => continue,
            (_, other) => return Err(unexpected_state(other)),
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

    let own = requester.cache.line(address);
    let supplied = flushed
        .or(supplied)
        .unwrap_or_else(|| memory.read(address));
    let new_line = match msg.kind {
        MessageKind::BusRd if shared_signal => CacheLine::Shared(supplied),
        MessageKind::BusRd => CacheLine::Exclusive(supplied),
        MessageKind::BusUpgr => {
            let data = msg
                .data
                .or(own.data())
                .unwrap_or_else(|| memory.read(address));
            CacheLine::Modified(data)
        }
        _ => CacheLine::Modified(msg.data.unwrap_or(supplied)),
    };
    result.transition(requester.id, address, own.state(), new_line);

    Ok(result)
}

fn flush_opt(node: &Node, address: Address, data: Word) -> Packet {
    let from = Endpoint::Node(node.id);
    Packet::make(MessageKind::FlushOpt, from, Endpoint::Memory, address)
        .with_data(Some(data))
}

fn unexpected_state(line: CacheLine) -> CoherenceError {
    CoherenceError::UnexpectedState {
        protocol: NAME,
        state: line.state(),
    }
}

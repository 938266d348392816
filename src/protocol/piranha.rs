//! Piranha two-level directory protocol
//!
//! Cores are grouped into chips. Every address has a home chip
//! (`address mod chip_count`) whose directory slice tracks it. Requests
//! from a core on the home chip travel as intra-chip `L1_*`/`L2_*`
//! messages; all others cross chips as `DIR_*`/`CHIP_*` messages.
//!
//! When a line has an owner, the directory forwards requests to it and the
//! owner answers the requester directly.

use log::trace;

use super::message::{Endpoint, Message, MessageKind, Packet};
use super::ProtocolResult;
use crate::error::CoherenceError;
use crate::memory::cache::{CacheLine, LineState, Node};
use crate::memory::directory::{DirState, Directory, DirectoryEntry};
use crate::memory::{Address, Memory, Word};
use crate::topology::{ChipLayout, NodeId};
use crate::workload::{Operation, OperationType};

const NAME: &str = "Piranha";

pub fn handle_cpu_request(
    layout: &ChipLayout,
    op: &Operation,
    node: &Node,
) -> Result<ProtocolResult, CoherenceError> {
    let line = node.cache.line(op.address);
    let requesting_chip = layout.chip_of(node.id);
    let home_chip = layout.home_chip(op.address);
    let is_local = requesting_chip == home_chip;

    let request = |local_kind, remote_kind| {
        let kind = if is_local { local_kind } else { remote_kind };
        let from = Endpoint::Node(node.id);
        Packet::make(kind, from, Endpoint::Directory, op.address)
            .with_data(op.data)
            .routed(requesting_chip, home_chip)
    };

    match (op.kind, line) {
        (
            OperationType::Read,
            CacheLine::ValidClean(_) | CacheLine::ValidDirty(_),
        ) => Ok(ProtocolResult::hit()),
        (OperationType::Read, CacheLine::Invalid) => {
            Ok(ProtocolResult::request(request(
                MessageKind::L1Read,
                MessageKind::DirGets,
            )))
        }
        (OperationType::Write, CacheLine::ValidDirty(data)) => {
            let mut result = ProtocolResult::hit();
            result.transition(
                node.id,
                op.address,
                LineState::ValidDirty,
                CacheLine::ValidDirty(op.data.unwrap_or(data)),
            );
            Ok(result)
        }
        (
            OperationType::Write,
            CacheLine::ValidClean(_) | CacheLine::Invalid,
        ) => Ok(ProtocolResult::request(request(
            MessageKind::L1Write,
            MessageKind::DirGetx,
        ))),
        (_, other) => Err(CoherenceError::UnexpectedState {
            protocol: NAME,
            state: other.state(),
        }),
    }
}

pub fn handle_message(
    layout: &ChipLayout,
    msg: &Message,
    nodes: &[Node],
    memory: &Memory,
    directory: &Directory,
) -> Result<ProtocolResult, CoherenceError> {
    match msg.to {
        Endpoint::Directory => at_directory(layout, msg, memory, directory),
        Endpoint::Node(target) => {
            let node = nodes
                .get(target)
                .ok_or(CoherenceError::UnknownNode(target))?;
            let fallback = directory
                .get(msg.address)
                .map(|entry| entry.data)
                .unwrap_or_else(|| memory.read(msg.address));
            at_core(layout, msg, node, fallback)
        }
        to => Err(unexpected(msg.kind, to)),
    }
}

/// Requests arriving at the home directory
fn at_directory(
    layout: &ChipLayout,
    msg: &Message,
    memory: &Memory,
    directory: &Directory,
) -> Result<ProtocolResult, CoherenceError> {
    let address = msg.address;
    let requester = msg
        .from
        .node()
        .ok_or_else(|| unexpected(msg.kind, msg.from))?;
    let home_chip = layout.home_chip(address);
    let mut result = ProtocolResult::default();

    // Entries are created lazily on first reference
    let mut entry = match directory.get(address) {
        Some(entry) => entry.clone(),
        None => {
            let entry = DirectoryEntry::uncached(memory.read(address));
            result.update_directory(address, entry.clone());
            entry
        }
    };

    // An owner other than the requester must answer for the directory
    let remote_owner = entry.owner.filter(|owner| {
        entry.state == DirState::Modified && *owner != requester
    });

    let reply = |kind_local, kind_remote, to: NodeId, data: Word| {
        let to_chip = layout.chip_of(to);
        let kind = if to_chip == home_chip {
            kind_local
        } else {
            kind_remote
        };
        Packet::make(kind, Endpoint::Directory, Endpoint::Node(to), address)
            .with_data(Some(data))
            .routed(home_chip, to_chip)
    };

    match msg.kind {
        MessageKind::L1Read | MessageKind::DirGets => match remote_owner {
            Some(owner) => {
                let owner_chip = layout.chip_of(owner);
                let kind = if owner_chip == home_chip {
                    MessageKind::L1Downgrade
                } else {
                    MessageKind::DirFwdGets
                };
                trace!(
                    "directory forwards {} @{:#x} from P{} to owner P{}",
                    msg.kind,
                    address,
                    requester,
                    owner
                );
                result.send(
                    Packet::make(
                        kind,
                        Endpoint::Directory,
                        Endpoint::Node(owner),
                        address,
                    )
                    .with_requester(requester)
                    .routed(home_chip, owner_chip),
                );
                // Both end up holding clean copies once the owner replies
                entry.state = DirState::Shared;
                entry.owner = None;
                entry.sharers.insert(owner);
                entry.sharers.insert(requester);
                result.update_directory(address, entry);
            }
            _ => {
                result.send(reply(
                    MessageKind::L2Data,
                    MessageKind::DirData,
                    requester,
                    entry.data,
                ));
                if entry.state == DirState::Modified {
                    // Requester is the recorded owner and lost its copy
                    entry.state = DirState::Uncached;
                    entry.owner = None;
                }
                entry.add_sharer(requester);
                result.update_directory(address, entry);
            }
        },
        MessageKind::L1Write | MessageKind::DirGetx => {
            match remote_owner {
                Some(owner) => {
                    let owner_chip = layout.chip_of(owner);
                    trace!(
                        "directory forwards {} @{:#x} from P{} to owner P{}",
                        msg.kind,
                        address,
                        requester,
                        owner
                    );
                    result.send(
                        Packet::make(
                            MessageKind::DirFwdGetx,
                            Endpoint::Directory,
                            Endpoint::Node(owner),
                            address,
                        )
                        .with_data(msg.data)
                        .with_requester(requester)
                        .routed(home_chip, owner_chip),
                    );
                }
                _ => {
                    if entry.state == DirState::Shared {
                        invalidate_sharers(
                            layout, &entry, requester, address, &mut result,
                        );
                    }
                    let granted = msg.data.unwrap_or(entry.data);
                    result.send(
                        reply(
                            MessageKind::L2Data,
                            MessageKind::DirData,
                            requester,
                            granted,
                        )
                        .exclusive(),
                    );
                }
            }
            entry.grant_exclusive(requester);
            result.update_directory(address, entry);
        }
        MessageKind::DirWb => {
            if let Some(data) = msg.data {
                entry.data = data;
                result.write_memory(address, data);
            }
            if entry.owner == Some(requester) {
                entry.state = DirState::Uncached;
                entry.owner = None;
            }
            result.update_directory(address, entry);
        }
        MessageKind::DirAck | MessageKind::L2Ack => {}
        kind => return Err(unexpected(kind, msg.to)),
    }

    Ok(result)
}

/// Invalidate every sharer of `entry` except the writer
fn invalidate_sharers(
    layout: &ChipLayout,
    entry: &DirectoryEntry,
    writer: NodeId,
    address: Address,
    result: &mut ProtocolResult,
) {
    let home_chip = layout.home_chip(address);
    for sharer in entry.sharers.iter().copied().filter(|s| *s != writer) {
        let sharer_chip = layout.chip_of(sharer);
        let kind = if sharer_chip == home_chip {
            MessageKind::L1Inv
        } else {
            MessageKind::DirInv
        };
        result.send(
            Packet::make(
                kind,
                Endpoint::Directory,
                Endpoint::Node(sharer),
                address,
            )
            .routed(home_chip, sharer_chip),
        );
    }
}

/// Messages delivered to one core
fn at_core(
    layout: &ChipLayout,
    msg: &Message,
    node: &Node,
    fallback: Word,
) -> Result<ProtocolResult, CoherenceError> {
    let address = msg.address;
    let line = node.cache.line(address);
    let mut result = ProtocolResult::default();

    match msg.kind {
        MessageKind::L1Downgrade
        | MessageKind::DirFwdGets
        | MessageKind::DirFwdGetx => {
            let requester = msg
                .requester
                .ok_or(CoherenceError::MissingRequester(msg.kind, address))?;
            let data = line.data().unwrap_or(fallback);
            let owner_chip = layout.chip_of(node.id);
            let requester_chip = layout.chip_of(requester);
            let kind = if requester_chip == owner_chip {
                MessageKind::L2Data
            } else {
                MessageKind::ChipData
            };
            let response = Packet::make(
                kind,
                Endpoint::Node(node.id),
                Endpoint::Node(requester),
                address,
            )
            .routed(owner_chip, requester_chip);

            if msg.kind == MessageKind::DirFwdGetx {
                let granted = msg.data.unwrap_or(data);
                result.send(response.with_data(Some(granted)).exclusive());
                result.transition(
                    node.id,
                    address,
                    line.state(),
                    CacheLine::Invalid,
                );
            } else {
                result.send(response.with_data(Some(data)));
                if line.state() == LineState::ValidDirty {
                    // Sharing write-back keeps the home directory current
                    let home_chip = layout.home_chip(address);
                    result.send(
                        Packet::make(
                            MessageKind::DirWb,
                            Endpoint::Node(node.id),
                            Endpoint::Directory,
                            address,
                        )
                        .with_data(Some(data))
                        .routed(owner_chip, home_chip),
                    );
                }
                result.transition(
                    node.id,
                    address,
                    line.state(),
                    CacheLine::ValidClean(data),
                );
            }
        }
        MessageKind::L1Inv | MessageKind::DirInv => {
            if line.is_valid() {
                result.transition(
                    node.id,
                    address,
                    line.state(),
                    CacheLine::Invalid,
                );
            }
        }
        kind if kind.is_data_response() => {
            let data = msg.data.unwrap_or(0);
            let new_line = if msg.exclusive {
                CacheLine::ValidDirty(data)
            } else {
                CacheLine::ValidClean(data)
            };
            result.transition(node.id, address, line.state(), new_line);
        }
        kind => return Err(unexpected(kind, msg.to)),
    }

    Ok(result)
}

fn unexpected(kind: MessageKind, target: Endpoint) -> CoherenceError {
    CoherenceError::UnexpectedMessage {
        protocol: NAME,
        kind,
        target: target.to_string(),
    }
}

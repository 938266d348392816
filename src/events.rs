//! Append-only event log
//!
//! Every observable effect of a step is recorded here in order. Records are
//! addressed by index, so a consumer can remember how far it has read and
//! resume from there with [`EventLog::iter_from`].

use std::fmt;

use crate::protocol::message::{Message, MessageId};
use crate::protocol::{DirectoryUpdate, MemoryUpdate, StateChange};
use crate::workload::Operation;

#[derive(Clone, Debug, PartialEq)]
pub enum EventKind {
    CpuRequest(Operation),
    MessageSend(Message),
    MessageArrive(MessageId),
    StateChange(StateChange),
    MemoryUpdate(MemoryUpdate),
    DirectoryUpdate(DirectoryUpdate),
    OperationComplete { operation_index: usize },
}

impl EventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::CpuRequest(_) => "cpu_request",
            EventKind::MessageSend(_) => "message_send",
            EventKind::MessageArrive(_) => "message_arrive",
            EventKind::StateChange(_) => "state_change",
            EventKind::MemoryUpdate(_) => "memory_update",
            EventKind::DirectoryUpdate(_) => "directory_update",
            EventKind::OperationComplete { .. } => "operation_complete",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub id: usize,
    /// Simulation time of the step that produced the event
    pub timestamp: u64,
    pub kind: EventKind,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[t={:>4}] {:<18} ", self.timestamp, self.kind.tag())?;
        match &self.kind {
            EventKind::CpuRequest(op) => write!(f, "{}", op),
            EventKind::MessageSend(msg) => write!(f, "{}", msg),
            EventKind::MessageArrive(id) => write!(f, "#{}", id),
            EventKind::StateChange(change) => write!(
                f,
                "P{} @{:#x}: {} -> {}",
                change.node,
                change.address,
                change.old_state,
                change.new_line
            ),
            EventKind::MemoryUpdate(update) => {
                write!(f, "mem[{:#x}] = {}", update.address, update.data)
            }
            EventKind::DirectoryUpdate(update) => {
                let entry = &update.entry;
                write!(
                    f,
                    "dir[{:#x}] = {} owner={:?} sharers={:?}",
                    update.address, entry.state, entry.owner, entry.sharers
                )
            }
            EventKind::OperationComplete { operation_index } => {
                write!(f, "op {}", operation_index)
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn make() -> Self {
        Self::default()
    }

    /// Append a record, assigning it the next id
    pub fn push(&mut self, timestamp: u64, kind: EventKind) {
        let id = self.events.len();
        self.events.push(Event { id, timestamp, kind });
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Records from `index` onwards; empty once `index` passes the end
    pub fn iter_from(&self, index: usize) -> std::slice::Iter<'_, Event> {
        self.events.get(index..).unwrap_or(&[]).iter()
    }

    /// Number of records carrying `tag`
    pub fn count(&self, tag: &str) -> usize {
        self.events
            .iter()
            .filter(|event| event.kind.tag() == tag)
            .count()
    }
}

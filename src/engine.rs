//! Step engine
//!
//! [`SimulationState`] is the aggregate root of a simulation. Each call to
//! [`SimulationState::step`] performs exactly one unit of work: it delivers
//! the oldest in-flight message if there is one, and otherwise launches the
//! next queued operation.

use std::collections::BTreeSet;
use std::collections::VecDeque;

use log::debug;

use crate::config::SimulationConfig;
use crate::error::{
    CoherenceError, ConfigError, SimulatorResult, WorkloadError,
};
use crate::events::{EventKind, EventLog};
use crate::memory::cache::Node;
use crate::memory::directory::Directory;
use crate::memory::{Address, Memory};
use crate::protocol::message::{Message, MessageId, Packet};
use crate::protocol::{Protocol, ProtocolResult};
use crate::topology::{self, Chip, ChipLayout};
use crate::workload::Operation;

/// Complete simulation state.
///
/// Every container is owned, so `clone` yields a fully independent copy.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationState {
    pub config: SimulationConfig,
    pub nodes: Vec<Node>,
    pub memory: Memory,
    /// Flat directory, only populated by Piranha
    pub directory: Directory,
    /// Chip hierarchy, present only for Piranha
    pub chips: Option<Vec<Chip>>,
    pub layout: Option<ChipLayout>,
    /// In-flight messages in delivery order
    pub pending: VecDeque<Message>,
    pub event_log: EventLog,
    pub operations: Vec<Operation>,
    /// Index of the operation currently in progress
    pub cursor: usize,
    pub current_time: u64,
    next_message_id: MessageId,
}

/// Build a fresh state with empty caches, zeroed memory and no workload
pub fn create_initial_state(
    config: SimulationConfig,
) -> Result<SimulationState, ConfigError> {
    let config = config.validated()?;
    let layout = config.chip_layout();
    let initial = Protocol::from_config(&config)?.initial_state();

    Ok(SimulationState {
        config,
        nodes: (0..config.node_count)
            .map(|id| Node::make(id, initial))
            .collect(),
        memory: Memory::make(config.memory_size),
        directory: Directory::make(),
        chips: layout.map(|layout| topology::build_chips(&layout)),
        layout,
        pending: VecDeque::new(),
        event_log: EventLog::make(),
        operations: Vec::new(),
        cursor: 0,
        current_time: 0,
        next_message_id: 0,
    })
}

/// Advance a copy of `state` by one step, leaving `state` untouched
pub fn step(
    state: &SimulationState,
    protocol: &Protocol,
) -> SimulatorResult<SimulationState> {
    let mut next = state.snapshot();
    next.step(protocol)?;
    Ok(next)
}

impl SimulationState {
    /// Replace the operation queue. Every operation must name an existing
    /// node and an address inside memory.
    pub fn load_workload(
        &mut self,
        operations: Vec<Operation>,
    ) -> Result<(), WorkloadError> {
        for (index, op) in operations.iter().enumerate() {
            if op.node >= self.nodes.len() {
                return Err(WorkloadError::UnknownNode {
                    index,
                    node: op.node,
                    node_count: self.nodes.len(),
                });
            }
            if !self.memory.contains(op.address) {
                return Err(WorkloadError::AddressOutOfRange {
                    index,
                    address: op.address,
                    memory_size: self.memory.size(),
                });
            }
        }

        self.operations = operations;
        self.cursor = 0;
        self.pending.clear();
        Ok(())
    }

    /// True once every operation has run and no message is in flight
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.operations.len() && self.pending.is_empty()
    }

    /// The operation currently in progress, if any
    pub fn current_operation(&self) -> Option<&Operation> {
        self.operations.get(self.cursor)
    }

    /// Deep copy sharing no container with `self`
    pub fn snapshot(&self) -> SimulationState {
        self.clone()
    }

    /// Advance the simulation by one unit of work. A completed simulation
    /// is left as is.
    pub fn step(&mut self, protocol: &Protocol) -> SimulatorResult<()> {
        if self.is_complete() {
            return Ok(());
        }

        self.current_time += 1;
        match self.pending.pop_front() {
            Some(msg) => self.deliver(protocol, msg)?,
            None => self.launch(protocol)?,
        }
        Ok(())
    }

    fn deliver(
        &mut self,
        protocol: &Protocol,
        msg: Message,
    ) -> Result<(), CoherenceError> {
        debug!("t={} deliver {}", self.current_time, msg);
        self.log(EventKind::MessageArrive(msg.id));

        let result = protocol.handle_message(
            &msg,
            &self.nodes,
            &self.memory,
            &self.directory,
        )?;
        self.apply(&result)?;
        self.enqueue(result.messages);

        if self.pending.is_empty() {
            self.complete_operation();
        }
        Ok(())
    }

    fn launch(&mut self, protocol: &Protocol) -> Result<(), CoherenceError> {
        let Some(op) = self.current_operation().copied() else {
            return Ok(());
        };
        debug!("t={} launch op {}: {}", self.current_time, self.cursor, op);
        self.log(EventKind::CpuRequest(op));

        let result = protocol.handle_cpu_request(
            &op,
            &self.nodes,
            &self.memory,
            &self.directory,
        )?;
        self.apply(&result)?;

        if result.complete {
            debug!(
                "t={} P{} hit @{:#x}",
                self.current_time, op.node, op.address
            );
            self.complete_operation();
        } else {
            self.enqueue(result.messages);
        }
        Ok(())
    }

    /// Apply cache, memory and directory updates, then refresh the chip views
    fn apply(&mut self, result: &ProtocolResult) -> Result<(), CoherenceError> {
        for change in &result.state_changes {
            let node = self
                .nodes
                .get_mut(change.node)
                .ok_or(CoherenceError::UnknownNode(change.node))?;
            node.cache.set(change.address, change.new_line);
            self.log(EventKind::StateChange(*change));
        }

        for update in &result.memory_updates {
            self.memory.write(update.address, update.data);
            self.log(EventKind::MemoryUpdate(*update));
        }

        for update in &result.directory_updates {
            self.directory.insert(update.address, update.entry.clone());
            if let (Some(chips), Some(layout)) =
                (self.chips.as_mut(), self.layout.as_ref())
            {
                topology::mirror_directory(
                    chips,
                    layout,
                    update.address,
                    &update.entry,
                );
            }
            self.log(EventKind::DirectoryUpdate(update.clone()));
        }

        if let (Some(chips), Some(layout)) =
            (self.chips.as_mut(), self.layout.as_ref())
        {
            let touched: BTreeSet<Address> = result
                .state_changes
                .iter()
                .map(|change| change.address)
                .collect();
            for address in touched {
                topology::sync_l2(chips, layout, &self.nodes, address);
            }
        }
        Ok(())
    }

    /// Stamp and queue freshly emitted packets
    fn enqueue(&mut self, packets: Vec<Packet>) {
        for packet in packets {
            let msg =
                packet.into_message(self.next_message_id, self.current_time);
            self.next_message_id += 1;
            self.log(EventKind::MessageSend(msg.clone()));
            self.pending.push_back(msg);
        }
    }

    fn complete_operation(&mut self) {
        self.log(EventKind::OperationComplete {
            operation_index: self.cursor,
        });
        self.cursor += 1;
    }

    fn log(&mut self, kind: EventKind) {
        self.event_log.push(self.current_time, kind);
    }

    /// Check the single-writer property over every cache and the
    /// directory's own invariants
    pub fn check_coherence(&self) -> Result<(), CoherenceError> {
        let addresses: BTreeSet<Address> = self
            .nodes
            .iter()
            .flat_map(|node| node.cache.iter().map(|(address, _)| *address))
            .collect();

        for address in addresses {
            let holders: Vec<&Node> = self
                .nodes
                .iter()
                .filter(|node| node.cache.line(address).is_valid())
                .collect();
            let writer = holders
                .iter()
                .find(|node| node.cache.state(address).is_exclusive_owner());
            if let Some(writer) = writer {
                let other = holders.iter().find(|node| node.id != writer.id);
                if let Some(other) = other {
                    return Err(CoherenceError::MultipleWriters {
                        address,
                        first: writer.id.min(other.id),
                        second: writer.id.max(other.id),
                    });
                }
            }
        }

        self.directory.verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolKind;
    use crate::memory::cache::{CacheLine, LineState};
    use crate::memory::directory::{DirState, DirectoryEntry};
    use crate::protocol::message::{Endpoint, MessageKind};
    use crate::topology::NodeId;
    use crate::workload::OperationType;

    const STEP_LIMIT: usize = 1_000;

    fn setup(
        config: SimulationConfig,
        operations: Vec<Operation>,
    ) -> (SimulationState, Protocol) {
        let protocol = Protocol::from_config(&config).unwrap();
        let mut state = create_initial_state(config).unwrap();
        state.load_workload(operations).unwrap();
        (state, protocol)
    }

    fn drain(state: &mut SimulationState, protocol: &Protocol) {
        for _ in 0..STEP_LIMIT {
            if state.is_complete() {
                return;
            }
            state.step(protocol).unwrap();
            state.check_coherence().unwrap();
        }
        panic!("simulation did not complete");
    }

    fn sent(state: &SimulationState) -> Vec<&Message> {
        state
            .event_log
            .iter()
            .filter_map(|event| match &event.kind {
                EventKind::MessageSend(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    fn line(
        state: &SimulationState,
        node: NodeId,
        address: Address,
    ) -> CacheLine {
        state.nodes[node].cache.line(address)
    }

    #[test]
    fn test_msi_read_sharing() {
        let config = SimulationConfig::bus(ProtocolKind::Msi, 2);
        let ops = vec![Operation::read(0, 0), Operation::read(1, 0)];
        let (mut state, protocol) = setup(config, ops);
        drain(&mut state, &protocol);

        assert_eq!(line(&state, 0, 0), CacheLine::Shared(0));
        assert_eq!(line(&state, 1, 0), CacheLine::Shared(0));
        assert_eq!(state.event_log.count("memory_update"), 0);
        assert_eq!(state.memory.written().count(), 0);
    }

    #[test]
    fn test_msi_write_invalidates_reader() {
        let config = SimulationConfig::bus(ProtocolKind::Msi, 2);
        let ops = vec![Operation::read(0, 0), Operation::write(1, 0, 42)];
        let (mut state, protocol) = setup(config, ops);
        drain(&mut state, &protocol);

        assert_eq!(line(&state, 1, 0), CacheLine::Modified(42));
        assert_eq!(line(&state, 0, 0).state(), LineState::Invalid);
        assert_eq!(state.memory.read(0), 0);
    }

    #[test]
    fn test_mesi_silent_upgrade() {
        let config = SimulationConfig::bus(ProtocolKind::Mesi, 1);
        let ops = vec![Operation::read(0, 0), Operation::write(0, 0, 99)];
        let (mut state, protocol) = setup(config, ops);

        while state.cursor < 1 {
            state.step(&protocol).unwrap();
        }
        assert_eq!(line(&state, 0, 0), CacheLine::Exclusive(0));

        let sent_before = sent(&state).len();
        drain(&mut state, &protocol);
        assert_eq!(line(&state, 0, 0), CacheLine::Modified(99));
        assert_eq!(sent(&state).len(), sent_before);
    }

    #[test]
    fn test_piranha_local_sharing() {
        let config = SimulationConfig::piranha(2, 2);
        let ops = vec![Operation::write(0, 0, 10), Operation::read(1, 0)];
        let (mut state, protocol) = setup(config, ops);

        while state.cursor < 1 {
            state.step(&protocol).unwrap();
        }
        assert_eq!(line(&state, 0, 0), CacheLine::ValidDirty(10));

        drain(&mut state, &protocol);
        assert!(sent(&state).iter().all(|msg| !msg.is_inter_chip()));
        assert_eq!(line(&state, 1, 0), CacheLine::ValidClean(10));
        assert_eq!(line(&state, 0, 0), CacheLine::ValidClean(10));

        let downgrade =
            state.event_log.iter().find_map(|event| match &event.kind {
                EventKind::StateChange(change)
                    if change.node == 0
                        && change.new_state() == LineState::ValidClean =>
                {
                    Some(change.old_state)
                }
                _ => None,
            });
        assert_eq!(downgrade, Some(LineState::ValidDirty));
        assert_eq!(state.memory.read(0), 10);
    }

    #[test]
    fn test_piranha_cross_chip_tagging() {
        let config = SimulationConfig::piranha(2, 2);
        let ops = vec![Operation::read(0, 1), Operation::read(2, 1)];
        let (mut state, protocol) = setup(config, ops);
        drain(&mut state, &protocol);

        let requests: Vec<_> = sent(&state)
            .into_iter()
            .filter(|msg| msg.to == Endpoint::Directory)
            .map(|msg| (msg.kind, msg.is_inter_chip()))
            .collect();
        assert_eq!(
            requests,
            vec![(MessageKind::DirGets, true), (MessageKind::L1Read, false)]
        );

        let entry = state.directory.get(1).unwrap();
        assert_eq!(entry.state, DirState::Shared);
        let sharers: Vec<_> = entry.sharers.iter().copied().collect();
        assert_eq!(sharers, vec![0, 2]);
    }

    #[test]
    fn test_piranha_dataless_write_takes_owner_value() {
        let config = SimulationConfig::piranha(2, 2);
        let dataless = Operation {
            node: 2,
            kind: OperationType::Write,
            address: 0,
            data: None,
        };
        let ops = vec![Operation::write(0, 0, 5), dataless];
        let (mut state, protocol) = setup(config, ops);
        drain(&mut state, &protocol);

        assert!(sent(&state)
            .iter()
            .any(|msg| msg.kind == MessageKind::DirFwdGetx));
        assert_eq!(line(&state, 0, 0), CacheLine::Invalid);
        assert_eq!(line(&state, 2, 0), CacheLine::ValidDirty(5));
        assert_eq!(state.directory.get(0).unwrap().owner, Some(2));
    }

    #[test]
    fn test_untouched_lines_start_in_initial_state() {
        for config in all_protocols() {
            let protocol = Protocol::from_config(&config).unwrap();
            let state = create_initial_state(config).unwrap();
            assert_eq!(protocol.initial_state(), LineState::Invalid);
            for node in &state.nodes {
                assert!(!node.cache.is_touched(3));
                assert_eq!(node.cache.state(3), protocol.initial_state());
                assert_eq!(node.cache.line(3).data(), None);
            }
        }
    }

    #[test]
    fn test_completion_waits_for_queue() {
        let config = SimulationConfig::bus(ProtocolKind::Msi, 2);
        let ops = vec![Operation::write(0, 0, 5), Operation::read(1, 0)];
        let (mut state, protocol) = setup(config, ops);

        let mut ticks: u64 = 0;
        while !state.is_complete() {
            state.step(&protocol).unwrap();
            ticks += 1;
            let drained = state.cursor >= state.operations.len()
                && state.pending.is_empty();
            assert_eq!(state.is_complete(), drained);
            assert!(ticks < STEP_LIMIT as u64);
        }
        // BusRdX, then BusRd and the Flush it triggers
        assert_eq!(ticks, 5);
        assert_eq!(state.cursor, 2);
        assert_eq!(state.current_time, ticks);
        assert_eq!(state.event_log.count("operation_complete"), 2);
    }

    #[test]
    fn test_complete_state_does_not_advance() {
        let config = SimulationConfig::bus(ProtocolKind::Mesi, 1);
        let (mut state, protocol) = setup(config, vec![]);
        assert!(state.is_complete());
        state.step(&protocol).unwrap();
        assert_eq!(state.current_time, 0);
        assert!(state.event_log.is_empty());
    }

    #[test]
    fn test_flushed_value_wins_over_memory() {
        for kind in [ProtocolKind::Msi, ProtocolKind::Mesi] {
            let ops = vec![
                Operation::write(0, 2, 7),
                Operation::read(1, 2),
                Operation::write(2, 3, 1),
            ];
            let (mut state, protocol) =
                setup(SimulationConfig::bus(kind, 3), ops);
            drain(&mut state, &protocol);
            assert_eq!(line(&state, 1, 2), CacheLine::Shared(7));
            assert_eq!(state.memory.read(2), 7);

            let ops = vec![
                Operation::write(0, 2, 7),
                Operation::read(1, 2),
                Operation::write(1, 2, 8),
            ];
            let (mut state, protocol) =
                setup(SimulationConfig::bus(kind, 2), ops);
            drain(&mut state, &protocol);
            assert_eq!(line(&state, 1, 2), CacheLine::Modified(8));
        }
    }

    fn migratory() -> Vec<Operation> {
        (0..4)
            .flat_map(|node| {
                [
                    Operation::read(node, 1),
                    Operation::write(node, 1, node as i64 + 1),
                ]
            })
            .collect()
    }

    fn all_protocols() -> [SimulationConfig; 3] {
        [
            SimulationConfig::bus(ProtocolKind::Msi, 4),
            SimulationConfig::bus(ProtocolKind::Mesi, 4),
            SimulationConfig::piranha(2, 2),
        ]
    }

    #[test]
    fn test_single_writer_under_contention() {
        let ping_pong: Vec<Operation> = (0..6)
            .map(|i| Operation::write(i % 2, 0, i as i64))
            .chain([Operation::read(0, 0)])
            .collect();

        let migratory = migratory();
        for config in all_protocols() {
            for workload in [&ping_pong, &migratory] {
                let (mut state, protocol) = setup(config, workload.clone());
                drain(&mut state, &protocol);
            }
        }
    }

    #[test]
    fn test_migratory_value_survives() {
        let mut ops = migratory();
        ops.push(Operation::read(0, 1));
        for config in all_protocols() {
            let (mut state, protocol) = setup(config, ops.clone());
            drain(&mut state, &protocol);
            let value = line(&state, 0, 1).data();
            assert_eq!(value, Some(4), "{}", protocol.name());
        }
    }

    #[test]
    fn test_piranha_write_invalidates_sharers() {
        let config = SimulationConfig::piranha(2, 2);
        let ops = vec![
            Operation::read(0, 0),
            Operation::read(3, 0),
            Operation::write(1, 0, 6),
        ];
        let (mut state, protocol) = setup(config, ops);
        drain(&mut state, &protocol);

        assert_eq!(line(&state, 0, 0), CacheLine::Invalid);
        assert_eq!(line(&state, 3, 0), CacheLine::Invalid);
        assert_eq!(line(&state, 1, 0), CacheLine::ValidDirty(6));
        let kinds: Vec<_> = sent(&state).iter().map(|msg| msg.kind).collect();
        assert!(kinds.contains(&MessageKind::L1Inv));
        assert!(kinds.contains(&MessageKind::DirInv));

        let entry = state.directory.get(0).unwrap();
        assert_eq!((entry.state, entry.owner), (DirState::Modified, Some(1)));
        let chips = state.chips.as_ref().unwrap();
        assert_eq!(chips[0].l2_cache[&0].local_owner, Some(1));
        assert!(!chips[1].l2_cache.contains_key(&0));
    }

    #[test]
    fn test_piranha_remote_ownership_transfer() {
        let config = SimulationConfig::piranha(2, 2);
        let ops = vec![
            Operation::write(0, 1, 3),
            Operation::write(3, 1, 4),
            Operation::read(1, 1),
        ];
        let (mut state, protocol) = setup(config, ops);
        drain(&mut state, &protocol);

        let kinds: Vec<_> = sent(&state).iter().map(|msg| msg.kind).collect();
        assert!(kinds.contains(&MessageKind::DirFwdGetx));
        assert!(kinds.contains(&MessageKind::ChipData));
        assert_eq!(line(&state, 0, 1), CacheLine::Invalid);
        assert_eq!(line(&state, 3, 1), CacheLine::ValidClean(4));
        assert_eq!(line(&state, 1, 1), CacheLine::ValidClean(4));
        assert_eq!(state.directory.get(1).unwrap().data, 4);
    }

    #[test]
    fn test_home_chip_determinism() {
        let config = SimulationConfig::piranha(2, 2);
        let ops: Vec<Operation> = (0..8)
            .map(|i| Operation::write(i % 4, i as Address % 5, i as i64))
            .collect();
        let (mut state, protocol) = setup(config, ops);
        let layout = state.layout.unwrap();
        let homes: Vec<_> =
            (0..5).map(|address| layout.home_chip(address)).collect();

        drain(&mut state, &protocol);

        let chips = state.chips.as_ref().unwrap();
        for (address, _) in state.directory.iter() {
            let home = homes[*address as usize];
            assert_eq!(layout.home_chip(*address), home);
            for chip in chips {
                let tracked = chip.l2_directory.contains_key(address);
                assert_eq!(tracked, chip.id == home);
            }
        }
    }

    #[test]
    fn test_snapshot_independence() {
        let config = SimulationConfig::piranha(2, 2);
        let ops = vec![Operation::write(0, 0, 1), Operation::read(2, 0)];
        let (mut state, protocol) = setup(config, ops);
        drain(&mut state, &protocol);
        let snapshot = state.snapshot();

        state.nodes[0].cache.set(0, CacheLine::Invalid);
        state.memory.write(0, 55);
        state.directory.insert(0, DirectoryEntry::uncached(55));
        if let Some(chips) = state.chips.as_mut() {
            chips[0].l2_cache.clear();
        }

        assert_eq!(snapshot.nodes[0].cache.line(0), CacheLine::ValidClean(1));
        assert_eq!(snapshot.memory.read(0), 1);
        let entry = snapshot.directory.get(0).unwrap();
        assert_eq!(entry.state, DirState::Shared);
        let chips = snapshot.chips.as_ref().unwrap();
        assert!(chips[0].l2_cache.contains_key(&0));
    }

    #[test]
    fn test_free_step_leaves_input_untouched() {
        let config = SimulationConfig::bus(ProtocolKind::Msi, 2);
        let (state, protocol) = setup(config, vec![Operation::read(0, 0)]);
        let next = step(&state, &protocol).unwrap();
        assert_eq!(state.current_time, 0);
        assert_eq!(next.current_time, 1);
        assert_eq!(next.pending.len(), 1);
        assert!(state.pending.is_empty());
    }

    #[test]
    fn test_load_workload_rejects_out_of_range() {
        let config = SimulationConfig::bus(ProtocolKind::Msi, 2);
        let mut state = create_initial_state(config).unwrap();
        assert!(matches!(
            state.load_workload(vec![Operation::read(2, 0)]),
            Err(WorkloadError::UnknownNode {
                index: 0,
                node: 2,
                node_count: 2
            })
        ));
        let ops = vec![Operation::read(0, 0), Operation::read(1, 8)];
        assert!(matches!(
            state.load_workload(ops),
            Err(WorkloadError::AddressOutOfRange {
                index: 1,
                address: 8,
                memory_size: 8
            })
        ));
        assert!(state.operations.is_empty());
    }

    #[test]
    fn test_checker_catches_two_writers() {
        let config = SimulationConfig::bus(ProtocolKind::Mesi, 3);
        let mut state = create_initial_state(config).unwrap();
        state.nodes[0].cache.set(4, CacheLine::Modified(1));
        state.nodes[2].cache.set(4, CacheLine::Shared(1));
        assert_eq!(
            state.check_coherence(),
            Err(CoherenceError::MultipleWriters {
                address: 4,
                first: 0,
                second: 2
            })
        );
    }
}

//! A simulator wrapper

use log::info;

use crate::config::SimulationConfig;
use crate::engine::{self, SimulationState};
use crate::error::{ExecutionError, SimulatorResult};
use crate::events::EventKind;
use crate::protocol::Protocol;
use crate::workload::Workload;

/// Livelock guard; real workloads finish in a few messages per operation
pub const MAX_STEPS: u64 = 1_000_000;

/// Traffic counters of one finished run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunStats {
    pub steps: u64,
    pub operations: usize,
    pub messages: usize,
    pub inter_chip_messages: usize,
    pub memory_writes: usize,
    pub directory_updates: usize,
    pub messages_per_operation: f64,
}

impl RunStats {
    /// Collect counters from a state's event log
    pub fn from_state(state: &SimulationState) -> Self {
        let mut stats = RunStats {
            steps: state.current_time,
            operations: state.cursor,
            ..Default::default()
        };
        for event in state.event_log.iter() {
            match &event.kind {
                EventKind::MessageSend(msg) => {
                    stats.messages += 1;
                    if msg.is_inter_chip() {
                        stats.inter_chip_messages += 1;
                    }
                }
                EventKind::MemoryUpdate(_) => stats.memory_writes += 1,
                EventKind::DirectoryUpdate(_) => stats.directory_updates += 1,
                _ => {}
            }
        }
        if stats.operations > 0 {
            stats.messages_per_operation =
                stats.messages as f64 / stats.operations as f64;
        }
        stats
    }
}

/// Run `workload` to completion under `config` and return the final state
pub fn run_to_completion(
    workload: &Workload,
    config: SimulationConfig,
) -> SimulatorResult<SimulationState> {
    let protocol = Protocol::from_config(&config)?;
    let mut state = engine::create_initial_state(config)?;
    let adjusted = workload.adjusted(state.config.node_count);
    state.load_workload(adjusted.operations)?;

    while !state.is_complete() {
        if state.current_time >= MAX_STEPS {
            let err = ExecutionError::StepLimitReached(MAX_STEPS);
            return Err(err.into());
        }
        state.step(&protocol)?;
        state.check_coherence()?;
    }
    Ok(state)
}

/// Run simulation on the given workload and return its statistics
pub fn run(
    workload: &Workload,
    config: SimulationConfig,
) -> SimulatorResult<RunStats> {
    let state = run_to_completion(workload, config)?;
    let stats = RunStats::from_state(&state);

    info!(
        "{} on '{}': {} ops, {} steps, {} messages ({} inter-chip), \
         {} memory writes",
        state.config.protocol,
        workload.name,
        stats.operations,
        stats.steps,
        stats.messages,
        stats.inter_chip_messages,
        stats.memory_writes
    );
    Ok(stats)
}

//! Simulation controller with step-back history

use log::{debug, info};

use crate::config::SimulationConfig;
use crate::engine::{self, SimulationState};
use crate::error::{ExecutionError, SimulatorResult};
use crate::protocol::Protocol;
use crate::workload::Workload;

/// Owns the live state and a stack of snapshots, one per step taken
#[derive(Clone, Debug)]
pub struct Simulation {
    pub config: SimulationConfig,
    pub protocol: Protocol,
    pub state: SimulationState,
    history: Vec<SimulationState>,
    /// Workload as loaded, before adjustment to the node count
    workload: Option<Workload>,
}

impl Simulation {
    pub fn make(config: SimulationConfig) -> SimulatorResult<Self> {
        let protocol = Protocol::from_config(&config)?;
        let state = engine::create_initial_state(config)?;
        Ok(Self {
            config: state.config,
            protocol,
            state,
            history: Vec::new(),
            workload: None,
        })
    }

    /// Load `workload` into a fresh state, remapping its nodes onto the
    /// configured node count
    pub fn load_workload(&mut self, workload: Workload) -> SimulatorResult<()> {
        let adjusted = workload.adjusted(self.config.node_count);
        let mut state = engine::create_initial_state(self.config)?;
        state.load_workload(adjusted.operations)?;

        info!(
            "Loaded workload '{}' ({} operations)",
            workload.name,
            workload.operations.len()
        );
        self.state = state;
        self.history.clear();
        self.workload = Some(workload);
        Ok(())
    }

    /// Snapshot the live state, then advance it by one step
    pub fn step(&mut self) -> SimulatorResult<()> {
        if self.state.is_complete() {
            return Ok(());
        }
        let snapshot = self.state.snapshot();
        self.state.step(&self.protocol)?;
        self.history.push(snapshot);
        Ok(())
    }

    /// Restore the state from before the most recent step
    pub fn step_back(&mut self) -> SimulatorResult<()> {
        let previous = self.history.pop().ok_or(ExecutionError::EmptyHistory)?;
        debug!(
            "Stepping back from t={} to t={}",
            self.state.current_time, previous.current_time
        );
        self.state = previous;
        Ok(())
    }

    pub fn can_step_back(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Rebuild the initial state and reload the current workload
    pub fn reset(&mut self) -> SimulatorResult<()> {
        match self.workload.take() {
            Some(workload) => self.load_workload(workload),
            None => {
                self.state = engine::create_initial_state(self.config)?;
                self.history.clear();
                Ok(())
            }
        }
    }

    /// Switch to a new configuration and start over
    pub fn reconfigure(
        &mut self,
        config: SimulationConfig,
    ) -> SimulatorResult<()> {
        let protocol = Protocol::from_config(&config)?;
        let config = config.validated()?;
        info!(
            "Reconfigured: {} with {} nodes",
            protocol.name(),
            config.node_count
        );

        self.config = config;
        self.protocol = protocol;
        self.reset()
    }
}

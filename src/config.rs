//! Simulation configuration

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::topology::ChipLayout;

pub const MIN_NODES: usize = 1;
pub const MAX_NODES: usize = 16;
pub const MAX_CHIPS: usize = 8;
pub const MAX_CORES_PER_CHIP: usize = 8;

const DEFAULT_CHIP_COUNT: usize = 2;
const DEFAULT_CORES_PER_CHIP: usize = 2;

/// The coherence discipline to simulate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProtocolKind {
    #[default]
    Msi,
    Mesi,
    Piranha,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 3] =
        [ProtocolKind::Msi, ProtocolKind::Mesi, ProtocolKind::Piranha];

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolKind::Msi => "MSI",
            ProtocolKind::Mesi => "MESI",
            ProtocolKind::Piranha => "Piranha",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MSI" => Ok(ProtocolKind::Msi),
            "MESI" => Ok(ProtocolKind::Mesi),
            "PIRANHA" => Ok(ProtocolKind::Piranha),
            _ => Err(ConfigError::UnknownProtocol(s.to_string())),
        }
    }
}

/// Simulation configuration, consumed only when (re)building state
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationConfig {
    pub node_count: usize,
    pub protocol: ProtocolKind,
    pub memory_size: usize,
    /// Piranha only
    pub chip_count: Option<usize>,
    /// Piranha only
    pub cores_per_chip: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            node_count: 4,
            protocol: ProtocolKind::Msi,
            memory_size: 8,
            chip_count: None,
            cores_per_chip: None,
        }
    }
}

impl SimulationConfig {
    /// Configuration for a bus protocol with `node_count` nodes
    pub fn bus(protocol: ProtocolKind, node_count: usize) -> Self {
        Self { node_count, protocol, ..Self::default() }
    }

    /// Piranha configuration with the given chip layout
    pub fn piranha(chip_count: usize, cores_per_chip: usize) -> Self {
        Self {
            node_count: chip_count * cores_per_chip,
            protocol: ProtocolKind::Piranha,
            chip_count: Some(chip_count),
            cores_per_chip: Some(cores_per_chip),
            ..Self::default()
        }
    }

    /// Normalize the configuration, or reject it.
    ///
    /// Piranha fills in the default 2x2 layout and derives the node count
    /// from it; bus protocols refuse a chip layout.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.memory_size == 0 {
            return Err(ConfigError::EmptyMemory);
        }

        let config = match self.protocol {
            ProtocolKind::Msi | ProtocolKind::Mesi => {
                if self.chip_count.is_some() || self.cores_per_chip.is_some() {
                    return Err(ConfigError::UnsupportedChipLayout(
                        self.protocol.to_string(),
                    ));
                }
                self
            }
            ProtocolKind::Piranha => {
                let chip_count = self.chip_count.unwrap_or(DEFAULT_CHIP_COUNT);
                let cores_per_chip =
                    self.cores_per_chip.unwrap_or(DEFAULT_CORES_PER_CHIP);
                if !(1..=MAX_CHIPS).contains(&chip_count) {
                    return Err(ConfigError::ChipCount(
                        chip_count, 1, MAX_CHIPS,
                    ));
                }
                if !(1..=MAX_CORES_PER_CHIP).contains(&cores_per_chip) {
                    return Err(ConfigError::CoresPerChip(
                        cores_per_chip,
                        1,
                        MAX_CORES_PER_CHIP,
                    ));
                }
                Self {
                    node_count: chip_count * cores_per_chip,
                    chip_count: Some(chip_count),
                    cores_per_chip: Some(cores_per_chip),
                    ..self
                }
            }
        };

        if !(MIN_NODES..=MAX_NODES).contains(&config.node_count) {
            return Err(ConfigError::NodeCount(
                config.node_count,
                MIN_NODES,
                MAX_NODES,
            ));
        }
        Ok(config)
    }

    /// Chip layout of a validated Piranha configuration
    pub fn chip_layout(&self) -> Option<ChipLayout> {
        match (self.protocol, self.chip_count, self.cores_per_chip) {
            (ProtocolKind::Piranha, Some(chips), Some(cores)) => {
                Some(ChipLayout::make(chips, cores))
            }
            _ => None,
        }
    }
}

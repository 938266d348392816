//! Workloads: queues of CPU operations and the trace files they come from

use std::fmt;
use std::path::Path;

use crate::error::{SimulatorResult, WorkloadError};
use crate::memory::{Address, Word};
use crate::topology::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    Read,
    Write,
}

/// One workload item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Operation {
    pub node: NodeId,
    pub kind: OperationType,
    pub address: Address,
    /// Value to store, for writes
    pub data: Option<Word>,
}

impl Operation {
    pub fn read(node: NodeId, address: Address) -> Self {
        Self { node, kind: OperationType::Read, address, data: None }
    }

    pub fn write(node: NodeId, address: Address, data: Word) -> Self {
        Self { node, kind: OperationType::Write, address, data: Some(data) }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (node, address) = (self.node, self.address);
        match (self.kind, self.data) {
            (OperationType::Read, _) => {
                write!(f, "P{} Read @{:#x}", node, address)
            }
            (OperationType::Write, Some(data)) => {
                write!(f, "P{} Write @{:#x} = {}", node, address, data)
            }
            (OperationType::Write, None) => {
                write!(f, "P{} Write @{:#x}", node, address)
            }
        }
    }
}

/// A named list of operations
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub name: String,
    pub operations: Vec<Operation>,
}

impl Workload {
    pub fn make(name: &str, operations: Vec<Operation>) -> Self {
        Self { name: name.to_string(), operations }
    }

    /// Load a workload from a trace file, named after the file
    pub fn from_file(trace_path: &str) -> SimulatorResult<Self> {
        let name = Path::new(trace_path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| trace_path.to_string());
        Ok(Self { name, operations: fetch_operations(trace_path)? })
    }

    /// Remap every operation's node onto the live node count
    pub fn adjusted(&self, node_count: usize) -> Self {
        Self {
            name: self.name.clone(),
            operations: adjust_for_node_count(&self.operations, node_count),
        }
    }
}

/// Remap each operation's node id modulo `node_count`
pub fn adjust_for_node_count(
    operations: &[Operation],
    node_count: usize,
) -> Vec<Operation> {
    assert!(node_count > 0);
    operations
        .iter()
        .map(|op| Operation {
            node: op.node % node_count,
            ..*op
        })
        .collect()
}

/// Fetch operations from the trace file
pub fn fetch_operations(trace_path: &str) -> SimulatorResult<Vec<Operation>> {
    let content = std::fs::read_to_string(trace_path)?;
    parse_operations(trace_path, &content)
}

/// Parse trace text. Each line reads `<node> <r|w> <address> [data]`;
/// `#` starts a comment and blank lines are skipped.
pub fn parse_operations(
    trace_path: &str,
    content: &str,
) -> SimulatorResult<Vec<Operation>> {
    let mut operations = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let fail = |reason: String| WorkloadError::ParseError {
            path: trace_path.into(),
            line: line_num + 1,
            reason,
        };

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts.len() > 4 {
            let reason = "expected '<node> <r|w> <address> [data]'";
            return Err(fail(reason.to_string()).into());
        }

        let node = parts[0]
            .trim_start_matches(['P', 'p'])
            .parse::<NodeId>()
            .map_err(|_| fail(format!("invalid node '{}'", parts[0])))?;

        let address = parse_address(parts[2])
            .ok_or_else(|| fail(format!("invalid address '{}'", parts[2])))?;

        let data = match parts.get(3) {
            Some(token) => Some(
                token
                    .parse::<Word>()
                    .map_err(|_| fail(format!("invalid data '{}'", token)))?,
            ),
            None => None,
        };

        let kind = match parts[1].to_lowercase().as_str() {
            "r" | "read" => OperationType::Read,
            "w" | "write" => OperationType::Write,
            other => {
                let reason = format!(
                    "invalid operation '{}': expected 'r' or 'w'",
                    other
                );
                return Err(fail(reason).into());
            }
        };

        if kind == OperationType::Read && data.is_some() {
            return Err(fail("a read carries no data".to_string()).into());
        }

        operations.push(Operation { node, kind, address, data });
    }

    Ok(operations)
}

fn parse_address(token: &str) -> Option<Address> {
    let token = token.trim_start_matches('@');
    match token.strip_prefix("0x") {
        Some(hex) => Address::from_str_radix(hex, 16).ok(),
        None => token.parse::<Address>().ok(),
    }
}

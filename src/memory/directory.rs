//! Flat directory bookkeeping, one entry per touched address

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use super::{Address, Word};
use crate::error::CoherenceError;
use crate::topology::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirState {
    Uncached,
    Shared,
    Modified,
}

impl fmt::Display for DirState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DirState::Uncached => "U",
            DirState::Shared => "S",
            DirState::Modified => "M",
        };
        f.write_str(label)
    }
}

/// Directory entry.
///
/// `owner` is set iff `state == Modified`, `sharers` is non-empty
/// only when `state == Shared`, and the owner is never a sharer.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryEntry {
    pub state: DirState,
    pub owner: Option<NodeId>,
    pub sharers: BTreeSet<NodeId>,
    pub data: Word,
}

impl DirectoryEntry {
    /// Entry for an address nobody caches yet
    pub fn uncached(data: Word) -> Self {
        Self {
            state: DirState::Uncached,
            owner: None,
            sharers: BTreeSet::new(),
            data,
        }
    }

    /// Record `node` as a reader
    pub fn add_sharer(&mut self, node: NodeId) {
        self.sharers.insert(node);
        if self.state == DirState::Uncached {
            self.state = DirState::Shared;
        }
    }

    /// Hand exclusive ownership to `node`
    pub fn grant_exclusive(&mut self, node: NodeId) {
        self.state = DirState::Modified;
        self.owner = Some(node);
        self.sharers.clear();
    }

    pub fn verify(&self, address: Address) -> Result<(), CoherenceError> {
        let inconsistent = |reason: &str| {
            CoherenceError::DirectoryInconsistency {
                address,
                reason: reason.to_string(),
            }
        };
        if self.owner.is_some() != (self.state == DirState::Modified) {
            return Err(inconsistent("owner must be set exactly when Modified"));
        }
        if !self.sharers.is_empty() && self.state != DirState::Shared {
            return Err(inconsistent("sharers recorded outside Shared"));
        }
        if let Some(owner) = self.owner {
            if self.sharers.contains(&owner) {
                return Err(inconsistent("owner also recorded as a sharer"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Directory {
    entries: BTreeMap<Address, DirectoryEntry>,
}

impl Directory {
    pub fn make() -> Self {
        Self::default()
    }

    pub fn get(&self, address: Address) -> Option<&DirectoryEntry> {
        self.entries.get(&address)
    }

    pub fn insert(&mut self, address: Address, entry: DirectoryEntry) {
        self.entries.insert(address, entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &DirectoryEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every entry's invariants
    pub fn verify(&self) -> Result<(), CoherenceError> {
        self.entries
            .iter()
            .try_for_each(|(address, entry)| entry.verify(*address))
    }
}

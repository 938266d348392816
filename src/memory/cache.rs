//! Per-node private cache

use std::collections::BTreeMap;
use std::fmt;

use super::{Address, Word};
use crate::topology::NodeId;

/// Coherence state of a cache line, across all protocols.
///
/// MSI uses `{Modified, Shared, Invalid}`, MESI adds `Exclusive`,
/// and the Piranha L1 uses `{ValidDirty, ValidClean, Invalid}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LineState {
    Invalid,
    Shared,
    Exclusive,
    Modified,
    ValidClean,
    ValidDirty,
}

impl LineState {
    /// Whether a line in this state may be the only up-to-date copy
    pub fn is_exclusive_owner(self) -> bool {
        matches!(
            self,
            LineState::Modified | LineState::Exclusive | LineState::ValidDirty
        )
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LineState::Invalid => "I",
            LineState::Shared => "S",
            LineState::Exclusive => "E",
            LineState::Modified => "M",
            LineState::ValidClean => "Valid-Clean",
            LineState::ValidDirty => "Valid-Dirty",
        };
        f.write_str(label)
    }
}

/// One cache line. Only valid lines carry data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheLine {
    #[default]
    Invalid,
    Shared(Word),
    Exclusive(Word),
    Modified(Word),
    ValidClean(Word),
    ValidDirty(Word),
}

impl CacheLine {
    /// Make a line in the given state holding `data`.
    /// `data` is dropped for `LineState::Invalid`.
    pub fn make(state: LineState, data: Word) -> Self {
        match state {
            LineState::Invalid => CacheLine::Invalid,
            LineState::Shared => CacheLine::Shared(data),
            LineState::Exclusive => CacheLine::Exclusive(data),
            LineState::Modified => CacheLine::Modified(data),
            LineState::ValidClean => CacheLine::ValidClean(data),
            LineState::ValidDirty => CacheLine::ValidDirty(data),
        }
    }

    pub fn state(&self) -> LineState {
        match self {
            CacheLine::Invalid => LineState::Invalid,
            CacheLine::Shared(_) => LineState::Shared,
            CacheLine::Exclusive(_) => LineState::Exclusive,
            CacheLine::Modified(_) => LineState::Modified,
            CacheLine::ValidClean(_) => LineState::ValidClean,
            CacheLine::ValidDirty(_) => LineState::ValidDirty,
        }
    }

    pub fn data(&self) -> Option<Word> {
        match *self {
            CacheLine::Invalid => None,
            CacheLine::Shared(data)
            | CacheLine::Exclusive(data)
            | CacheLine::Modified(data)
            | CacheLine::ValidClean(data)
            | CacheLine::ValidDirty(data) => Some(data),
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, CacheLine::Invalid)
    }
}

impl fmt::Display for CacheLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data() {
            Some(data) => write!(f, "{}({})", self.state(), data),
            None => write!(f, "{}", self.state()),
        }
    }
}

/// Address-to-line mapping. Lines are materialized on first touch;
/// a lookup of an untouched address yields a line in the protocol's
/// initial state.
#[derive(Clone, Debug, PartialEq)]
pub struct Cache {
    lines: BTreeMap<Address, CacheLine>,
    untouched: LineState,
}

impl Cache {
    pub fn make(initial: LineState) -> Self {
        Self {
            lines: BTreeMap::new(),
            untouched: initial,
        }
    }

    pub fn line(&self, address: Address) -> CacheLine {
        self.lines
            .get(&address)
            .copied()
            .unwrap_or_else(|| CacheLine::make(self.untouched, 0))
    }

    pub fn state(&self, address: Address) -> LineState {
        self.line(address).state()
    }

    pub fn set(&mut self, address: Address, line: CacheLine) {
        self.lines.insert(address, line);
    }

    /// Whether the address has ever been touched by this cache
    pub fn is_touched(&self, address: Address) -> bool {
        self.lines.contains_key(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &CacheLine)> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// A processing node (or, for Piranha, a core) with its private cache
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub cache: Cache,
}

impl Node {
    pub fn make(id: NodeId, initial: LineState) -> Self {
        Self {
            id,
            cache: Cache::make(initial),
        }
    }
}

//! Chip/core hierarchy used by the two-level directory protocol

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::memory::cache::{LineState, Node};
use crate::memory::directory::{DirState, DirectoryEntry};
use crate::memory::{Address, Word};

/// Global id of a node (bus protocols) or core (Piranha)
pub type NodeId = usize;

pub type ChipId = usize;

/// Shape of the chip hierarchy: `chip_count` chips of `cores_per_chip` cores.
///
/// Global core ids are assigned chip by chip, so core `n` lives on chip
/// `n / cores_per_chip` with local id `n % cores_per_chip`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipLayout {
    pub chip_count: usize,
    pub cores_per_chip: usize,
}

impl ChipLayout {
    pub fn make(chip_count: usize, cores_per_chip: usize) -> Self {
        assert!(chip_count > 0 && cores_per_chip > 0);
        Self { chip_count, cores_per_chip }
    }

    pub fn core_count(&self) -> usize {
        self.chip_count * self.cores_per_chip
    }

    pub fn chip_of(&self, core: NodeId) -> ChipId {
        core / self.cores_per_chip
    }

    pub fn local_id(&self, core: NodeId) -> usize {
        core % self.cores_per_chip
    }

    /// The chip whose directory slice is authoritative for `address`
    pub fn home_chip(&self, address: Address) -> ChipId {
        address as usize % self.chip_count
    }

    /// Cores belonging to `chip`, in global id order
    pub fn cores_of(&self, chip: ChipId) -> std::ops::Range<NodeId> {
        chip * self.cores_per_chip..(chip + 1) * self.cores_per_chip
    }
}

/// One core. Its L1 cache is the cache of the flat node with the same id,
/// so the chip view and the node view can never disagree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Core {
    pub id: NodeId,
    pub chip_id: ChipId,
    pub local_id: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L2State {
    Shared,
    Exclusive,
    Modified,
}

/// Where copies of a line live relative to a chip
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalState {
    /// This chip is home and no other chip holds a copy
    Local,
    /// Another chip is home for the address
    Remote,
    /// This chip is home and other chips hold copies too
    SharedRemote,
}

/// L2 entry acting as the chip-local directory over its cores' L1s
#[derive(Clone, Debug, PartialEq)]
pub struct L2Entry {
    pub state: L2State,
    pub data: Word,
    pub local_sharers: BTreeSet<usize>,
    pub local_owner: Option<usize>,
    pub global_state: GlobalState,
    pub home_chip: ChipId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceState {
    Uncached,
    Shared,
    Exclusive,
}

/// Home-chip directory state, tracked at chip granularity
#[derive(Clone, Debug, PartialEq)]
pub struct DirectorySlice {
    pub state: SliceState,
    pub owner: Option<ChipId>,
    pub sharers: BTreeSet<ChipId>,
    pub data: Word,
}

impl DirectorySlice {
    /// Project a core-granular directory entry onto chips
    pub fn from_entry(entry: &DirectoryEntry, layout: &ChipLayout) -> Self {
        Self {
            state: match entry.state {
                DirState::Uncached => SliceState::Uncached,
                DirState::Shared => SliceState::Shared,
                DirState::Modified => SliceState::Exclusive,
            },
            owner: entry.owner.map(|core| layout.chip_of(core)),
            sharers: entry
                .sharers
                .iter()
                .map(|core| layout.chip_of(*core))
                .collect(),
            data: entry.data,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Chip {
    pub id: ChipId,
    pub cores: Vec<Core>,
    pub l2_cache: BTreeMap<Address, L2Entry>,
    pub l2_directory: BTreeMap<Address, DirectorySlice>,
}

impl Chip {
    pub fn make(id: ChipId, layout: &ChipLayout) -> Self {
        let cores = layout
            .cores_of(id)
            .map(|core| Core {
                id: core,
                chip_id: id,
                local_id: layout.local_id(core),
            })
            .collect();
        Self {
            id,
            cores,
            l2_cache: BTreeMap::new(),
            l2_directory: BTreeMap::new(),
        }
    }
}

/// Build every chip of the layout with empty L2 and directory slices
pub fn build_chips(layout: &ChipLayout) -> Vec<Chip> {
    (0..layout.chip_count).map(|id| Chip::make(id, layout)).collect()
}

/// Recompute the L2 view of `address` on every chip from the cores' L1 lines
pub fn sync_l2(
    chips: &mut [Chip],
    layout: &ChipLayout,
    nodes: &[Node],
    address: Address,
) {
    let holders: Vec<BTreeSet<NodeId>> = chips
        .iter()
        .map(|chip| {
            chip.cores
                .iter()
                .filter(|core| nodes[core.id].cache.line(address).is_valid())
                .map(|core| core.id)
                .collect()
        })
        .collect();

    let home_chip = layout.home_chip(address);
    for chip in chips.iter_mut() {
        let local = &holders[chip.id];
        if local.is_empty() {
            chip.l2_cache.remove(&address);
            continue;
        }

        let remote_copies = holders
            .iter()
            .enumerate()
            .any(|(id, h)| id != chip.id && !h.is_empty());
        let owner = local.iter().copied().find(|core| {
            nodes[*core].cache.state(address) == LineState::ValidDirty
        });
        let data = owner
            .or_else(|| local.first().copied())
            .and_then(|core| nodes[core].cache.line(address).data())
            .unwrap_or(0);

        let state = if owner.is_some() {
            L2State::Modified
        } else if local.len() == 1 && !remote_copies {
            L2State::Exclusive
        } else {
            L2State::Shared
        };
        let global_state = if chip.id != home_chip {
            GlobalState::Remote
        } else if remote_copies {
            GlobalState::SharedRemote
        } else {
            GlobalState::Local
        };

        chip.l2_cache.insert(
            address,
            L2Entry {
                state,
                data,
                local_sharers: local
                    .iter()
                    .map(|core| layout.local_id(*core))
                    .collect(),
                local_owner: owner.map(|core| layout.local_id(core)),
                global_state,
                home_chip,
            },
        );
    }
}

/// Mirror a directory entry into the slice of its home chip
pub fn mirror_directory(
    chips: &mut [Chip],
    layout: &ChipLayout,
    address: Address,
    entry: &DirectoryEntry,
) {
    let home = layout.home_chip(address);
    let slice = DirectorySlice::from_entry(entry, layout);
    chips[home].l2_directory.insert(address, slice);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::cache::CacheLine;

    fn nodes(count: usize) -> Vec<Node> {
        (0..count)
            .map(|id| Node::make(id, LineState::Invalid))
            .collect()
    }

    #[test]
    fn test_core_mapping() {
        let layout = ChipLayout::make(2, 2);
        assert_eq!(layout.core_count(), 4);
        assert_eq!(layout.chip_of(0), 0);
        assert_eq!(layout.chip_of(1), 0);
        assert_eq!(layout.chip_of(2), 1);
        assert_eq!(layout.local_id(3), 1);
        assert_eq!(layout.cores_of(1).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_home_chip_is_modulo() {
        let layout = ChipLayout::make(3, 2);
        for address in 0..32 {
            assert_eq!(layout.home_chip(address), address as usize % 3);
        }
    }

    #[test]
    fn test_build_chips() {
        let layout = ChipLayout::make(2, 3);
        let chips = build_chips(&layout);
        assert_eq!(chips.len(), 2);
        let ids: Vec<_> = chips[1].cores.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(chips[1].cores[2].local_id, 2);
        assert!(chips
            .iter()
            .all(|c| c.l2_cache.is_empty() && c.l2_directory.is_empty()));
    }

    #[test]
    fn test_sync_l2_dirty_owner() {
        let layout = ChipLayout::make(2, 2);
        let mut chips = build_chips(&layout);
        let mut nodes = nodes(4);
        nodes[1].cache.set(0, CacheLine::ValidDirty(10));

        sync_l2(&mut chips, &layout, &nodes, 0);

        let entry = &chips[0].l2_cache[&0];
        assert_eq!(entry.state, L2State::Modified);
        assert_eq!(entry.data, 10);
        assert_eq!(entry.local_owner, Some(1));
        assert_eq!(entry.global_state, GlobalState::Local);
        assert!(chips[1].l2_cache.is_empty());
    }

    #[test]
    fn test_sync_l2_cross_chip_sharing() {
        let layout = ChipLayout::make(2, 2);
        let mut chips = build_chips(&layout);
        let mut nodes = nodes(4);
        nodes[0].cache.set(1, CacheLine::ValidClean(5));
        nodes[2].cache.set(1, CacheLine::ValidClean(5));

        sync_l2(&mut chips, &layout, &nodes, 1);
        assert_eq!(chips[0].l2_cache[&1].global_state, GlobalState::Remote);
        let home = &chips[1].l2_cache[&1];
        assert_eq!(home.global_state, GlobalState::SharedRemote);
        assert_eq!(chips[1].l2_cache[&1].state, L2State::Shared);

        nodes[0].cache.set(1, CacheLine::Invalid);
        sync_l2(&mut chips, &layout, &nodes, 1);
        assert!(!chips[0].l2_cache.contains_key(&1));
        assert_eq!(chips[1].l2_cache[&1].state, L2State::Exclusive);
        assert_eq!(chips[1].l2_cache[&1].global_state, GlobalState::Local);
    }

    #[test]
    fn test_mirror_directory_lands_on_home_slice() {
        let layout = ChipLayout::make(2, 2);
        let mut chips = build_chips(&layout);
        let mut entry = DirectoryEntry::uncached(7);
        entry.add_sharer(0);
        entry.add_sharer(3);

        mirror_directory(&mut chips, &layout, 5, &entry);

        assert!(chips[0].l2_directory.is_empty());
        let slice = &chips[1].l2_directory[&5];
        assert_eq!(slice.state, SliceState::Shared);
        let sharers: Vec<_> = slice.sharers.iter().copied().collect();
        assert_eq!(sharers, vec![0, 1]);
        assert_eq!(slice.data, 7);
    }
}

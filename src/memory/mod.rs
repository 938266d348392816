//! Memory structure: the backing store, per-node caches
//! and the flat directory

pub mod cache;
pub mod directory;

use std::collections::BTreeMap;

/// A cache-line-granular memory location (one line = one word)
pub type Address = u32;

/// Value stored at one address
pub type Word = i64;

/// Flat backing store.
///
/// Words are stored lazily; an address never written reads as zero.
/// Only write-back and flush results ever call [`Memory::write`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Memory {
    size: usize,
    words: BTreeMap<Address, Word>,
}

impl Memory {
    /// Make a zero-valued memory of `size` words
    pub fn make(size: usize) -> Self {
        Self { size, words: BTreeMap::new() }
    }

    /// Number of addressable words
    pub fn size(&self) -> usize {
        self.size
    }

    /// Check if the address lies inside this memory
    pub fn contains(&self, address: Address) -> bool {
        (address as usize) < self.size
    }

    pub fn read(&self, address: Address) -> Word {
        self.words.get(&address).copied().unwrap_or(0)
    }

    pub fn write(&mut self, address: Address, data: Word) {
        self.words.insert(address, data);
    }

    /// Iterate over every address in range with its current value
    pub fn iter(&self) -> impl Iterator<Item = (Address, Word)> + '_ {
        (0..self.size as Address)
            .map(move |address| (address, self.read(address)))
    }

    /// Addresses that have been written at least once
    pub fn written(&self) -> impl Iterator<Item = (&Address, &Word)> {
        self.words.iter()
    }
}

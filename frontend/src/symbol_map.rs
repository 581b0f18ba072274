//! Ordered symbol tables keyed by hierarchical names.
//!
//! Thin wrappers over `im`'s persistent B-trees: cloning a table is O(1) and
//! shares structure, which is what lets every scope keep a save-point of the
//! tables it may have to restore.

use im::{OrdMap, OrdSet};
use kernel::Name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolMap<V: Clone> {
    entries: OrdMap<Name, V>,
}

impl<V: Clone> Default for SymbolMap<V> {
    fn default() -> Self {
        SymbolMap {
            entries: OrdMap::new(),
        }
    }
}

impl<V: Clone> SymbolMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: Name, value: V) -> Option<V> {
        self.entries.insert(name, value)
    }

    pub fn get(&self, name: &Name) -> Option<&V> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &Name) -> Option<V> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }
}

impl<V: Clone> FromIterator<(Name, V)> for SymbolMap<V> {
    fn from_iter<I: IntoIterator<Item = (Name, V)>>(iter: I) -> Self {
        SymbolMap {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolSet {
    names: OrdSet<Name>,
}

impl SymbolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the name was not present before.
    pub fn insert(&mut self, name: Name) -> bool {
        self.names.insert(name).is_none()
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.names.contains(name)
    }

    pub fn remove(&mut self, name: &Name) -> bool {
        self.names.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Name> {
        self.names.iter()
    }
}

impl FromIterator<Name> for SymbolSet {
    fn from_iter<I: IntoIterator<Item = Name>>(iter: I) -> Self {
        SymbolSet {
            names: iter.into_iter().collect(),
        }
    }
}

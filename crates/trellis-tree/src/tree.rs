use crate::path::Path;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// A data tree: sparse mapping from path to an ordered branch of items.
///
/// Each path maps to exactly one branch. Paths need not form a contiguous
/// hierarchy; whatever a component gathered from the canvas is kept as-is.
/// Iteration is always in path order, so downstream output is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree<T>(BTreeMap<Path, Vec<T>>);

impl<T> Tree<T> {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Single-branch tree at `path`.
    pub fn single(path: Path, branch: Vec<T>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(path, branch);
        Self(map)
    }

    pub fn from_branches(branches: impl IntoIterator<Item = (Path, Vec<T>)>) -> Self {
        Self(branches.into_iter().collect())
    }

    /// Insert a branch, replacing any existing branch at `path`.
    pub fn insert(&mut self, path: Path, branch: Vec<T>) -> Option<Vec<T>> {
        self.0.insert(path, branch)
    }

    /// Guarantee `path` exists, inserting an empty branch if missing.
    /// Keeps path topology visible to downstream consumers even when a
    /// branch produced no items.
    pub fn ensure_path(&mut self, path: Path) {
        self.0.entry(path).or_default();
    }

    pub fn branch(&self, path: &Path) -> Option<&[T]> {
        self.0.get(path).map(Vec::as_slice)
    }

    pub fn branch_mut(&mut self, path: &Path) -> Option<&mut Vec<T>> {
        self.0.get_mut(path)
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.0.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.0.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Path, Vec<T>> {
        self.0.iter()
    }

    /// Number of branches (not items).
    pub fn branch_count(&self) -> usize {
        self.0.len()
    }

    pub fn item_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Map every item, preserving paths and branch order.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Tree<U> {
        Tree(
            self.0
                .into_iter()
                .map(|(path, branch)| (path, branch.into_iter().map(&mut f).collect()))
                .collect(),
        )
    }
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for Tree<T> {
    type Item = (Path, Vec<T>);
    type IntoIter = btree_map::IntoIter<Path, Vec<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T> FromIterator<(Path, Vec<T>)> for Tree<T> {
    fn from_iter<I: IntoIterator<Item = (Path, Vec<T>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

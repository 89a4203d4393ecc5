use crate::path::Path;
use crate::topology::ProcessingOptions;
use crate::tree::Tree;
use std::collections::{BTreeMap, BTreeSet};

/// The per-path correspondence across input trees: input name → that tree's
/// branch at the path, after length normalization.
pub type BranchSet<T> = BTreeMap<String, Vec<T>>;

/// One deduplicated dispatch unit: the branch set to process once, and every
/// path that shares it.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchGroup<T> {
    pub paths: Vec<Path>,
    pub branches: BranchSet<T>,
}

/// Candidate path set across all input trees: the union of every tree's
/// paths, or the intersection when `only_matching` is set. A tree missing a
/// path is "no contribution" under union; under intersection the path is
/// skipped entirely.
pub fn resolve_paths<T>(trees: &BTreeMap<String, Tree<T>>, only_matching: bool) -> Vec<Path> {
    if only_matching {
        let mut iter = trees.values();
        let Some(first) = iter.next() else {
            return Vec::new();
        };
        let mut common: BTreeSet<Path> = first.paths().cloned().collect();
        for tree in iter {
            common.retain(|path| tree.contains_path(path));
        }
        common.into_iter().collect()
    } else {
        let mut all: BTreeSet<Path> = BTreeSet::new();
        for tree in trees.values() {
            all.extend(tree.paths().cloned());
        }
        all.into_iter().collect()
    }
}

/// Extend every shorter non-empty branch by repeating its last item until all
/// branches in the set share the maximum length. Empty branches stay empty:
/// there is nothing to repeat, and an absent input must stay visibly absent.
pub fn normalize_lengths<T: Clone>(set: &mut BranchSet<T>) {
    let max_len = set.values().map(Vec::len).max().unwrap_or(0);
    for branch in set.values_mut() {
        if branch.is_empty() {
            continue;
        }
        while branch.len() < max_len {
            let last = branch[branch.len() - 1].clone();
            branch.push(last);
        }
    }
}

/// Resolve paths and build the normalized branch set for each. This is the
/// correspondence a processor call sees for one path.
pub fn branch_sets<T: Clone>(
    trees: &BTreeMap<String, Tree<T>>,
    options: ProcessingOptions,
) -> BTreeMap<Path, BranchSet<T>> {
    let paths = resolve_paths(trees, options.only_matching_paths);
    let mut out = BTreeMap::new();
    for path in paths {
        let mut set: BranchSet<T> = BTreeMap::new();
        for (name, tree) in trees {
            let branch = tree.branch(&path).map(<[T]>::to_vec).unwrap_or_default();
            set.insert(name.clone(), branch);
        }
        normalize_lengths(&mut set);
        out.insert(path, set);
    }
    out
}

/// Collapse paths whose entire normalized branch set is value-identical into
/// one group. Two paths only share a group when the whole call would be
/// identical, so the broadcast result is exact. Group order follows the
/// first member path; members stay path-ordered.
pub fn group_identical<T: PartialEq>(sets: BTreeMap<Path, BranchSet<T>>) -> Vec<BranchGroup<T>> {
    let mut groups: Vec<BranchGroup<T>> = Vec::new();
    for (path, branches) in sets {
        if let Some(group) = groups.iter_mut().find(|g| g.branches == branches) {
            group.paths.push(path);
        } else {
            groups.push(BranchGroup {
                paths: vec![path],
                branches,
            });
        }
    }
    groups
}

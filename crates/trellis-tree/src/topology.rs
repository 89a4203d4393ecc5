use serde::{Deserialize, Serialize};

/// How corresponding branches across input trees map onto processing calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// One call per resolved path; the call sees whole branches.
    #[default]
    BranchMatch,
    /// One call per item; each result lands in its own child path
    /// (`parent + [item index]`), the host-CAD graft convention.
    ItemGraft,
}

/// Declarative correspondence policy for a multi-tree run.
///
/// Immutable value configured per component; governs path resolution,
/// length normalization, and call deduplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessingOptions {
    #[serde(default)]
    pub topology: Topology,
    /// Only process paths present in every input tree. Missing paths are
    /// skipped silently; lossy by policy, not an error.
    #[serde(default)]
    pub only_matching_paths: bool,
    /// Collapse paths whose normalized branch sets are value-identical into
    /// one call, broadcasting the result back to every member path. Avoids
    /// redundant AI calls for repeated prompts.
    #[serde(default)]
    pub group_identical_branches: bool,
}

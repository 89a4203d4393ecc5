pub mod normalize;
pub mod path;
pub mod topology;
pub mod tree;

pub use normalize::{branch_sets, group_identical, resolve_paths, BranchGroup, BranchSet};
pub use path::{Path, PathParseError};
pub use topology::{ProcessingOptions, Topology};
pub use tree::Tree;

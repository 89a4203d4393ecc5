pub mod processor;
pub mod report;

pub use processor::{
    BranchProcessor, FnProcessor, MultiTreeProcessor, NamedBranchProcessor, DEFAULT_MAX_CONCURRENCY,
};
pub use report::{CollectReporter, NullReporter, Report, Reporter, Severity};

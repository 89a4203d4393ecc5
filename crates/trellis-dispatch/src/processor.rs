use crate::report::Reporter;
use anyhow::Result;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use trellis_tree::{
    branch_sets, group_identical, BranchGroup, BranchSet, Path, ProcessingOptions, Topology, Tree,
};

/// Per-path processing function. Implemented by provider adapters (real) and
/// by scripted processors in tests.
///
/// One path's items are never split across calls; under graft topology the
/// processor sees single-item branch sets, one per item index.
#[async_trait::async_trait]
pub trait BranchProcessor<T, R>: Send + Sync {
    async fn process(
        &self,
        path: &Path,
        branches: &BranchSet<T>,
        cancel: CancellationToken,
    ) -> Result<Vec<R>>;
}

/// Per-path processing function with named outputs, for host components that
/// write more than one output tree.
#[async_trait::async_trait]
pub trait NamedBranchProcessor<T, R>: Send + Sync {
    async fn process(
        &self,
        path: &Path,
        branches: &BranchSet<T>,
        cancel: CancellationToken,
    ) -> Result<BTreeMap<String, Vec<R>>>;
}

/// Adapts a plain async closure into a [`BranchProcessor`].
pub struct FnProcessor<F>(F);

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<T, R, F, Fut> BranchProcessor<T, R> for FnProcessor<F>
where
    T: Clone + Send + Sync,
    R: Send,
    F: Fn(Path, BranchSet<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<R>>> + Send,
{
    async fn process(
        &self,
        path: &Path,
        branches: &BranchSet<T>,
        _cancel: CancellationToken,
    ) -> Result<Vec<R>> {
        (self.0)(path.clone(), branches.clone()).await
    }
}

/// Default cap on concurrent branch calls. The fan-out is typically outbound
/// AI requests, so it must not scale with path count.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// One dispatched processing call and the output paths its result lands on.
struct Unit<T> {
    targets: Vec<Path>,
    branches: BranchSet<T>,
}

enum UnitOutcome<R> {
    Done(Vec<R>),
    Failed(String),
    Cancelled,
}

/// Orchestrates multi-tree correspondence: resolves the candidate path set,
/// normalizes branch lengths, optionally deduplicates identical branch sets,
/// dispatches every unit concurrently, and reassembles the output tree keyed
/// by path regardless of completion order.
#[derive(Debug, Clone, Copy)]
pub struct MultiTreeProcessor {
    options: ProcessingOptions,
    max_concurrency: usize,
}

impl MultiTreeProcessor {
    pub fn new(options: ProcessingOptions) -> Self {
        Self {
            options,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, cap: usize) -> Self {
        self.max_concurrency = cap.max(1);
        self
    }

    pub fn options(&self) -> ProcessingOptions {
        self.options
    }

    /// Run the full pipeline over `trees`, producing one output tree.
    ///
    /// Expected per-branch failures never surface as `Err`: a failing or
    /// cancelled path is reported through `reporter` and contributes an
    /// empty branch, preserving tree shape for downstream consumers. `Err`
    /// is reserved for unexpected faults (a panicking processor task).
    pub async fn run<T, R>(
        &self,
        trees: &BTreeMap<String, Tree<T>>,
        processor: Arc<dyn BranchProcessor<T, R>>,
        reporter: &dyn Reporter,
        cancel: CancellationToken,
    ) -> Result<Tree<R>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        R: Clone + Send + 'static,
    {
        let mut output = Tree::new();
        if trees.values().all(Tree::is_empty) {
            return Ok(output);
        }

        let sets = branch_sets(trees, self.options);
        let groups: Vec<BranchGroup<T>> = if self.options.group_identical_branches {
            group_identical(sets)
        } else {
            sets.into_iter()
                .map(|(path, branches)| BranchGroup {
                    paths: vec![path],
                    branches,
                })
                .collect()
        };

        let units = self.expand_units(groups, &mut output);
        debug!(
            units = units.len(),
            cap = self.max_concurrency,
            "dispatching branch units"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();
        for (unit_id, unit) in units.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let processor = Arc::clone(&processor);
            let token = cancel.child_token();
            let path = unit.targets[0].clone();
            let branches = unit.branches.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (unit_id, UnitOutcome::Cancelled);
                };
                if token.is_cancelled() {
                    return (unit_id, UnitOutcome::Cancelled);
                }
                let outcome = tokio::select! {
                    _ = token.cancelled() => UnitOutcome::Cancelled,
                    result = processor.process(&path, &branches, token.clone()) => match result {
                        Ok(items) => UnitOutcome::Done(items),
                        Err(err) => UnitOutcome::Failed(format!("{err:#}")),
                    },
                };
                (unit_id, outcome)
            });
        }

        let mut outcomes: Vec<Option<UnitOutcome<R>>> =
            (0..units.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (unit_id, outcome) = joined?;
            outcomes[unit_id] = Some(outcome);
        }

        // Reassembly is keyed by path, never by completion order.
        for (unit, outcome) in units.into_iter().zip(outcomes) {
            match outcome.unwrap_or(UnitOutcome::Cancelled) {
                UnitOutcome::Done(items) => {
                    for target in unit.targets {
                        output.insert(target, items.clone());
                    }
                }
                UnitOutcome::Failed(message) => {
                    for target in unit.targets {
                        warn!(path = %target, error = %message, "branch processing failed");
                        reporter.error(&target, &message).await;
                        output.ensure_path(target);
                    }
                }
                UnitOutcome::Cancelled => {
                    for target in unit.targets {
                        reporter.warning(&target, "cancelled").await;
                        output.ensure_path(target);
                    }
                }
            }
        }

        Ok(output)
    }

    /// Run with named outputs, the shape host components consume: one output
    /// tree per output parameter name. A path that fails or is cancelled
    /// keeps an empty branch in every output tree.
    pub async fn run_named<T, R>(
        &self,
        trees: &BTreeMap<String, Tree<T>>,
        processor: Arc<dyn NamedBranchProcessor<T, R>>,
        reporter: &dyn Reporter,
        cancel: CancellationToken,
    ) -> Result<BTreeMap<String, Tree<R>>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let adapter: Arc<dyn BranchProcessor<T, BTreeMap<String, Vec<R>>>> =
            Arc::new(NamedAdapter(processor));
        let rows = self.run(trees, adapter, reporter, cancel).await?;

        let all_paths: Vec<Path> = rows.paths().cloned().collect();
        let mut out: BTreeMap<String, Tree<R>> = BTreeMap::new();
        for (path, mut row) in rows {
            if let Some(named) = row.pop() {
                for (name, items) in named {
                    out.entry(name).or_default().insert(path.clone(), items);
                }
            }
        }
        // Empty rows (failed/cancelled paths) still occupy every output tree.
        for tree in out.values_mut() {
            for path in &all_paths {
                tree.ensure_path(path.clone());
            }
        }
        Ok(out)
    }

    /// Expand groups into dispatch units according to topology. Graft turns
    /// every item index into its own unit targeting the child path; parents
    /// with no items are kept as empty branches directly.
    fn expand_units<T: Clone, R>(
        &self,
        groups: Vec<BranchGroup<T>>,
        output: &mut Tree<R>,
    ) -> Vec<Unit<T>> {
        let mut units = Vec::new();
        for group in groups {
            match self.options.topology {
                Topology::BranchMatch => units.push(Unit {
                    targets: group.paths,
                    branches: group.branches,
                }),
                Topology::ItemGraft => {
                    let len = group.branches.values().map(Vec::len).max().unwrap_or(0);
                    if len == 0 {
                        for path in group.paths {
                            output.ensure_path(path);
                        }
                        continue;
                    }
                    for index in 0..len {
                        let slice: BranchSet<T> = group
                            .branches
                            .iter()
                            .map(|(name, branch)| {
                                let item =
                                    branch.get(index).cloned().map(|it| vec![it]).unwrap_or_default();
                                (name.clone(), item)
                            })
                            .collect();
                        let targets = group
                            .paths
                            .iter()
                            .map(|path| path.child(index as u32))
                            .collect();
                        units.push(Unit {
                            targets,
                            branches: slice,
                        });
                    }
                }
            }
        }
        units
    }
}

impl Default for MultiTreeProcessor {
    fn default() -> Self {
        Self::new(ProcessingOptions::default())
    }
}

struct NamedAdapter<T, R>(Arc<dyn NamedBranchProcessor<T, R>>);

#[async_trait::async_trait]
impl<T, R> BranchProcessor<T, BTreeMap<String, Vec<R>>> for NamedAdapter<T, R>
where
    T: Send + Sync,
    R: Send + Sync,
{
    async fn process(
        &self,
        path: &Path,
        branches: &BranchSet<T>,
        cancel: CancellationToken,
    ) -> Result<Vec<BTreeMap<String, Vec<R>>>> {
        let named = self.0.process(path, branches, cancel).await?;
        Ok(vec![named])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{CollectReporter, NullReporter};
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn p(indices: &[u32]) -> Path {
        Path::from(indices)
    }

    fn trees_of(
        entries: &[(&str, &[(&[u32], &[&str])])],
    ) -> BTreeMap<String, Tree<String>> {
        entries
            .iter()
            .map(|(name, branches)| {
                let tree = Tree::from_branches(branches.iter().map(|(path, items)| {
                    (
                        p(path),
                        items.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                    )
                }));
                (name.to_string(), tree)
            })
            .collect()
    }

    /// Joins every branch in the set into one summary item, counting calls.
    struct JoinProcessor {
        calls: AtomicUsize,
    }

    impl JoinProcessor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl BranchProcessor<String, String> for JoinProcessor {
        async fn process(
            &self,
            _path: &Path,
            branches: &BranchSet<String>,
            _cancel: CancellationToken,
        ) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let joined = branches
                .iter()
                .map(|(name, items)| format!("{name}={}", items.join("+")))
                .collect::<Vec<_>>()
                .join("|");
            Ok(vec![joined])
        }
    }

    /// Fails on one specific path, echoes item count everywhere else.
    struct FailAt(Path);

    #[async_trait::async_trait]
    impl BranchProcessor<String, String> for FailAt {
        async fn process(
            &self,
            path: &Path,
            branches: &BranchSet<String>,
            _cancel: CancellationToken,
        ) -> Result<Vec<String>> {
            if *path == self.0 {
                bail!("provider returned 500");
            }
            Ok(vec![format!(
                "{} items",
                branches.values().map(Vec::len).sum::<usize>()
            )])
        }
    }

    #[tokio::test]
    async fn empty_trees_skip_the_processor() {
        let trees = trees_of(&[("a", &[]), ("b", &[])]);
        let processor = Arc::new(JoinProcessor::new());
        let result = MultiTreeProcessor::default()
            .run(
                &trees,
                Arc::clone(&processor) as Arc<dyn BranchProcessor<String, String>>,
                &NullReporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(processor.call_count(), 0);
    }

    #[tokio::test]
    async fn list_and_question_normalize_into_one_call() {
        // {0:["a","b"]} + {0:["q1","q2"]} → one call for {0} with both branches.
        let trees = trees_of(&[
            ("list", &[(&[0], &["a", "b"])]),
            ("question", &[(&[0], &["q1", "q2"])]),
        ]);
        let processor = Arc::new(JoinProcessor::new());
        let result = MultiTreeProcessor::default()
            .run(
                &trees,
                Arc::clone(&processor) as Arc<dyn BranchProcessor<String, String>>,
                &NullReporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(processor.call_count(), 1);
        assert_eq!(
            result.branch(&p(&[0])),
            Some(["list=a+b|question=q1+q2".to_string()].as_slice())
        );
    }

    #[tokio::test]
    async fn shorter_input_broadcasts_before_dispatch() {
        let trees = trees_of(&[
            ("list", &[(&[0], &["a"])]),
            ("question", &[(&[0], &["q1", "q2", "q3"])]),
        ]);
        let processor = Arc::new(JoinProcessor::new());
        let result = MultiTreeProcessor::default()
            .run(
                &trees,
                Arc::clone(&processor) as Arc<dyn BranchProcessor<String, String>>,
                &NullReporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.branch(&p(&[0])),
            Some(["list=a+a+a|question=q1+q2+q3".to_string()].as_slice())
        );
    }

    #[tokio::test]
    async fn only_matching_paths_excludes_unmatched() {
        let trees = trees_of(&[
            ("a", &[(&[0], &["x"]), (&[1], &["y"])]),
            ("b", &[(&[0], &["z"])]),
        ]);
        let options = ProcessingOptions {
            only_matching_paths: true,
            ..Default::default()
        };
        let processor = Arc::new(JoinProcessor::new());
        let result = MultiTreeProcessor::new(options)
            .run(
                &trees,
                Arc::clone(&processor) as Arc<dyn BranchProcessor<String, String>>,
                &NullReporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(processor.call_count(), 1);
        assert!(result.contains_path(&p(&[0])));
        assert!(!result.contains_path(&p(&[1])));
    }

    #[tokio::test]
    async fn identical_branches_dispatch_once_and_broadcast() {
        let trees = trees_of(&[(
            "prompt",
            &[(&[0], &["same"]), (&[1], &["same"]), (&[2], &["diff"])],
        )]);
        let options = ProcessingOptions {
            group_identical_branches: true,
            ..Default::default()
        };
        let processor = Arc::new(JoinProcessor::new());
        let result = MultiTreeProcessor::new(options)
            .run(
                &trees,
                Arc::clone(&processor) as Arc<dyn BranchProcessor<String, String>>,
                &NullReporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(processor.call_count(), 2);
        assert_eq!(result.branch(&p(&[0])), result.branch(&p(&[1])));
        assert_ne!(result.branch(&p(&[0])), result.branch(&p(&[2])));
    }

    #[tokio::test]
    async fn failed_path_reports_and_keeps_siblings() {
        let trees = trees_of(&[("a", &[(&[0], &["x"]), (&[1], &["y"])])]);
        let reporter = CollectReporter::new();
        let result = MultiTreeProcessor::default()
            .run(
                &trees,
                Arc::new(FailAt(p(&[0]))) as Arc<dyn BranchProcessor<String, String>>,
                &reporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        // Failing path keeps an empty branch, sibling is untouched.
        assert_eq!(result.branch(&p(&[0])), Some([].as_slice()));
        assert_eq!(result.branch(&p(&[1])), Some(["1 items".to_string()].as_slice()));
        let errors = reporter.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, p(&[0]));
        assert!(errors[0].message.contains("500"), "got: {}", errors[0].message);
    }

    #[tokio::test]
    async fn cancellation_empties_branches_without_error() {
        let trees = trees_of(&[("a", &[(&[0], &["x"]), (&[1], &["y"])])]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let reporter = CollectReporter::new();
        let result = MultiTreeProcessor::default()
            .run(
                &trees,
                Arc::new(JoinProcessor::new()) as Arc<dyn BranchProcessor<String, String>>,
                &reporter,
                cancel,
            )
            .await
            .unwrap();

        assert_eq!(result.branch_count(), 2);
        assert_eq!(result.item_count(), 0);
        assert!(reporter.errors().is_empty());
        assert_eq!(reporter.reports().len(), 2);
        assert!(reporter.reports().iter().all(|r| r.message == "cancelled"));
    }

    #[tokio::test]
    async fn concurrency_stays_under_the_cap() {
        struct Gauge {
            current: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl BranchProcessor<String, String> for Gauge {
            async fn process(
                &self,
                _path: &Path,
                _branches: &BranchSet<String>,
                _cancel: CancellationToken,
            ) -> Result<Vec<String>> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(vec!["done".into()])
            }
        }

        let branches: Vec<(&[u32], &[&str])> = vec![
            ([0u32].as_slice(), ["x"].as_slice()),
            ([1u32].as_slice(), ["x"].as_slice()),
            ([2u32].as_slice(), ["x"].as_slice()),
            ([3u32].as_slice(), ["x"].as_slice()),
            ([4u32].as_slice(), ["x"].as_slice()),
            ([5u32].as_slice(), ["x"].as_slice()),
        ];
        let trees = trees_of(&[("a", &branches)]);
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let result = MultiTreeProcessor::default()
            .with_max_concurrency(2)
            .run(
                &trees,
                Arc::clone(&gauge) as Arc<dyn BranchProcessor<String, String>>,
                &NullReporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.branch_count(), 6);
        assert!(
            gauge.peak.load(Ordering::SeqCst) <= 2,
            "peak concurrency {} exceeded cap",
            gauge.peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn graft_produces_one_child_branch_per_item() {
        let trees = trees_of(&[("list", &[(&[0], &["a", "b", "c"])])]);
        let options = ProcessingOptions {
            topology: Topology::ItemGraft,
            ..Default::default()
        };
        let processor = Arc::new(JoinProcessor::new());
        let result = MultiTreeProcessor::new(options)
            .run(
                &trees,
                Arc::clone(&processor) as Arc<dyn BranchProcessor<String, String>>,
                &NullReporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(processor.call_count(), 3);
        assert_eq!(
            result.branch(&p(&[0, 1])),
            Some(["list=b".to_string()].as_slice())
        );
        assert_eq!(result.branch_count(), 3);
        assert!(!result.contains_path(&p(&[0])));
    }

    #[tokio::test]
    async fn fn_processor_adapts_closures() {
        let trees = trees_of(&[("a", &[(&[0], &["x", "y"])])]);
        let processor = FnProcessor::new(|_path: Path, branches: BranchSet<String>| async move {
            Ok::<_, anyhow::Error>(vec![branches["a"].len().to_string()])
        });
        let result = MultiTreeProcessor::default()
            .run(
                &trees,
                Arc::new(processor) as Arc<dyn BranchProcessor<String, String>>,
                &NullReporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.branch(&p(&[0])), Some(["2".to_string()].as_slice()));
    }

    #[tokio::test]
    async fn named_outputs_split_into_separate_trees() {
        struct SplitProcessor;

        #[async_trait::async_trait]
        impl NamedBranchProcessor<String, String> for SplitProcessor {
            async fn process(
                &self,
                path: &Path,
                branches: &BranchSet<String>,
                _cancel: CancellationToken,
            ) -> Result<BTreeMap<String, Vec<String>>> {
                if *path == Path::from([1u32].as_slice()) {
                    bail!("boom");
                }
                let mut out = BTreeMap::new();
                out.insert("answer".to_string(), branches["a"].clone());
                out.insert("count".to_string(), vec![branches["a"].len().to_string()]);
                Ok(out)
            }
        }

        let trees = trees_of(&[("a", &[(&[0], &["x", "y"]), (&[1], &["z"])])]);
        let reporter = CollectReporter::new();
        let outputs = MultiTreeProcessor::default()
            .run_named(
                &trees,
                Arc::new(SplitProcessor) as Arc<dyn NamedBranchProcessor<String, String>>,
                &reporter,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(
            outputs["answer"].branch(&p(&[0])),
            Some(["x".to_string(), "y".to_string()].as_slice())
        );
        assert_eq!(
            outputs["count"].branch(&p(&[0])),
            Some(["2".to_string()].as_slice())
        );
        // Failed path keeps empty branches in every output tree.
        assert_eq!(outputs["answer"].branch(&p(&[1])), Some([].as_slice()));
        assert_eq!(outputs["count"].branch(&p(&[1])), Some([].as_slice()));
        assert_eq!(reporter.errors().len(), 1);
    }
}

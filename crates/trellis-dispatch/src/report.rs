use trellis_tree::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One runtime message attributed to a branch path.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub path: Path,
    pub severity: Severity,
    pub message: String,
}

/// Side channel for per-branch processing messages. Failures never abort
/// sibling paths; they surface here instead.
#[async_trait::async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: Report);

    async fn warning(&self, path: &Path, message: &str) {
        self.report(Report {
            path: path.clone(),
            severity: Severity::Warning,
            message: message.to_string(),
        })
        .await;
    }

    async fn error(&self, path: &Path, message: &str) {
        self.report(Report {
            path: path.clone(),
            severity: Severity::Error,
            message: message.to_string(),
        })
        .await;
    }
}

/// Discards everything.
pub struct NullReporter;

#[async_trait::async_trait]
impl Reporter for NullReporter {
    async fn report(&self, _report: Report) {}
}

/// Collects reports in memory (for testing).
pub struct CollectReporter {
    reports: std::sync::Mutex<Vec<Report>>,
}

impl CollectReporter {
    pub fn new() -> Self {
        Self {
            reports: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<Report> {
        self.reports()
            .into_iter()
            .filter(|r| r.severity == Severity::Error)
            .collect()
    }
}

impl Default for CollectReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Reporter for CollectReporter {
    async fn report(&self, report: Report) {
        self.reports.lock().unwrap().push(report);
    }
}

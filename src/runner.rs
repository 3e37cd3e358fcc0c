//! Test-runner adapter: fresh runner per run, files loaded from memory
//!
//! The coordinator builds a runner through a `RunnerFactory` and hands it the
//! `FileLoader` to use. `MemoryLoader` executes each file through the
//! `ModuleExecutor` and emits the suite lifecycle around every load:
//!
//! ```text
//! pre-require -> require(export) -> post-require
//! ```
//!
//! `PyHarnessRunner` is the default runner: it turns required exports into
//! test callables and drives them through the embedded harness.

use crate::config::OutputFormat;
use crate::executor::{ExecutionContext, ModuleExecutor};
use crate::reporter::{reporter_for, Reporter, TestReport, TestStatus};
use async_trait::async_trait;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use serde::Serialize;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Origin tag attached to every lifecycle event of an in-memory load
pub const MEMORY_FS: &str = "memory-fs";

/// Embedded Python harness for test invocation
const HARNESS_PY: &str = include_str!("harness.py");

/// One emitted file, path plus in-memory source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub source: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }
}

// =============================================================================
// Suite lifecycle
// =============================================================================

pub enum SuiteEvent<'a> {
    PreRequire { file: &'a Path },
    Require { file: &'a Path, export: Py<PyAny> },
    PostRequire { file: &'a Path },
}

impl SuiteEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreRequire { .. } => "pre-require",
            Self::Require { .. } => "require",
            Self::PostRequire { .. } => "post-require",
        }
    }
}

/// Receiver of suite lifecycle events
pub trait Suite {
    fn emit(&mut self, py: Python<'_>, event: SuiteEvent<'_>, origin: &str);
}

/// Strategy a runner uses to turn its files into loaded modules
pub trait FileLoader: Send + Sync {
    /// # Errors
    /// The first exception raised while executing a file; later files are
    /// not loaded.
    fn load_files(
        &self,
        py: Python<'_>,
        files: &[SourceFile],
        globals: &[String],
        suite: &mut dyn Suite,
    ) -> PyResult<()>;
}

/// Loads wrapped source through the `ModuleExecutor`, no disk access
#[derive(Clone)]
pub struct MemoryLoader {
    executor: ModuleExecutor,
}

impl MemoryLoader {
    pub fn new(executor: ModuleExecutor) -> Self {
        Self { executor }
    }
}

impl FileLoader for MemoryLoader {
    fn load_files(
        &self,
        py: Python<'_>,
        files: &[SourceFile],
        globals: &[String],
        suite: &mut dyn Suite,
    ) -> PyResult<()> {
        for file in files {
            let ctx = ExecutionContext::new(&file.path).with_globals(globals);

            suite.emit(py, SuiteEvent::PreRequire { file: &file.path }, MEMORY_FS);
            let export = self.executor.execute(py, &file.source, &ctx)?;
            suite.emit(
                py,
                SuiteEvent::Require {
                    file: &file.path,
                    export: export.unbind(),
                },
                MEMORY_FS,
            );
            suite.emit(py, SuiteEvent::PostRequire { file: &file.path }, MEMORY_FS);
        }
        Ok(())
    }
}

// =============================================================================
// Runner contracts
// =============================================================================

/// Counts of one finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errors
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Skip => self.skipped += 1,
            TestStatus::Error => self.errors += 1,
        }
    }
}

#[async_trait]
pub trait TestRunner: Send {
    /// Declare a global name the loaded files may reference
    fn add_global(&mut self, name: &str);

    fn add_file(&mut self, file: SourceFile);

    /// Load every file and run the collected tests
    async fn run(self: Box<Self>) -> RunSummary;
}

pub trait RunnerFactory: Send + Sync {
    fn create(&self, loader: Arc<dyn FileLoader>) -> Box<dyn TestRunner>;
}

// =============================================================================
// PyHarnessRunner
// =============================================================================

/// Import the harness once per interpreter, then reuse it from `sys.modules`
fn harness(py: Python<'_>) -> PyResult<Bound<'_, PyModule>> {
    let modules = py.import("sys")?.getattr("modules")?;
    if let Ok(existing) = modules.get_item("retest_harness") {
        return Ok(existing.downcast_into::<PyModule>()?);
    }

    let code = CString::new(HARNESS_PY)
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?;
    let module = PyModule::from_code(py, &code, c"retest_harness.py", c"retest_harness")?;
    modules.set_item("retest_harness", &module)?;
    Ok(module)
}

struct CollectedTest {
    id: String,
    file: String,
    callable: Py<PyAny>,
}

/// Suite sink that turns each required export into test callables
struct CollectingSuite<'py> {
    harness: Bound<'py, PyModule>,
    tests: Vec<CollectedTest>,
    errors: Vec<String>,
}

impl Suite for CollectingSuite<'_> {
    fn emit(&mut self, _py: Python<'_>, event: SuiteEvent<'_>, _origin: &str) {
        let SuiteEvent::Require { file, export } = event else {
            return;
        };
        let py = self.harness.py();

        let label = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let collected = self
            .harness
            .getattr("collect")
            .and_then(|collect| collect.call1((export.bind(py), &label)))
            .and_then(|found| found.extract::<Vec<(String, Py<PyAny>)>>());

        match collected {
            Ok(found) => {
                for (id, callable) in found {
                    self.tests.push(CollectedTest {
                        id,
                        file: file.to_string_lossy().to_string(),
                        callable,
                    });
                }
            }
            Err(e) => self
                .errors
                .push(format!("{}: cannot collect tests: {}", file.display(), e)),
        }
    }
}

/// Default runner backed by the embedded Python harness
pub struct PyHarnessRunner {
    loader: Arc<dyn FileLoader>,
    files: Vec<SourceFile>,
    globals: Vec<String>,
    reporter: Box<dyn Reporter>,
}

impl PyHarnessRunner {
    pub fn new(loader: Arc<dyn FileLoader>, reporter: Box<dyn Reporter>) -> Self {
        Self {
            loader,
            files: Vec::new(),
            globals: Vec::new(),
            reporter,
        }
    }

    fn run_blocking(mut self) -> RunSummary {
        let start = Instant::now();

        let mut summary = Python::with_gil(|py| self.execute(py)).unwrap_or_else(|e| {
            self.reporter.on_load_error(&format!("harness unavailable: {}", e));
            RunSummary {
                errors: 1,
                ..RunSummary::default()
            }
        });

        summary.duration_ms = start.elapsed().as_millis() as u64;
        self.reporter.on_run_end(&summary);
        summary
    }

    fn execute(&mut self, py: Python<'_>) -> PyResult<RunSummary> {
        let harness = harness(py)?;
        let mut summary = RunSummary::default();
        let mut suite = CollectingSuite {
            harness: harness.clone(),
            tests: Vec::new(),
            errors: Vec::new(),
        };

        if let Err(e) = self
            .loader
            .load_files(py, &self.files, &self.globals, &mut suite)
        {
            suite.errors.push(format!("load failed: {}", e));
        }
        for message in &suite.errors {
            self.reporter.on_load_error(message);
            summary.errors += 1;
        }

        self.reporter.on_run_start(suite.tests.len());
        let run_test = harness.getattr("run_test")?;

        for test in &suite.tests {
            let (status, duration_ms, message) = run_test
                .call1((test.callable.bind(py),))
                .and_then(|r| r.extract::<(u8, f64, String)>())
                .map(|(code, ms, msg)| (TestStatus::from_code(code), ms, msg))
                .unwrap_or_else(|e| (TestStatus::Error, 0.0, e.to_string()));

            summary.record(status);
            self.reporter.on_test(&TestReport {
                id: &test.id,
                file: &test.file,
                status,
                duration_ms: duration_ms as u64,
                message: (!message.is_empty()).then_some(message.as_str()),
            });
        }

        Ok(summary)
    }
}

#[async_trait]
impl TestRunner for PyHarnessRunner {
    fn add_global(&mut self, name: &str) {
        if !self.globals.iter().any(|g| g == name) {
            self.globals.push(name.to_string());
        }
    }

    fn add_file(&mut self, file: SourceFile) {
        self.files.push(file);
    }

    async fn run(self: Box<Self>) -> RunSummary {
        let runner = *self;
        let files = runner.files.len();
        info!(files, "running tests");

        match tokio::task::spawn_blocking(move || runner.run_blocking()).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "test run aborted");
                RunSummary {
                    errors: 1,
                    ..RunSummary::default()
                }
            }
        }
    }
}

/// Builds a `PyHarnessRunner` reporting in the configured format
pub struct HarnessFactory {
    format: OutputFormat,
}

impl HarnessFactory {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl RunnerFactory for HarnessFactory {
    fn create(&self, loader: Arc<dyn FileLoader>) -> Box<dyn TestRunner> {
        Box::new(PyHarnessRunner::new(loader, reporter_for(&self.format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let file = Path::new("dist/a.test.py");
        assert_eq!(SuiteEvent::PreRequire { file }.name(), "pre-require");
        assert_eq!(SuiteEvent::PostRequire { file }.name(), "post-require");
    }

    #[test]
    fn test_summary_record() {
        let mut summary = RunSummary::default();
        for code in [0, 0, 1, 2, 4] {
            let status = TestStatus::from_code(code);
            summary.record(status);
        }
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.total(), 5);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_empty_summary_is_success() {
        assert!(RunSummary::default().is_success());
    }
}

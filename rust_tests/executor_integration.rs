//! Executor Integration Tests: in-memory evaluation through the embedded interpreter
//!
//! These tests verify that wrapped sources:
//! 1. Return the value of their expression
//! 2. See the injected parameters and nothing from the host's `__main__`
//! 3. See `GlobalTable` entries only when asked for
//! 4. Load through `MemoryLoader` with the pre-require/require/post-require lifecycle
//! 5. Run through `PyHarnessRunner` with pass/fail/skip/error classification

use pyo3::prelude::*;
use retest_core::executor::{ExecutionContext, GlobalTable, ModuleExecutor};
use retest_core::reporter::{Reporter, TestReport};
use retest_core::runner::{
    FileLoader, MemoryLoader, PyHarnessRunner, RunSummary, SourceFile, Suite, SuiteEvent,
    TestRunner, MEMORY_FS,
};
use std::sync::{Arc, Mutex};

fn eval_i64(source: &str) -> PyResult<i64> {
    let executor = ModuleExecutor::default();
    Python::with_gil(|py| {
        executor
            .execute(py, source, &ExecutionContext::new("dist/unit.py"))?
            .extract()
    })
}

#[test]
fn test_expression_value_is_returned() {
    assert_eq!(eval_i64("1").unwrap(), 1);
    assert_eq!(eval_i64("20 + 22").unwrap(), 42);
}

#[test]
fn test_function_literal_is_returned_callable() {
    let executor = ModuleExecutor::default();
    let value: i64 = Python::with_gil(|py| {
        executor
            .execute(py, "lambda: 2", &ExecutionContext::new("f.py"))?
            .call0()?
            .extract()
    })
    .unwrap();
    assert_eq!(value, 2);
}

#[test]
fn test_injected_parameters() {
    let executor = ModuleExecutor::default();
    Python::with_gil(|py| {
        let ctx = ExecutionContext::new("dist/pkg/unit.py");

        let filename: String = executor.execute(py, "__filename", &ctx)?.extract()?;
        assert_eq!(filename, "dist/pkg/unit.py");

        let dirname: String = executor.execute(py, "__dirname", &ctx)?.extract()?;
        assert_eq!(dirname, "dist/pkg");

        let same: bool = executor
            .execute(py, "module.exports is exports", &ctx)?
            .extract()?;
        assert!(same);

        let dumped: String = executor
            .execute(py, "require('json').dumps([1, 2])", &ctx)?
            .extract()?;
        assert_eq!(dumped, "[1, 2]");
        Ok::<(), PyErr>(())
    })
    .unwrap();
}

#[test]
fn test_host_main_scope_is_not_visible() {
    let executor = ModuleExecutor::default();
    Python::with_gil(|py| {
        py.run(c"retest_host_marker = 1", None, None)?;
        let visible: bool = executor
            .execute(py, "'retest_host_marker' in globals()", &ExecutionContext::new("x.py"))?
            .extract()?;
        assert!(!visible);
        Ok::<(), PyErr>(())
    })
    .unwrap();
}

#[test]
fn test_globals_are_injected_only_on_request() {
    let table = GlobalTable::new();
    let executor = ModuleExecutor::new(table.clone());
    Python::with_gil(|py| {
        table.publish("boot", 7i64.into_pyobject(py).unwrap().into_any().unbind());

        let hidden: bool = executor
            .execute(py, "'boot' in globals()", &ExecutionContext::new("x.py"))?
            .extract()?;
        assert!(!hidden);

        let ctx = ExecutionContext::new("x.py").with_globals(&["boot".to_string()]);
        let value: i64 = executor.execute(py, "boot * 6", &ctx)?.extract()?;
        assert_eq!(value, 42);
        Ok::<(), PyErr>(())
    })
    .unwrap();
}

#[test]
fn test_errors_propagate_to_caller() {
    let err = eval_i64("1 / 0").unwrap_err();
    Python::with_gil(|py| {
        assert!(err.is_instance_of::<pyo3::exceptions::PyZeroDivisionError>(py));
    });

    let err = eval_i64("def nope(): pass").unwrap_err();
    Python::with_gil(|py| {
        assert!(err.is_instance_of::<pyo3::exceptions::PySyntaxError>(py));
    });
}

// =============================================================================
// MemoryLoader
// =============================================================================

#[derive(Default)]
struct RecordingSuite {
    events: Vec<(String, String, String)>,
}

impl Suite for RecordingSuite {
    fn emit(&mut self, _py: Python<'_>, event: SuiteEvent<'_>, origin: &str) {
        let file = match &event {
            SuiteEvent::PreRequire { file }
            | SuiteEvent::Require { file, .. }
            | SuiteEvent::PostRequire { file } => file.display().to_string(),
        };
        self.events
            .push((event.name().to_string(), file, origin.to_string()));
    }
}

#[test]
fn test_loader_emits_lifecycle_per_file() {
    let loader = MemoryLoader::new(ModuleExecutor::default());
    let files = vec![
        SourceFile::new("dist/1.py", "1"),
        SourceFile::new("dist/2.py", "2"),
        SourceFile::new("dist/3.py", "3"),
    ];
    let mut suite = RecordingSuite::default();

    Python::with_gil(|py| loader.load_files(py, &files, &[], &mut suite)).unwrap();

    assert_eq!(suite.events.len(), 9);
    let names: Vec<&str> = suite.events[..3].iter().map(|e| e.0.as_str()).collect();
    assert_eq!(names, vec!["pre-require", "require", "post-require"]);
    assert_eq!(suite.events[3].1, "dist/2.py");
    assert!(suite.events.iter().all(|e| e.2 == MEMORY_FS));
}

#[test]
fn test_loader_empty_list() {
    let loader = MemoryLoader::new(ModuleExecutor::default());
    let mut suite = RecordingSuite::default();

    Python::with_gil(|py| loader.load_files(py, &[], &[], &mut suite)).unwrap();
    assert!(suite.events.is_empty());
}

#[test]
fn test_loader_stops_at_failing_file() {
    let loader = MemoryLoader::new(ModuleExecutor::default());
    let files = vec![
        SourceFile::new("dist/bad.py", "undefined_name"),
        SourceFile::new("dist/good.py", "1"),
    ];
    let mut suite = RecordingSuite::default();

    let result = Python::with_gil(|py| loader.load_files(py, &files, &[], &mut suite));
    assert!(result.is_err());
    assert_eq!(suite.events.len(), 1);
    assert_eq!(suite.events[0].0, "pre-require");
}

// =============================================================================
// PyHarnessRunner
// =============================================================================

#[derive(Clone, Default)]
struct RecordingReporter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn on_run_start(&mut self, tests: usize) {
        self.lines.lock().unwrap().push(format!("start {}", tests));
    }

    fn on_test(&mut self, report: &TestReport<'_>) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{} {}", report.status.as_str(), report.id));
    }

    fn on_load_error(&mut self, message: &str) {
        self.lines.lock().unwrap().push(format!("error {}", message));
    }

    fn on_run_end(&mut self, summary: &RunSummary) {
        self.lines.lock().unwrap().push(format!(
            "finished {} {} {}",
            summary.passed, summary.failed, summary.skipped
        ));
    }
}

fn harness_runner(table: &GlobalTable, reporter: &RecordingReporter) -> Box<PyHarnessRunner> {
    let loader: Arc<dyn FileLoader> = Arc::new(MemoryLoader::new(ModuleExecutor::new(table.clone())));
    Box::new(PyHarnessRunner::new(loader, Box::new(reporter.clone())))
}

#[tokio::test]
async fn test_harness_classifies_results() {
    let reporter = RecordingReporter::default();
    let mut runner = harness_runner(&GlobalTable::new(), &reporter);
    runner.add_file(SourceFile::new(
        "dist/math.test.py",
        r#"{
    "test_passes": lambda: None,
    "test_fails": lambda: exec("assert 1 == 2, 'nope'"),
    "test_skips": lambda: exec("import unittest; raise unittest.SkipTest('later')"),
    "test_errors": lambda: [][0],
    "helper": lambda: None,
}"#,
    ));

    let summary = runner.run().await;

    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.errors, 1);
    let lines = reporter.lines();
    assert_eq!(lines[0], "start 4");
    assert!(lines.contains(&"fail math.test::test_fails".to_string()));
}

#[tokio::test]
async fn test_harness_callable_export_and_async_test() {
    let reporter = RecordingReporter::default();
    let mut runner = harness_runner(&GlobalTable::new(), &reporter);
    runner.add_file(SourceFile::new("dist/one.test.py", "lambda: None"));
    runner.add_file(SourceFile::new(
        "dist/two.test.py",
        "{'test_async': lambda: __import__('asyncio').sleep(0)}",
    ));

    let summary = runner.run().await;
    assert_eq!(summary.passed, 2);
    assert!(summary.is_success());
}

#[tokio::test]
async fn test_harness_sees_registered_global() {
    let table = GlobalTable::new();
    Python::with_gil(|py| {
        table.publish("boot", "ready".into_pyobject(py).unwrap().into_any().unbind());
    });
    let reporter = RecordingReporter::default();
    let mut runner = harness_runner(&table, &reporter);
    runner.add_global("boot");
    runner.add_file(SourceFile::new(
        "dist/seeded.test.py",
        "lambda: exec('assert boot == \"ready\"', {'boot': boot})",
    ));

    let summary = runner.run().await;
    assert_eq!(summary.passed, 1);
}

#[tokio::test]
async fn test_harness_load_error_still_finishes() {
    let reporter = RecordingReporter::default();
    let mut runner = harness_runner(&GlobalTable::new(), &reporter);
    runner.add_file(SourceFile::new("dist/broken.test.py", "(("));

    let summary = runner.run().await;
    assert_eq!(summary.errors, 1);
    let lines = reporter.lines();
    assert!(lines.iter().any(|l| l.starts_with("error ")));
    assert!(lines.last().unwrap().starts_with("finished"));
}

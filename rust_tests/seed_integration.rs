//! Seed Integration Tests
//!
//! Verify that the seed unit is evaluated, its call result awaited when it is
//! awaitable, published under the seed name, and never evaluated twice.

use async_trait::async_trait;
use pyo3::prelude::*;
use retest_core::config::Settings;
use retest_core::coordinator::RunCoordinator;
use retest_core::debounce::EmitDone;
use retest_core::error::SeedError;
use retest_core::executor::ModuleExecutor;
use retest_core::pipeline::{BuildUnit, Fingerprint, MemoryCompilation};
use retest_core::runner::{FileLoader, RunSummary, RunnerFactory, SourceFile, TestRunner};
use retest_core::seed::get_seed;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn with_seed(source: &str) -> MemoryCompilation {
    MemoryCompilation::new("dist")
        .with_unit(BuildUnit::new("boot", "1", &["boot.py"]))
        .with_unit(BuildUnit::new("a.test", "1", &["a.test.py"]))
        .with_asset("boot.py", source)
        .with_asset("a.test.py", "lambda: None")
}

fn extract_i64(value: &Py<PyAny>) -> i64 {
    Python::with_gil(|py| value.bind(py).extract().unwrap())
}

#[tokio::test]
async fn test_async_seed_is_awaited() {
    let executor = ModuleExecutor::default();
    let compilation = with_seed("lambda: __import__('asyncio').sleep(0, result=5)");

    let value = get_seed(&compilation, "boot", &executor).await.unwrap();
    assert_eq!(extract_i64(&value), 5);
}

#[tokio::test]
async fn test_plain_seed_result_is_wrapped() {
    let executor = ModuleExecutor::default();
    let compilation = with_seed("lambda: 41 + 1");

    let value = get_seed(&compilation, "boot", &executor).await.unwrap();
    assert_eq!(extract_i64(&value), 42);
}

#[tokio::test]
async fn test_non_callable_seed_fails() {
    let executor = ModuleExecutor::default();
    let compilation = with_seed("False");

    let err = get_seed(&compilation, "boot", &executor).await.unwrap_err();
    assert!(matches!(err, SeedError::Evaluation { ref seed, .. } if seed == "boot"));
}

#[tokio::test]
async fn test_raising_seed_fails() {
    let executor = ModuleExecutor::default();
    let compilation = with_seed("lambda: 1 / 0");

    let err = get_seed(&compilation, "boot", &executor).await.unwrap_err();
    assert!(err.to_string().contains("ZeroDivisionError"));
}

#[tokio::test]
async fn test_awaitable_that_raises_fails() {
    let executor = ModuleExecutor::default();
    let compilation = with_seed(
        "lambda: (lambda ns: (exec('async def boot():\\n    raise ValueError(\"late\")', ns), ns['boot']())[1])({})",
    );

    let err = get_seed(&compilation, "boot", &executor).await.unwrap_err();
    assert!(matches!(err, SeedError::Evaluation { ref seed, .. } if seed == "boot"));
    assert!(err.to_string().contains("late"));
}

#[tokio::test]
async fn test_missing_seed_lists_available_units() {
    let executor = ModuleExecutor::default();
    let compilation = with_seed("lambda: 1");

    let err = get_seed(&compilation, "missing", &executor).await.unwrap_err();
    assert_eq!(
        err,
        SeedError::NotFound {
            seed: "missing".to_string(),
            available: vec!["boot".to_string(), "a.test".to_string()],
        }
    );
}

// =============================================================================
// Through the coordinator
// =============================================================================

#[derive(Clone, Default)]
struct CountingFactory {
    runs: Arc<AtomicUsize>,
}

struct CountingRunner {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl TestRunner for CountingRunner {
    fn add_global(&mut self, _name: &str) {}

    fn add_file(&mut self, _file: SourceFile) {}

    async fn run(self: Box<Self>) -> RunSummary {
        self.runs.fetch_add(1, Ordering::SeqCst);
        RunSummary::default()
    }
}

impl RunnerFactory for CountingFactory {
    fn create(&self, _loader: Arc<dyn FileLoader>) -> Box<dyn TestRunner> {
        Box::new(CountingRunner {
            runs: Arc::clone(&self.runs),
        })
    }
}

async fn emit(coordinator: &mut RunCoordinator, compilation: &MemoryCompilation) {
    let (done, settled) = EmitDone::channel();
    coordinator.on_emit(compilation, done).await;
    settled.await.unwrap();
}

#[tokio::test]
async fn test_seed_resolves_once_and_is_published() {
    let factory = CountingFactory::default();
    let settings = Settings::default()
        .with_wait(Duration::ZERO)
        .with_seed("boot");
    let mut coordinator = RunCoordinator::new(settings, Arc::new(factory.clone()));

    emit(&mut coordinator, &with_seed("lambda: 1")).await;
    let published = Python::with_gil(|py| {
        coordinator
            .globals()
            .get(py, "boot")
            .map(|v| v.extract::<i64>().unwrap())
    });
    assert_eq!(published, Some(1));

    // A changed seed source must not be evaluated again
    let mut next = with_seed("lambda: 2");
    next.unit_mut("a.test").unwrap().fingerprint = Fingerprint::new("2");
    emit(&mut coordinator, &next).await;

    let published = Python::with_gil(|py| {
        coordinator
            .globals()
            .get(py, "boot")
            .map(|v| v.extract::<i64>().unwrap())
    });
    assert_eq!(published, Some(1));
    assert_eq!(factory.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_seed_is_not_retried() {
    let factory = CountingFactory::default();
    let settings = Settings::default()
        .with_wait(Duration::ZERO)
        .with_seed("boot");
    let mut coordinator = RunCoordinator::new(settings, Arc::new(factory.clone()));

    emit(&mut coordinator, &with_seed("lambda: 1 / 0")).await;

    let mut next = with_seed("lambda: 3");
    next.unit_mut("a.test").unwrap().fingerprint = Fingerprint::new("2");
    emit(&mut coordinator, &next).await;

    assert!(!coordinator.globals().contains("boot"));
    assert_eq!(factory.runs.load(Ordering::SeqCst), 2);
}

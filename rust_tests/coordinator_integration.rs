//! Coordinator Integration Tests
//!
//! Drive `RunCoordinator::on_emit` with in-memory compilations and a counting
//! runner, checking how many runs happen, on which files, and when each
//! emission's completion callback fires.

use async_trait::async_trait;
use retest_core::config::Settings;
use retest_core::coordinator::{EmitOutcome, RunCoordinator};
use retest_core::debounce::EmitDone;
use retest_core::pipeline::{BuildUnit, Fingerprint, MemoryCompilation};
use retest_core::runner::{FileLoader, RunSummary, RunnerFactory, SourceFile, TestRunner};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct RecordedRun {
    files: Vec<PathBuf>,
    globals: Vec<String>,
}

#[derive(Clone, Default)]
struct CountingFactory {
    runs: Arc<Mutex<Vec<RecordedRun>>>,
}

impl CountingFactory {
    fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap().clone()
    }
}

struct CountingRunner {
    record: RecordedRun,
    runs: Arc<Mutex<Vec<RecordedRun>>>,
}

#[async_trait]
impl TestRunner for CountingRunner {
    fn add_global(&mut self, name: &str) {
        self.record.globals.push(name.to_string());
    }

    fn add_file(&mut self, file: SourceFile) {
        self.record.files.push(file.path);
    }

    async fn run(self: Box<Self>) -> RunSummary {
        self.runs.lock().unwrap().push(self.record.clone());
        RunSummary::default()
    }
}

impl RunnerFactory for CountingFactory {
    fn create(&self, _loader: Arc<dyn FileLoader>) -> Box<dyn TestRunner> {
        Box::new(CountingRunner {
            record: RecordedRun::default(),
            runs: Arc::clone(&self.runs),
        })
    }
}

fn compilation() -> MemoryCompilation {
    MemoryCompilation::new("dist")
        .with_unit(BuildUnit::new("a.test", "1", &["a"]))
        .with_unit(BuildUnit::new("b.test", "1", &["b"]))
        .with_asset("a", "1")
        .with_asset("b", "2")
}

fn single_unit(hash: &str) -> MemoryCompilation {
    MemoryCompilation::new("dist")
        .with_unit(BuildUnit::new("a.test", hash, &["a"]))
        .with_asset("a", "1")
}

fn coordinator(settings: Settings) -> (RunCoordinator, CountingFactory) {
    let factory = CountingFactory::default();
    let coordinator = RunCoordinator::new(settings, Arc::new(factory.clone()));
    (coordinator, factory)
}

fn zero_wait() -> Settings {
    Settings::default().with_wait(Duration::ZERO)
}

async fn emit(coordinator: &mut RunCoordinator, compilation: &MemoryCompilation) -> EmitOutcome {
    let (done, settled) = EmitDone::channel();
    let outcome = coordinator.on_emit(compilation, done).await;
    settled.await.unwrap();
    outcome
}

#[tokio::test]
async fn test_runs_when_compiled_for_the_first_time() {
    let (mut coordinator, factory) = coordinator(zero_wait());

    let outcome = emit(&mut coordinator, &compilation()).await;

    assert_eq!(
        outcome,
        EmitOutcome::Scheduled(vec!["a.test".to_string(), "b.test".to_string()])
    );
    let runs = factory.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(
        runs[0].files,
        vec![Path::new("dist").join("a"), Path::new("dist").join("b")]
    );
}

#[tokio::test]
async fn test_does_not_run_when_units_unchanged() {
    let (mut coordinator, factory) = coordinator(zero_wait());

    emit(&mut coordinator, &single_unit("1")).await;
    let outcome = emit(&mut coordinator, &single_unit("1")).await;

    assert_eq!(outcome, EmitOutcome::NoChanges);
    assert_eq!(factory.runs().len(), 1);
}

#[tokio::test]
async fn test_runs_again_when_unit_changes() {
    let (mut coordinator, factory) = coordinator(zero_wait());

    emit(&mut coordinator, &single_unit("1")).await;
    emit(&mut coordinator, &single_unit("2")).await;

    let runs = factory.runs();
    assert_eq!(runs.len(), 2);
    for run in runs {
        assert_eq!(run.files, vec![Path::new("dist").join("a")]);
    }
}

#[tokio::test]
async fn test_second_run_only_covers_changed_units() {
    let (mut coordinator, factory) = coordinator(zero_wait());

    emit(&mut coordinator, &compilation()).await;
    let mut next = compilation();
    next.unit_mut("b.test").unwrap().fingerprint = Fingerprint::new("2");
    let outcome = emit(&mut coordinator, &next).await;

    assert_eq!(outcome, EmitOutcome::Scheduled(vec!["b.test".to_string()]));
    assert_eq!(factory.runs()[1].files, vec![Path::new("dist").join("b")]);
}

#[tokio::test(start_paused = true)]
async fn test_waits_and_does_not_run_twice() {
    let (mut coordinator, factory) =
        coordinator(Settings::default().with_wait(Duration::from_millis(100)));

    let (first, mut first_settled) = EmitDone::channel();
    coordinator.on_emit(&compilation(), first).await;
    assert!(first_settled.try_recv().is_err());

    let mut next = compilation();
    next.unit_mut("a.test").unwrap().fingerprint = Fingerprint::new("2");
    let (second, second_settled) = EmitDone::channel();
    coordinator.on_emit(&next, second).await;

    // Superseded emission is released without waiting for the window
    assert!(first_settled.try_recv().is_ok());
    assert!(factory.runs().is_empty());

    second_settled.await.unwrap();
    let runs = factory.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].files, vec![Path::new("dist").join("a")]);
}

#[tokio::test]
async fn test_zero_wait_back_to_back_runs_once() {
    let (mut coordinator, factory) = coordinator(zero_wait());

    let (first, first_settled) = EmitDone::channel();
    coordinator.on_emit(&single_unit("1"), first).await;
    let (second, second_settled) = EmitDone::channel();
    coordinator.on_emit(&single_unit("2"), second).await;

    first_settled.await.unwrap();
    second_settled.await.unwrap();
    assert_eq!(factory.runs().len(), 1);
}

#[tokio::test]
async fn test_non_test_units_never_run() {
    let (mut coordinator, factory) = coordinator(zero_wait());
    let vendor = MemoryCompilation::new("dist")
        .with_unit(BuildUnit::new("vendor", "1", &["v"]))
        .with_asset("v", "0");

    assert_eq!(emit(&mut coordinator, &vendor).await, EmitOutcome::NoChanges);
    assert!(factory.runs().is_empty());
}

#[tokio::test]
async fn test_missing_asset_completes_without_run() {
    let (mut coordinator, factory) = coordinator(zero_wait());
    let broken = MemoryCompilation::new("dist").with_unit(BuildUnit::new("a.test", "1", &["a"]));

    assert_eq!(emit(&mut coordinator, &broken).await, EmitOutcome::NoChanges);
    assert!(factory.runs().is_empty());
}

#[tokio::test]
async fn test_unit_without_files_completes_without_run() {
    let (mut coordinator, factory) = coordinator(zero_wait());
    let empty = MemoryCompilation::new("dist").with_unit(BuildUnit::new("a.test", "1", &[]));

    assert_eq!(emit(&mut coordinator, &empty).await, EmitOutcome::NoChanges);
    assert!(factory.runs().is_empty());
}

#[tokio::test]
async fn test_missing_seed_is_logged_and_runs_continue() {
    let (mut coordinator, factory) = coordinator(zero_wait().with_seed("boot"));

    emit(&mut coordinator, &compilation()).await;
    let mut next = compilation();
    next.unit_mut("a.test").unwrap().fingerprint = Fingerprint::new("2");
    emit(&mut coordinator, &next).await;

    let runs = factory.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].globals, vec!["boot".to_string()]);
    assert!(!coordinator.globals().contains("boot"));
}

#[tokio::test]
async fn test_no_seed_registers_no_globals() {
    let (mut coordinator, factory) = coordinator(zero_wait());

    emit(&mut coordinator, &compilation()).await;
    assert!(factory.runs()[0].globals.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_every_emission_settles_exactly_once() {
    let (mut coordinator, factory) =
        coordinator(Settings::default().with_wait(Duration::from_millis(50)));
    let settled = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        let log = Arc::clone(&settled);
        let done = EmitDone::new(move || log.lock().unwrap().push(i));
        coordinator.on_emit(&single_unit(&i.to_string()), done).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut fired = settled.lock().unwrap().clone();
    fired.sort();
    assert_eq!(fired, vec![0, 1, 2, 3, 4]);
    assert_eq!(factory.runs().len(), 1);
}

#[tokio::test]
async fn test_dropped_emission_still_settles() {
    let (mut coordinator, factory) = coordinator(zero_wait().with_seed("boot"));

    let (done, mut settled) = EmitDone::channel();
    let compilation = compilation();
    drop(coordinator.on_emit(&compilation, done));

    assert!(settled.try_recv().is_ok());
    assert!(factory.runs().is_empty());
}

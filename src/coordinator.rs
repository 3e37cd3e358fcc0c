//! Run Coordinator: emission hook tying seed, change detection and debounce
//!
//! Per emission:
//!
//! ```text
//! Idle -> AwaitingSeed -> Filtering -> NoChanges | Scheduled -> Idle
//! ```
//!
//! The seed gate is awaited on the first emission only; afterwards it is
//! settled and costs nothing. `on_emit` returns once the emission is either
//! completed (no changes) or handed to the scheduler; the completion callback
//! of a scheduled emission fires when its run finishes or when a later
//! emission supersedes it.

use crate::changes::ChangeDetector;
use crate::config::Settings;
use crate::debounce::{DebounceScheduler, EmitDone};
use crate::executor::{GlobalTable, ModuleExecutor};
use crate::pipeline::{extract_sources, Compilation};
use crate::runner::{FileLoader, MemoryLoader, RunnerFactory, SourceFile};
use crate::seed::{spawn_seed, SeedState};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Where an emission ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Nothing to run; the completion callback already fired
    NoChanges,
    /// Handed to the scheduler with these unit names
    Scheduled(Vec<String>),
}

pub struct RunCoordinator {
    settings: Settings,
    executor: ModuleExecutor,
    seed: SeedState,
    detector: ChangeDetector,
    scheduler: DebounceScheduler,
    runners: Arc<dyn RunnerFactory>,
}

impl RunCoordinator {
    pub fn new(settings: Settings, runners: Arc<dyn RunnerFactory>) -> Self {
        let executor = ModuleExecutor::new(GlobalTable::new());
        Self {
            seed: SeedState::for_seed(settings.seed.as_deref()),
            detector: ChangeDetector::new(settings.test_marker.clone()),
            scheduler: DebounceScheduler::new(settings.wait),
            settings,
            executor,
            runners,
        }
    }

    /// Values published for executed modules (the seed, once resolved)
    pub fn globals(&self) -> &GlobalTable {
        self.executor.globals()
    }

    /// Handle one emission. `done` fires exactly once.
    pub async fn on_emit(&mut self, compilation: &dyn Compilation, done: EmitDone) -> EmitOutcome {
        self.await_seed(compilation).await;

        let changed = self.detector.filter_changed(compilation.units());
        if changed.is_empty() {
            debug!("no test unit changed");
            done.complete();
            return EmitOutcome::NoChanges;
        }

        let sources = match extract_sources(compilation, &changed) {
            Ok(sources) => sources,
            Err(e) => {
                error!(error = %e, "cannot read changed units");
                done.complete();
                return EmitOutcome::NoChanges;
            }
        };
        if sources.is_empty() {
            done.complete();
            return EmitOutcome::NoChanges;
        }

        let names: Vec<String> = changed.into_iter().map(|u| u.name).collect();
        info!(units = ?names, "scheduling test run");
        self.scheduler.schedule(self.test_run(sources), done);
        EmitOutcome::Scheduled(names)
    }

    async fn await_seed(&mut self, compilation: &dyn Compilation) {
        if let (SeedState::NotStarted, Some(seed)) = (&self.seed, &self.settings.seed) {
            info!(seed = %seed, "initializing seed");
            self.seed = SeedState::Pending(spawn_seed(compilation, seed, &self.executor));
        }
        self.seed.settle().await;
    }

    /// Build the deferred run: fresh runner, seed global, in-memory files
    fn test_run(&self, sources: Vec<SourceFile>) -> impl std::future::Future<Output = ()> + Send {
        let runners = Arc::clone(&self.runners);
        let loader: Arc<dyn FileLoader> = Arc::new(MemoryLoader::new(self.executor.clone()));
        let seed = self.settings.seed.clone();

        async move {
            let mut runner = runners.create(loader);
            if let Some(seed) = seed {
                runner.add_global(&seed);
            }
            for source in sources {
                runner.add_file(source);
            }

            let summary = runner.run().await;
            info!(
                passed = summary.passed,
                failed = summary.failed,
                skipped = summary.skipped,
                errors = summary.errors,
                duration_ms = summary.duration_ms,
                "test run finished"
            );
        }
    }
}

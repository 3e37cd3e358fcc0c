//! Seed Initializer: one-shot async setup published before any test run
//!
//! The seed unit's primary output is evaluated through the `ModuleExecutor`;
//! the resulting value is called with no arguments and, if that call yields
//! an awaitable, driven to completion on a private event loop. The coordinator
//! memoizes the outcome for the process lifetime, failures included.

use crate::error::SeedError;
use crate::executor::{ExecutionContext, ModuleExecutor};
use crate::pipeline::{extract_sources, Compilation};
use crate::runner::SourceFile;
use pyo3::prelude::*;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Memoized seed computation
pub enum SeedState {
    NotStarted,
    Pending(JoinHandle<Result<(), SeedError>>),
    Settled(Result<(), SeedError>),
}

impl SeedState {
    /// Initial state: a missing seed is an already-settled no-op gate
    pub fn for_seed(seed: Option<&str>) -> Self {
        match seed {
            Some(_) => Self::NotStarted,
            None => Self::Settled(Ok(())),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }

    /// Await the pending task, if any, and record its outcome
    pub async fn settle(&mut self) {
        if let Self::Pending(handle) = self {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(SeedError::Aborted(e.to_string())),
            };
            match &outcome {
                Ok(()) => info!("seed ready"),
                Err(e) => error!(error = %e, "seed initialization failed, continuing without it"),
            }
            *self = Self::Settled(outcome);
        }
    }
}

/// Find the seed unit's primary output (first match in emission order).
///
/// # Errors
/// `SeedError::NotFound` listing every unit name of the emission.
pub fn locate_seed(compilation: &dyn Compilation, seed: &str) -> Result<SourceFile, SeedError> {
    let not_found = || SeedError::NotFound {
        seed: seed.to_string(),
        available: compilation.units().iter().map(|u| u.name.clone()).collect(),
    };

    let unit = compilation
        .units()
        .iter()
        .find(|u| u.name == seed)
        .ok_or_else(not_found)?;

    let sources = extract_sources(compilation, std::slice::from_ref(unit)).map_err(|e| {
        SeedError::Evaluation {
            seed: seed.to_string(),
            message: e.to_string(),
        }
    })?;

    sources.into_iter().next().ok_or_else(not_found)
}

/// Evaluate the seed unit and resolve its value.
///
/// The lookup happens immediately; evaluation runs when the returned future
/// is polled, on a blocking thread holding the GIL.
pub fn get_seed(
    compilation: &dyn Compilation,
    seed: &str,
    executor: &ModuleExecutor,
) -> impl Future<Output = Result<Py<PyAny>, SeedError>> + Send + 'static {
    let located = locate_seed(compilation, seed);
    let executor = executor.clone();
    let seed = seed.to_string();

    async move {
        let file = located?;
        let name = seed.clone();
        tokio::task::spawn_blocking(move || {
            Python::with_gil(|py| evaluate(py, &executor, &file)).map_err(|e| {
                SeedError::Evaluation {
                    seed: name,
                    message: e.to_string(),
                }
            })
        })
        .await
        .map_err(|e| SeedError::Aborted(e.to_string()))?
    }
}

/// Start the seed task: evaluate, then publish under the seed's own name
pub fn spawn_seed(
    compilation: &dyn Compilation,
    seed: &str,
    executor: &ModuleExecutor,
) -> JoinHandle<Result<(), SeedError>> {
    let pending = get_seed(compilation, seed, executor);
    let globals = executor.globals().clone();
    let seed = seed.to_string();

    tokio::spawn(async move {
        let value = pending.await?;
        globals.publish(&seed, value);
        Ok(())
    })
}

fn evaluate(py: Python<'_>, executor: &ModuleExecutor, file: &SourceFile) -> PyResult<Py<PyAny>> {
    let ctx = ExecutionContext::new(&file.path);
    let factory = executor.execute(py, &file.source, &ctx)?;
    let result = factory.call0()?;
    resolve_awaitable(py, result)
}

/// Await `value` on a fresh event loop if it is awaitable, else pass it through
pub fn resolve_awaitable(py: Python<'_>, value: Bound<'_, PyAny>) -> PyResult<Py<PyAny>> {
    let inspect = py.import("inspect")?;
    if !inspect.call_method1("isawaitable", (&value,))?.is_truthy()? {
        return Ok(value.unbind());
    }

    let event_loop = py.import("asyncio")?.call_method0("new_event_loop")?;
    let resolved = event_loop.call_method1("run_until_complete", (value,));
    event_loop.call_method0("close")?;
    Ok(resolved?.unbind())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BuildUnit, MemoryCompilation};

    fn compilation() -> MemoryCompilation {
        MemoryCompilation::new("dist")
            .with_unit(BuildUnit::new("a", "1", &["a"]))
            .with_unit(BuildUnit::new("b", "1", &["b"]))
            .with_asset("a", "lambda: True")
            .with_asset("b", "False")
    }

    #[test]
    fn test_locate_seed() {
        let file = locate_seed(&compilation(), "a").unwrap();
        assert_eq!(file.source, "lambda: True");
        assert!(file.path.ends_with("a"));
    }

    #[test]
    fn test_locate_seed_not_found_lists_units() {
        let err = locate_seed(&compilation(), "missing").unwrap_err();
        assert_eq!(
            err,
            SeedError::NotFound {
                seed: "missing".to_string(),
                available: vec!["a".to_string(), "b".to_string()],
            }
        );
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_locate_seed_takes_first_match() {
        let c = MemoryCompilation::new("dist")
            .with_unit(BuildUnit::new("s", "1", &["first"]))
            .with_unit(BuildUnit::new("s", "2", &["second"]))
            .with_asset("first", "lambda: 1")
            .with_asset("second", "lambda: 2");
        assert_eq!(locate_seed(&c, "s").unwrap().source, "lambda: 1");
    }

    #[test]
    fn test_initial_state() {
        assert!(SeedState::for_seed(None).is_settled());
        assert!(!SeedState::for_seed(Some("boot")).is_settled());
    }

    #[tokio::test]
    async fn test_get_seed_not_found_is_a_failed_future() {
        let executor = ModuleExecutor::default();
        let result = get_seed(&compilation(), "missing", &executor).await;
        assert!(matches!(result, Err(SeedError::NotFound { .. })));
    }
}

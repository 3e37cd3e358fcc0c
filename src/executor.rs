//! In-Memory Module Executor: run emitted source without touching a filesystem
//!
//! Source text is wrapped as a five-parameter lambda, compiled in `eval` mode
//! and evaluated in a fresh globals dict. Only two things are visible to the
//! executed code:
//! - the injected parameters (`exports`, `require`, `module`, `__filename`, `__dirname`)
//! - the entries of the shared `GlobalTable` that the caller explicitly asks for
//!
//! Nothing from the host interpreter's `__main__` leaks in.

use dashmap::DashMap;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Wrap source as an expression-returning module function.
pub fn wrap(source: &str) -> String {
    format!("(lambda exports, require, module, __filename, __dirname: (\n{source}\n))")
}

// =============================================================================
// GlobalTable: named values injected into every executed module
// =============================================================================

/// Process-wide context-injection table
///
/// Holds values (the seed result, for instance) that later-loaded test code
/// refers to by name. Cloning shares the same table.
#[derive(Clone, Default)]
pub struct GlobalTable {
    slots: Arc<DashMap<String, Py<PyAny>>>,
}

impl GlobalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a value under `name`, replacing any previous one
    pub fn publish(&self, name: &str, value: Py<PyAny>) {
        self.slots.insert(name.to_string(), value);
    }

    pub fn get<'py>(&self, py: Python<'py>, name: &str) -> Option<Bound<'py, PyAny>> {
        self.slots.get(name).map(|v| v.bind(py).clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// =============================================================================
// ExecutionContext
// =============================================================================

/// Per-execution parameters
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Reported as `__filename` and used as the code object's filename
    pub filename: PathBuf,
    /// Names from the `GlobalTable` to expose inside the module scope
    pub globals: Vec<String>,
}

impl ExecutionContext {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            globals: Vec::new(),
        }
    }

    pub fn with_globals(mut self, names: &[String]) -> Self {
        self.globals.extend(names.iter().cloned());
        self
    }

    fn dirname(&self) -> String {
        self.filename
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn module_name(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "__memory__".to_string())
    }
}

// =============================================================================
// ModuleExecutor
// =============================================================================

#[derive(Clone, Default)]
pub struct ModuleExecutor {
    globals: GlobalTable,
}

impl ModuleExecutor {
    pub fn new(globals: GlobalTable) -> Self {
        Self { globals }
    }

    pub fn globals(&self) -> &GlobalTable {
        &self.globals
    }

    /// Evaluate `source` in an isolated scope and return its value.
    ///
    /// # Errors
    /// Any exception raised while compiling, evaluating or invoking the
    /// wrapped source.
    pub fn execute<'py>(
        &self,
        py: Python<'py>,
        source: &str,
        ctx: &ExecutionContext,
    ) -> PyResult<Bound<'py, PyAny>> {
        let builtins = py.import("builtins")?;

        let scope = PyDict::new(py);
        scope.set_item("__builtins__", &builtins)?;
        for name in &ctx.globals {
            if let Some(value) = self.globals.get(py, name) {
                scope.set_item(name, value)?;
            }
        }

        let filename = ctx.filename.to_string_lossy().to_string();
        let code = builtins
            .getattr("compile")?
            .call1((wrap(source), filename.clone(), "eval"))?;
        let wrapper = builtins.getattr("eval")?.call1((code, scope))?;

        let exports = PyDict::new(py);
        let module = PyModule::new(py, &ctx.module_name())?;
        module.setattr("exports", &exports)?;
        module.setattr("__file__", &filename)?;
        let require = py.import("importlib")?.getattr("import_module")?;

        wrapper.call1((exports, require, module, filename, ctx.dirname()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_template() {
        assert_eq!(
            wrap("1"),
            "(lambda exports, require, module, __filename, __dirname: (\n1\n))"
        );
    }

    #[test]
    fn test_wrap_is_pure() {
        assert_eq!(wrap("lambda: 2"), wrap("lambda: 2"));
        assert!(wrap("x").contains("\nx\n"));
    }

    #[test]
    fn test_context_paths() {
        let ctx = ExecutionContext::new("dist/a.test.py");
        assert_eq!(ctx.dirname(), "dist");
        assert_eq!(ctx.module_name(), "a.test");
    }

    #[test]
    fn test_context_without_parent() {
        let ctx = ExecutionContext::new("");
        assert_eq!(ctx.dirname(), "");
        assert_eq!(ctx.module_name(), "__memory__");
    }

    #[test]
    fn test_with_globals_appends() {
        let ctx = ExecutionContext::new("a.py").with_globals(&["seed".to_string()]);
        assert_eq!(ctx.globals, vec!["seed".to_string()]);
    }

    #[test]
    fn test_empty_table() {
        let table = GlobalTable::new();
        assert!(table.is_empty());
        assert!(!table.contains("seed"));
    }
}

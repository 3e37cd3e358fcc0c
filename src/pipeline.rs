//! Build-pipeline boundary: units, emissions and their in-memory assets
//!
//! The coordinator never reads output files itself. It sees an emission
//! through the `Compilation` trait: a list of named, fingerprinted units and
//! an asset lookup that yields each emitted file's source on demand.

use crate::error::AssetError;
use crate::runner::SourceFile;
use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Opaque content version of a build unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// blake3 digest of the given bytes
    pub fn of(content: &[u8]) -> Self {
        Self(blake3::hash(content).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One named group of emitted output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub name: String,
    pub fingerprint: Fingerprint,
    /// Output file names, relative to the compilation's output path
    pub files: Vec<String>,
}

impl BuildUnit {
    pub fn new(name: &str, fingerprint: &str, files: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            fingerprint: Fingerprint::new(fingerprint),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// One emission cycle as seen by the coordinator
pub trait Compilation: Send + Sync {
    fn output_path(&self) -> &Path;

    /// Units in emission order
    fn units(&self) -> &[BuildUnit];

    fn asset_source(&self, file: &str) -> Option<String>;
}

// =============================================================================
// MemoryCompilation
// =============================================================================

/// Compilation held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCompilation {
    output_path: PathBuf,
    units: Vec<BuildUnit>,
    assets: HashMap<String, String>,
}

impl MemoryCompilation {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    pub fn with_unit(mut self, unit: BuildUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn with_asset(mut self, file: &str, source: &str) -> Self {
        self.assets.insert(file.to_string(), source.to_string());
        self
    }

    pub fn unit_mut(&mut self, name: &str) -> Option<&mut BuildUnit> {
        self.units.iter_mut().find(|u| u.name == name)
    }
}

impl Compilation for MemoryCompilation {
    fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn units(&self) -> &[BuildUnit] {
        &self.units
    }

    fn asset_source(&self, file: &str) -> Option<String> {
        self.assets.get(file).cloned()
    }
}

// =============================================================================
// Source extraction
// =============================================================================

/// Collect the sources of every file of `units`, keyed by output path.
///
/// A file shared by several units appears once, at its first position.
///
/// # Errors
/// `AssetError::Missing` when a unit names a file the emission has no asset for.
pub fn extract_sources(
    compilation: &dyn Compilation,
    units: &[BuildUnit],
) -> Result<Vec<SourceFile>, AssetError> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for unit in units {
        for file in &unit.files {
            let path = compilation.output_path().join(file);
            if !seen.insert(path.clone()) {
                continue;
            }
            let source = compilation
                .asset_source(file)
                .ok_or_else(|| AssetError::Missing { file: file.clone() })?;
            sources.push(SourceFile { path, source });
        }
    }

    Ok(sources)
}

// =============================================================================
// Output directory scan
// =============================================================================

/// Turn a directory of emitted `.py` files into a compilation.
///
/// Each file becomes a unit named after its relative path minus the `.py`
/// extension, fingerprinted by content.
///
/// # Errors
/// `root` is not a directory, or any entry below it cannot be walked or read.
pub fn scan_output_dir(root: &Path) -> Result<MemoryCompilation> {
    if !root.is_dir() {
        bail!("Output directory {} does not exist", root.display());
    }
    let mut compilation = MemoryCompilation::new(root);

    let walked = WalkDir::new(root)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to walk {}", root.display()))?;
    let mut entries: Vec<PathBuf> = walked
        .into_iter()
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
        .filter(|p| !p.to_string_lossy().contains("__pycache__"))
        .collect();
    entries.sort();

    for path in entries {
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let file = relative.to_string_lossy().to_string();
        let name = relative.with_extension("").to_string_lossy().to_string();
        let source = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        compilation.units.push(BuildUnit {
            name,
            fingerprint: Fingerprint::of(source.as_bytes()),
            files: vec![file.clone()],
        });
        compilation.assets.insert(file, source);
    }

    Ok(compilation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn compilation() -> MemoryCompilation {
        MemoryCompilation::new("dist")
            .with_asset("a", "1")
            .with_asset("b", "2")
            .with_asset("c", "3")
    }

    #[test]
    fn test_extract_sources_joins_output_path() {
        let c = compilation();
        let units = vec![
            BuildUnit::new("a", "1", &["a"]),
            BuildUnit::new("b", "1", &["b"]),
            BuildUnit::new("c", "1", &["c"]),
        ];

        let sources = extract_sources(&c, &units).unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[1].path, Path::new("dist").join("b"));
        assert_eq!(sources[1].source, "2");
    }

    #[test]
    fn test_extract_sources_merges_shared_files() {
        let c = compilation();
        let units = vec![
            BuildUnit::new("a", "1", &["a"]),
            BuildUnit::new("ab", "1", &["a", "b"]),
            BuildUnit::new("bc", "1", &["b", "c"]),
        ];

        let sources = extract_sources(&c, &units).unwrap();
        let paths: Vec<_> = sources.iter().map(|s| s.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                Path::new("dist").join("a"),
                Path::new("dist").join("b"),
                Path::new("dist").join("c"),
            ]
        );
    }

    #[test]
    fn test_extract_sources_missing_asset() {
        let c = compilation();
        let units = vec![BuildUnit::new("z", "1", &["z"])];

        let err = extract_sources(&c, &units).unwrap_err();
        assert_eq!(
            err,
            AssetError::Missing {
                file: "z".to_string()
            }
        );
    }

    #[test]
    fn test_fingerprint_of_is_content_based() {
        assert_eq!(Fingerprint::of(b"x = 1"), Fingerprint::of(b"x = 1"));
        assert_ne!(Fingerprint::of(b"x = 1"), Fingerprint::of(b"x = 2"));
    }

    #[test]
    fn test_scan_output_dir() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("pkg")).unwrap();
        fs::create_dir_all(temp.path().join("__pycache__")).unwrap();
        fs::write(temp.path().join("a.test.py"), "lambda: None").unwrap();
        fs::write(temp.path().join("pkg").join("b.test.py"), "{}").unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();
        fs::write(temp.path().join("__pycache__").join("x.py"), "0").unwrap();

        let compilation = scan_output_dir(temp.path()).unwrap();
        let names: Vec<&str> = compilation.units().iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a.test"));
        assert!(names.contains(&Path::new("pkg").join("b.test").to_str().unwrap()));
        assert_eq!(
            compilation.asset_source("a.test.py").as_deref(),
            Some("lambda: None")
        );
    }

    #[test]
    fn test_scan_missing_dir_fails() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("dist");

        let err = scan_output_dir(&missing).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_scan_file_instead_of_dir_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("dist");
        fs::write(&file, "lambda: None").unwrap();

        assert!(scan_output_dir(&file).is_err());
    }

    #[test]
    fn test_unit_mut() {
        let mut c = MemoryCompilation::new("dist").with_unit(BuildUnit::new("a.test", "1", &["a"]));
        c.unit_mut("a.test").unwrap().fingerprint = Fingerprint::new("2");
        assert_eq!(c.units()[0].fingerprint.as_str(), "2");
    }
}

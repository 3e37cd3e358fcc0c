//! Configuration Loader
//! - Reads `[tool.retest]` from pyproject.toml
//! - Provides CLI argument parsing with clap
//! - CLI values override the file, the file overrides the defaults

use crate::changes::DEFAULT_TEST_MARKER;
use crate::debounce::DEFAULT_WAIT;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// CLI Configuration
// =============================================================================

/// Output format for test results
#[derive(ValueEnum, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable CLI output (to stderr)
    #[default]
    Human,
    /// Machine-readable NDJSON (to stdout)
    Json,
}

/// retest - re-run changed test units of an emitted build
#[derive(Parser, Debug)]
#[command(name = "retest", version, about = "Incremental test re-execution for emitted builds")]
pub struct Cli {
    /// Quiet window in milliseconds (also: RETEST_WAIT env var)
    #[arg(long, env = "RETEST_WAIT")]
    pub wait: Option<u64>,

    /// Unit to evaluate as the async seed before any run (also: RETEST_SEED env var)
    #[arg(long, env = "RETEST_SEED")]
    pub seed: Option<String>,

    /// Substring marking a unit as a test unit
    #[arg(long)]
    pub marker: Option<String>,

    /// Output format (also: RETEST_FORMAT env var)
    #[arg(long, value_enum, env = "RETEST_FORMAT")]
    pub format: Option<OutputFormat>,

    /// Keep watching the output directory and re-run on every emission
    #[arg(long, short = 'w')]
    pub watch: bool,

    /// Directory holding the emitted build output
    #[arg(default_value = "dist")]
    pub output_dir: PathBuf,
}

// =============================================================================
// PyProject Configuration
// =============================================================================

#[derive(Deserialize, Default)]
struct PyProject {
    tool: Option<ToolConfig>,
}

#[derive(Deserialize, Default)]
struct ToolConfig {
    retest: Option<FileSettings>,
}

/// `seed = "name"` enables, `seed = false` disables
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum SeedOption {
    Name(String),
    Flag(bool),
}

#[derive(Deserialize, Default, Debug)]
struct FileSettings {
    wait: Option<u64>,
    seed: Option<SeedOption>,
    test_marker: Option<String>,
    format: Option<OutputFormat>,
}

/// Effective coordinator settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub wait: Duration,
    pub seed: Option<String>,
    pub test_marker: String,
    pub format: OutputFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wait: DEFAULT_WAIT,
            seed: None,
            test_marker: DEFAULT_TEST_MARKER.to_string(),
            format: OutputFormat::Human,
        }
    }
}

impl Settings {
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_seed(mut self, seed: &str) -> Self {
        self.seed = Some(seed.to_string());
        self
    }

    /// Read `[tool.retest]` from `root/pyproject.toml`; a missing file or
    /// section yields the defaults.
    ///
    /// # Errors
    /// Unreadable or malformed pyproject.toml, or `seed = true`.
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join("pyproject.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// # Errors
    /// Malformed TOML or `seed = true`.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let pyproject: PyProject = toml::from_str(contents)?;
        let file = pyproject
            .tool
            .and_then(|t| t.retest)
            .unwrap_or_default();

        let defaults = Self::default();
        let seed = match file.seed {
            None | Some(SeedOption::Flag(false)) => None,
            Some(SeedOption::Flag(true)) => bail!("`seed = true` must name a build unit"),
            Some(SeedOption::Name(name)) => Some(name),
        };

        Ok(Self {
            // 0 is a real quiet window, not "unset"
            wait: file.wait.map(Duration::from_millis).unwrap_or(defaults.wait),
            seed,
            test_marker: file.test_marker.unwrap_or(defaults.test_marker),
            format: file.format.unwrap_or(defaults.format),
        })
    }

    /// Apply command-line overrides
    pub fn merge_cli(mut self, cli: &Cli) -> Self {
        if let Some(wait) = cli.wait {
            self.wait = Duration::from_millis(wait);
        }
        if let Some(seed) = &cli.seed {
            self.seed = (!seed.is_empty()).then(|| seed.clone());
        }
        if let Some(marker) = &cli.marker {
            self.test_marker = marker.clone();
        }
        if let Some(format) = &cli.format {
            self.format = format.clone();
        }
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.wait, Duration::from_millis(600));
        assert_eq!(settings.seed, None);
        assert_eq!(settings.test_marker, ".test");
        assert_eq!(settings.format, OutputFormat::Human);
    }

    #[test]
    fn test_parse_full_section() {
        let toml_content = r#"
[tool.retest]
wait = 250
seed = "boot"
test_marker = "_spec"
format = "json"
"#;
        let settings = Settings::from_toml(toml_content).unwrap();
        assert_eq!(settings.wait, Duration::from_millis(250));
        assert_eq!(settings.seed.as_deref(), Some("boot"));
        assert_eq!(settings.test_marker, "_spec");
        assert_eq!(settings.format, OutputFormat::Json);
    }

    #[test]
    fn test_zero_wait_is_honored() {
        let settings = Settings::from_toml("[tool.retest]\nwait = 0\n").unwrap();
        assert_eq!(settings.wait, Duration::ZERO);
    }

    #[test]
    fn test_seed_false_disables() {
        let settings = Settings::from_toml("[tool.retest]\nseed = false\n").unwrap();
        assert_eq!(settings.seed, None);
    }

    #[test]
    fn test_seed_true_is_rejected() {
        assert!(Settings::from_toml("[tool.retest]\nseed = true\n").is_err());
    }

    #[test]
    fn test_other_tool_sections_ignored() {
        let toml_content = r#"
[tool.black]
line-length = 100

[tool.ruff]
select = ["E", "F"]
"#;
        assert_eq!(Settings::from_toml(toml_content).unwrap(), Settings::default());
    }

    #[test]
    fn test_parse_empty_pyproject() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(Settings::load(temp_dir.path()).unwrap(), Settings::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("pyproject.toml"),
            "[project]\nname = \"demo\"\n\n[tool.retest]\nwait = 5\n",
        )
        .unwrap();

        let settings = Settings::load(temp_dir.path()).unwrap();
        assert_eq!(settings.wait, Duration::from_millis(5));
    }

    #[test]
    fn test_load_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("pyproject.toml"), "[tool.retest\n").unwrap();
        assert!(Settings::load(temp_dir.path()).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = Cli::parse_from(["retest", "--wait", "0", "--seed", "boot", "out"]);
        let settings = Settings::from_toml("[tool.retest]\nwait = 900\n")
            .unwrap()
            .merge_cli(&cli);
        assert_eq!(settings.wait, Duration::ZERO);
        assert_eq!(settings.seed.as_deref(), Some("boot"));
        assert_eq!(cli.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_cli_empty_seed_disables() {
        let cli = Cli::parse_from(["retest", "--seed", ""]);
        let settings = Settings::default().with_seed("boot").merge_cli(&cli);
        assert_eq!(settings.seed, None);
    }
}

//! CLI Integration Tests
//!
//! Tests for:
//! - CLI flag recognition (--wait, --seed, --format, --watch)
//! - Settings precedence: CLI over pyproject.toml over defaults
//! - Output directory scanning into an emission
//! - Reporter selection by format

use clap::Parser;
use retest_core::config::{Cli, OutputFormat, Settings};
use retest_core::pipeline::{scan_output_dir, Compilation};
use retest_core::reporter::{reporter_for, JsonReporter};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_cli_defaults() {
    let cli = Cli::parse_from(["retest"]);
    assert_eq!(cli.output_dir, PathBuf::from("dist"));
    assert!(!cli.watch);
    assert!(cli.wait.is_none());
}

#[test]
fn test_cli_flags() {
    let cli = Cli::parse_from([
        "retest", "--wait", "0", "--seed", "boot", "--format", "json", "--marker", "_spec", "-w",
        "build",
    ]);
    assert_eq!(cli.wait, Some(0));
    assert_eq!(cli.seed.as_deref(), Some("boot"));
    assert_eq!(cli.format, Some(OutputFormat::Json));
    assert_eq!(cli.marker.as_deref(), Some("_spec"));
    assert!(cli.watch);
    assert_eq!(cli.output_dir, PathBuf::from("build"));
}

#[test]
fn test_cli_rejects_unknown_format() {
    assert!(Cli::try_parse_from(["retest", "--format", "xml"]).is_err());
}

#[test]
fn test_settings_precedence() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("pyproject.toml"),
        "[tool.retest]\nwait = 0\nseed = \"boot\"\nformat = \"json\"\n",
    )
    .unwrap();

    let file_only = Settings::load(temp.path()).unwrap();
    assert_eq!(file_only.wait, Duration::ZERO);
    assert_eq!(file_only.seed.as_deref(), Some("boot"));
    assert_eq!(file_only.format, OutputFormat::Json);

    let cli = Cli::parse_from(["retest", "--wait", "75", "--format", "human"]);
    let merged = file_only.merge_cli(&cli);
    assert_eq!(merged.wait, Duration::from_millis(75));
    assert_eq!(merged.seed.as_deref(), Some("boot"));
    assert_eq!(merged.format, OutputFormat::Human);
}

#[test]
fn test_scan_fingerprint_follows_content() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.test.py");

    fs::write(&file, "lambda: None").unwrap();
    let first = scan_output_dir(temp.path()).unwrap();
    let again = scan_output_dir(temp.path()).unwrap();
    fs::write(&file, "lambda: 1").unwrap();
    let changed = scan_output_dir(temp.path()).unwrap();

    assert_eq!(first.units()[0].fingerprint, again.units()[0].fingerprint);
    assert_ne!(first.units()[0].fingerprint, changed.units()[0].fingerprint);
}

#[test]
fn test_reporter_follows_format() {
    let mut reporter = reporter_for(&OutputFormat::Human);
    reporter.on_load_error("dist/a.test.py: SyntaxError");
    assert_ne!(JsonReporter::new().run_id(), "");
}

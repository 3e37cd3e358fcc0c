//! Run output in two formats
//!
//! - `HumanReporter`: readable lines on stderr (default)
//! - `JsonReporter`: one JSON object per line on stdout, tagged with a run id
//!
//! Reporters live on the blocking thread that drives a run, hence `Send`.
//! With `--format json`, stdout carries nothing but these events; diagnostics
//! go through `tracing` to stderr.

use crate::config::OutputFormat;
use crate::runner::RunSummary;
use serde::Serialize;
use std::io::{self, Write};
use uuid::Uuid;

/// Outcome class of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    /// Map a harness status code; unknown codes count as errors
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Pass,
            1 => Self::Fail,
            2 => Self::Skip,
            _ => Self::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Error => "error",
        }
    }
}

/// One finished test as seen by reporters
#[derive(Debug, Clone, Serialize)]
pub struct TestReport<'a> {
    pub id: &'a str,
    pub file: &'a str,
    pub status: TestStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
}

pub trait Reporter: Send {
    /// `tests` is the number of collected tests about to run
    fn on_run_start(&mut self, tests: usize);

    fn on_test(&mut self, report: &TestReport<'_>);

    /// A file could not be loaded or its exports could not be collected
    fn on_load_error(&mut self, message: &str);

    fn on_run_end(&mut self, summary: &RunSummary);
}

pub fn reporter_for(format: &OutputFormat) -> Box<dyn Reporter> {
    match format {
        OutputFormat::Human => Box::new(HumanReporter),
        OutputFormat::Json => Box::new(JsonReporter::new()),
    }
}

// =============================================================================
// JSON
// =============================================================================

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonEvent<'a> {
    RunStart {
        run_id: &'a str,
        tests: usize,
    },
    Test {
        run_id: &'a str,
        #[serde(flatten)]
        report: &'a TestReport<'a>,
    },
    LoadError {
        run_id: &'a str,
        message: &'a str,
    },
    RunEnd {
        run_id: &'a str,
        #[serde(flatten)]
        summary: &'a RunSummary,
    },
}

/// NDJSON writer; every line of one run shares the same `run_id`
pub struct JsonReporter {
    run_id: String,
    out: Box<dyn Write + Send>,
}

impl JsonReporter {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            out,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn write(&mut self, event: &JsonEvent<'_>) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        // A closed stdout must not take the run down with it
        let _ = writeln!(self.out, "{}", line).and_then(|_| self.out.flush());
    }
}

impl Default for JsonReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for JsonReporter {
    fn on_run_start(&mut self, tests: usize) {
        let run_id = self.run_id.clone();
        self.write(&JsonEvent::RunStart {
            run_id: &run_id,
            tests,
        });
    }

    fn on_test(&mut self, report: &TestReport<'_>) {
        let run_id = self.run_id.clone();
        self.write(&JsonEvent::Test {
            run_id: &run_id,
            report,
        });
    }

    fn on_load_error(&mut self, message: &str) {
        let run_id = self.run_id.clone();
        self.write(&JsonEvent::LoadError {
            run_id: &run_id,
            message,
        });
    }

    fn on_run_end(&mut self, summary: &RunSummary) {
        let run_id = self.run_id.clone();
        self.write(&JsonEvent::RunEnd {
            run_id: &run_id,
            summary,
        });
    }
}

// =============================================================================
// Human
// =============================================================================

pub struct HumanReporter;

impl Reporter for HumanReporter {
    fn on_run_start(&mut self, tests: usize) {
        eprintln!("[retest] running {} test(s)", tests);
    }

    fn on_test(&mut self, report: &TestReport<'_>) {
        let mark = match report.status {
            TestStatus::Pass => "ok",
            TestStatus::Skip => "skip",
            TestStatus::Fail => "FAIL",
            TestStatus::Error => "ERROR",
        };
        eprintln!("  {:<5} {} ({}ms)", mark, report.id, report.duration_ms);

        if let Some(message) = report.message {
            if matches!(report.status, TestStatus::Fail | TestStatus::Error) {
                message
                    .lines()
                    .take(10)
                    .for_each(|line| eprintln!("        {}", line));
            }
        }
    }

    fn on_load_error(&mut self, message: &str) {
        eprintln!("[retest] load error: {}", message);
    }

    fn on_run_end(&mut self, summary: &RunSummary) {
        eprintln!(
            "[retest] {} passed, {} failed, {} skipped, {} errors in {}ms",
            summary.passed, summary.failed, summary.skipped, summary.errors, summary.duration_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TestStatus::from_code(0), TestStatus::Pass);
        assert_eq!(TestStatus::from_code(2), TestStatus::Skip);
        assert_eq!(TestStatus::from_code(3), TestStatus::Error);
        assert_eq!(TestStatus::Fail.as_str(), "fail");
    }

    #[test]
    fn test_json_run_shares_run_id() {
        let buf = SharedBuf::default();
        let mut reporter = JsonReporter::with_writer(Box::new(buf.clone()));
        let run_id = reporter.run_id().to_string();

        reporter.on_run_start(1);
        reporter.on_test(&TestReport {
            id: "a.test::test_x",
            file: "dist/a.test.py",
            status: TestStatus::Fail,
            duration_ms: 3,
            message: Some("nope"),
        });
        reporter.on_run_end(&RunSummary {
            failed: 1,
            ..RunSummary::default()
        });

        let lines = buf.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l["run_id"] == run_id.as_str()));
        assert_eq!(lines[0]["event"], "run_start");
        assert_eq!(lines[1]["status"], "fail");
        assert_eq!(lines[1]["message"], "nope");
        assert_eq!(lines[2]["event"], "run_end");
        assert_eq!(lines[2]["failed"], 1);
    }

    #[test]
    fn test_json_omits_empty_message() {
        let buf = SharedBuf::default();
        let mut reporter = JsonReporter::with_writer(Box::new(buf.clone()));
        reporter.on_test(&TestReport {
            id: "t",
            file: "f",
            status: TestStatus::Pass,
            duration_ms: 0,
            message: None,
        });
        reporter.on_load_error("SyntaxError in dist/a.test.py");

        let lines = buf.lines();
        assert!(lines[0].get("message").is_none());
        assert_eq!(lines[1]["event"], "load_error");
    }

    #[test]
    fn test_run_ids_differ_between_runs() {
        assert_ne!(JsonReporter::new().run_id(), JsonReporter::new().run_id());
    }
}

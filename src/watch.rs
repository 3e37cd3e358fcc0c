//! Watch Mode: turn filesystem changes in the output directory into emissions
//!
//! The build tool writes its output; this loop notices, waits for the burst of
//! writes to settle, and asks the caller to rescan. Coalescing of test runs is
//! the `DebounceScheduler`'s job; the 100ms settle here only avoids scanning a
//! half-written directory.

use crate::signals;
use anyhow::Result;
use crossbeam_channel::{unbounded, RecvTimeoutError};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

const SETTLE: Duration = Duration::from_millis(100);
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Watch `output_dir` until shutdown is requested, sending the changed paths
/// of every settled burst. Blocks the calling thread.
pub fn start_watch_loop(output_dir: &Path, emissions: UnboundedSender<Vec<PathBuf>>) -> Result<()> {
    let (tx, rx) = unbounded();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!(error = %e, "watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(output_dir, RecursiveMode::Recursive)?;

    info!(dir = %output_dir.display(), "watching for emissions");

    loop {
        if signals::shutdown_requested() {
            break;
        }

        let first_event = match rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut changed_paths = collect_module_paths(&first_event);
        while let Ok(event) = rx.recv_timeout(SETTLE) {
            changed_paths.extend(collect_module_paths(&event));
        }

        if changed_paths.is_empty() {
            continue;
        }
        changed_paths.sort();
        changed_paths.dedup();

        if emissions.send(changed_paths).is_err() {
            // Receiver gone, nobody to emit to
            break;
        }
    }

    Ok(())
}

/// Extract emitted module paths from a notify event
fn collect_module_paths(event: &Event) -> Vec<PathBuf> {
    event
        .paths
        .iter()
        .filter(|p| p.extension() == Some(OsStr::new("py")))
        .filter(|p| !is_ignored_path(p))
        .cloned()
        .collect()
}

/// Check if a path should be ignored
fn is_ignored_path(path: &Path) -> bool {
    let path_str = path.to_string_lossy();

    path_str.contains("__pycache__")
        || path_str.contains(".git")
        || path_str.contains(".venv")
        || path_str.contains("/venv/")
        || path_str.contains("/node_modules/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, ModifyKind};

    fn modify_event(paths: &[&str]) -> Event {
        Event {
            kind: notify::EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_is_ignored_path() {
        assert!(is_ignored_path(Path::new("dist/__pycache__/a.test.py")));
        assert!(is_ignored_path(Path::new(".git/hooks/pre-commit.py")));
        assert!(is_ignored_path(Path::new("/project/venv/bin/activate.py")));
        assert!(!is_ignored_path(Path::new("dist/a.test.py")));
        assert!(!is_ignored_path(Path::new("dist/seed.py")));
    }

    #[test]
    fn test_collect_filters_non_modules() {
        let event = modify_event(&["dist/a.test.py", "dist/a.test.py.map", "dist/b.test.py"]);
        let paths = collect_module_paths(&event);
        assert_eq!(
            paths,
            vec![PathBuf::from("dist/a.test.py"), PathBuf::from("dist/b.test.py")]
        );
    }

    #[test]
    fn test_collect_filters_ignored() {
        let event = modify_event(&["dist/a.test.py", "dist/__pycache__/a.test.cpython-312.py"]);
        assert_eq!(collect_module_paths(&event), vec![PathBuf::from("dist/a.test.py")]);
    }
}

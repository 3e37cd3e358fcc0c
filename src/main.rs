use anyhow::{Context, Result};
use clap::Parser;
use retest_core::config::{Cli, Settings};
use retest_core::coordinator::RunCoordinator;
use retest_core::debounce::EmitDone;
use retest_core::pipeline::scan_output_dir;
use retest_core::runner::HarnessFactory;
use retest_core::{logging, signals, watch};
use std::sync::Arc;
use tracing::{error, info};

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let root = std::env::current_dir()?;
    let settings = Settings::load(&root)?.merge_cli(&cli);

    // Single thread of control: emissions, timers and run completions
    // interleave cooperatively. Python work goes to blocking threads.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, settings))
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let factory = Arc::new(HarnessFactory::new(settings.format.clone()));
    let mut coordinator = RunCoordinator::new(settings, factory);

    let compilation = scan_output_dir(&cli.output_dir)
        .with_context(|| format!("Failed to scan {}", cli.output_dir.display()))?;
    let (done, settled) = EmitDone::channel();
    coordinator.on_emit(&compilation, done).await;

    if !cli.watch {
        let _ = settled.await;
        return Ok(());
    }

    signals::install_signal_handlers()?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let dir = cli.output_dir.clone();
    let watcher = tokio::task::spawn_blocking(move || watch::start_watch_loop(&dir, tx));

    while let Some(paths) = rx.recv().await {
        info!(files = paths.len(), "emission detected");
        match scan_output_dir(&cli.output_dir) {
            Ok(compilation) => {
                coordinator.on_emit(&compilation, EmitDone::noop()).await;
            }
            Err(e) => error!(error = %e, "failed to scan output"),
        }
    }

    watcher.await??;
    Ok(())
}

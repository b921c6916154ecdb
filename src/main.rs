use anyhow::{Context, Result};
use clap::Parser;
use instats::{cli::Cli, scan, shutdown, store::StatsStore};
use regex::Regex;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    for input in &args.inputs {
        if !input.exists() {
            anyhow::bail!("Input does not exist: {}", input.display());
        }
    }

    // Malformed patterns fail here, before the store is opened or any unit
    // is processed.
    let exclude_unit = Regex::new(&args.exclude).context("Invalid --exclude pattern")?;
    let exclude_file = Regex::new(&args.exclude_file).context("Invalid --exclude-file pattern")?;

    let store = StatsStore::open(&args.output)
        .with_context(|| format!("Failed to open statistics store: {}", args.output.display()))?;
    if args.clear_db {
        store.clear().context("Failed to clear statistics store")?;
    }

    let _guard = shutdown::install(store.clone())?;

    let config = scan::ScanConfig {
        evict_every: args.gc.max(1),
        exclude_unit,
        exclude_file,
        follow_shared: args.follow_shared,
        stop: shutdown::interrupt_flag(),
    };

    let scanner = scan::Scanner::new(&store, &config);
    let summary = scanner.run(&args.inputs)?;
    tracing::debug!(?summary, "scan complete");

    shutdown::run();
    if let Some(signo) = shutdown::interrupt_signal() {
        std::process::exit(128 + signo);
    }
    Ok(())
}

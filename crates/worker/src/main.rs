use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use trade_worker::{RunMode, Worker};

/// Polls a directory for broker exports and converts them into trade upload
/// and reconciliation files.
#[derive(Debug, Parser)]
#[command(name = "trade_worker", author, version, about = "Convert broker trade files", long_about = None)]
struct Args {
    /// Path to settings.json (falls back to ./settings.json, then built-in defaults)
    #[arg(short = 's', long = "settings")]
    settings: Option<PathBuf>,

    /// production records converted files in the tracking table; test does not
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = RunMode::Test)]
    mode: RunMode,

    /// Run a single cycle and exit
    #[arg(long = "once")]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = settings_loader::load_settings_with_fallback(args.settings.as_ref())?;
    settings_loader::apply_env_overrides(&mut settings);
    logger::init(settings.log_format);

    let interval = Duration::from_secs(settings.poll_interval_secs.max(1));
    let worker = Worker::new(settings, args.mode)?;
    tracing::info!(
        input = %worker.input_dir().display(),
        mode = ?worker.mode(),
        once = args.once,
        "trade worker starting"
    );

    trade_worker::run(Arc::new(worker), interval, args.once).await
}

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use utils::{FileStatus, FileTracker};

#[derive(Debug, Parser)]
#[command(
    name = "tracked-files",
    author,
    version,
    about = "List converted broker files, or forget one so it is converted again",
    long_about = None
)]
struct Args {
    /// Path to tracking directory or tracking.json file
    #[arg(short = 'd', long = "db", default_value = "./database")]
    db_path: PathBuf,

    /// File name to drop from the table
    #[arg(short = 'f', long = "forget")]
    forget: Option<String>,

    /// Write changes back to the table (otherwise dry-run)
    #[arg(short = 'w', long = "write")]
    write: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut tracker = FileTracker::open(&args.db_path)?;

    if let Some(name) = args.forget.as_deref() {
        if !tracker.forget(name) {
            println!("{name} is not in {:?}", tracker.path());
            return Ok(());
        }
        if args.write {
            let path = tracker.save()?;
            println!("✓ Forgot {name}; it will be converted on the next cycle ({:?})", path);
        } else {
            println!("Dry-run: {name} would be forgotten. Use --write to persist.");
        }
        return Ok(());
    }

    for row in tracker.rows() {
        let status = match row.status {
            FileStatus::Success => "ok",
            FileStatus::Failure => "FAILED",
        };
        println!(
            "{:<6} {}  modified {}  processed {}",
            status,
            row.file_name,
            row.last_modified.format("%Y-%m-%d %H:%M:%S"),
            row.processed_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(err) = &row.error {
            println!("       {err}");
        }
    }
    println!("{} tracked files in {:?}", tracker.rows().len(), tracker.path());

    Ok(())
}

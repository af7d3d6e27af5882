use anyhow::Result;
use std::{env, fs, path::PathBuf};

use ibkr_parser::{is_trade_file, IbkrTradeParser};

fn find_trade_file() -> Option<PathBuf> {
    let current_dir = env::current_dir().ok()?;
    let entries = fs::read_dir(&current_dir).ok()?;

    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|s| s.to_str())
                    .is_some_and(is_trade_file)
        })
        .collect();
    found.sort();
    found.into_iter().next()
}

fn main() -> Result<()> {
    // Usage:
    //   ibkr_parser [csv_file] [output_dir]
    //
    // If csv_file is not provided, the first *Trades_Activity*.csv in the current directory is used
    // Defaults:
    //   output_dir: current directory

    logger::init(models::LogFormat::Pretty);

    let args: Vec<String> = env::args().collect();

    let csv_path = if let Some(arg) = args.get(1) {
        PathBuf::from(arg)
    } else if let Some(found) = find_trade_file() {
        found
    } else {
        anyhow::bail!("No Trades_Activity CSV found in current directory. Please provide a CSV file path as the first argument.");
    };
    let output_dir = args.get(2).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    println!("📖 Parsing IB trade file: {}", csv_path.display());

    let parser = IbkrTradeParser::new();
    let parsed = parser.parse_file(&csv_path)?;

    if parsed.trades.is_empty() {
        println!("❌ Nothing parsed.");
        return Ok(());
    }

    println!(
        "✓ Parsed: {} trades (reference date={})",
        parsed.trades.len(),
        parsed
            .reference_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );

    let written = utils::convert_trades(
        parsed.trades,
        &output_dir,
        &parser.account,
        parsed.reference_date,
    )?;

    println!("\n📊 Summary:");
    println!("✓ Upload files written: {}", written.len());
    for path in &written {
        println!("  • {}", path.display());
    }
    println!("✅ Done.");

    Ok(())
}

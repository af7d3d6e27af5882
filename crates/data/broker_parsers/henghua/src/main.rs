use anyhow::{Context, Result};
use chrono::Local;
use std::{env, fs, path::PathBuf};

use hgnh_parser::{date_from_file_name, file_kind, HengHuaParser};
use utils::OutputKind;

fn main() -> Result<()> {
    // Usage:
    //   hgnh_parser [file1.xlsx file2.xlsx ...] [output_dir]
    //
    // If no .xlsx files are specified, every trade/cash workbook in the current directory
    // is converted. Cash balances without a date use the date in the file name, else today.
    // Defaults:
    //   output_dir: current directory

    logger::init(models::LogFormat::Pretty);

    let args: Vec<String> = env::args().collect();

    let mut xlsx_files: Vec<PathBuf> = Vec::new();
    let mut other_args: Vec<String> = Vec::new();
    for arg in args.iter().skip(1) {
        if arg.to_lowercase().ends_with(".xlsx") {
            xlsx_files.push(PathBuf::from(arg));
        } else {
            other_args.push(arg.clone());
        }
    }

    if xlsx_files.is_empty() {
        println!("📂 No .xlsx files specified, scanning current directory...");
        for entry in fs::read_dir(".").context("Cannot read current directory")? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                if file_kind(name).is_some() {
                    println!("  ✓ Found: {}", name);
                    xlsx_files.push(path.clone());
                }
            }
        }
        xlsx_files.sort();
    }

    if xlsx_files.is_empty() {
        println!("❌ No HengHua workbooks found (expected *trade*.xlsx or *cash*.xlsx).");
        return Ok(());
    }

    let output_dir = other_args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let parser = HengHuaParser::new();
    let mut written: Vec<PathBuf> = Vec::new();

    for input in &xlsx_files {
        let name = input
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        println!("📖 Converting HengHua workbook: {}", input.display());

        match file_kind(&name) {
            Some(OutputKind::Trade) => written.extend(parser.convert_trade_file(input, &output_dir)?),
            Some(OutputKind::Cash) => {
                let as_of = date_from_file_name(&name).unwrap_or_else(|| Local::now().date_naive());
                written.push(parser.convert_cash_file(input, &output_dir, as_of)?);
            }
            _ => println!("  ⚠ Skipping {}: unrecognised file name", name),
        }
    }

    println!("\n📊 Summary:");
    println!("✓ Workbooks: {}", xlsx_files.len());
    println!("✓ Output files written: {}", written.len());
    for path in &written {
        println!("  • {}", path.display());
    }
    println!("✅ Done.");

    Ok(())
}

use anyhow::{Context, Result};
use std::{env, fs, path::PathBuf};

use gf_parser::{file_kind, GuangFaParser};
use utils::OutputKind;

fn main() -> Result<()> {
    // Usage:
    //   gf_parser [file1.txt file2.txt ...] [output_dir]
    //
    // If no .txt files are specified, every trddata_/cusfund_/holddata_ file in the
    // current directory is converted
    // Defaults:
    //   output_dir: current directory

    logger::init(models::LogFormat::Pretty);

    let args: Vec<String> = env::args().collect();

    let mut inputs: Vec<PathBuf> = Vec::new();
    let mut other_args: Vec<String> = Vec::new();
    for arg in args.iter().skip(1) {
        if arg.to_lowercase().ends_with(".txt") {
            inputs.push(PathBuf::from(arg));
        } else {
            other_args.push(arg.clone());
        }
    }

    if inputs.is_empty() {
        println!("📂 No input files specified, scanning current directory...");
        for entry in fs::read_dir(".").context("Cannot read current directory")? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                if file_kind(name).is_some() {
                    println!("  ✓ Found: {}", name);
                    inputs.push(path.clone());
                }
            }
        }
        inputs.sort();
    }

    if inputs.is_empty() {
        println!("❌ No GuangFa files found (expected *trddata_f*, *cusfund_f* or *holddata_f*).");
        return Ok(());
    }

    let output_dir = other_args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let parser = GuangFaParser::new();
    let mut written: Vec<PathBuf> = Vec::new();

    for input in &inputs {
        let name = input
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        println!("📖 Converting GuangFa file: {}", input.display());

        match file_kind(&name) {
            Some(OutputKind::Trade) => written.extend(parser.convert_trade_file(input, &output_dir)?),
            Some(OutputKind::Cash) => written.push(parser.convert_cash_file(input, &output_dir)?),
            Some(OutputKind::Position) => {
                written.push(parser.convert_position_file(input, &output_dir)?)
            }
            None => println!("  ⚠ Skipping {}: unrecognised file name", name),
        }
    }

    println!("\n📊 Summary:");
    println!("✓ Input files: {}", inputs.len());
    println!("✓ Output files written: {}", written.len());
    for path in &written {
        println!("  • {}", path.display());
    }
    println!("✅ Done.");

    Ok(())
}

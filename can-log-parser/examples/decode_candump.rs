//! Standalone candump decoder tool
//!
//! Decodes a text CAN log with a J1939 spec (JSON catalog, digital annex or
//! DBC) and prints every decoded signal, followed by the warnings and a short
//! summary.
//!
//! Usage:
//!   decode_candump <log_file> <spec> [--policy ignore|warn|fail] [--json <out.json>] [--csv <out.csv>]
//!   decode_candump <log_file> --config <parser.toml> [--json <out.json>] [--csv <out.csv>]
//!
//! Example:
//!   RUST_LOG=info decode_candump trace.log j1939.json --policy warn

use anyhow::{bail, Context, Result};
use can_log_parser::{load_config, CanParser, ErrorPolicy, ParserConfig, SpecType};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

struct Args {
    log_file: PathBuf,
    spec_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
    policy: ErrorPolicy,
    json_out: Option<PathBuf>,
    csv_out: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut config_file = None;
    let mut policy = ErrorPolicy::Warn;
    let mut json_out = None;
    let mut csv_out = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_file = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--policy" => policy = args.next().context("--policy needs a value")?.parse()?,
            "--json" => json_out = Some(PathBuf::from(args.next().context("--json needs a path")?)),
            "--csv" => csv_out = Some(PathBuf::from(args.next().context("--csv needs a path")?)),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let mut positional = positional.into_iter();
    let Some(log_file) = positional.next() else {
        bail!("usage: decode_candump <log_file> (<spec> | --config <parser.toml>) [--policy <p>] [--json <out>] [--csv <out>]");
    };

    Ok(Args {
        log_file,
        spec_file: positional.next(),
        config_file,
        policy,
        json_out,
        csv_out,
    })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let config = match (&args.config_file, &args.spec_file) {
        (Some(path), _) => load_config(path).with_context(|| format!("Failed to load {:?}", path))?,
        (None, Some(path)) => {
            let spec = fs::read_to_string(path)
                .with_context(|| format!("Failed to read spec file: {:?}", path))?;
            ParserConfig::new()
                .with_error_policy(args.policy)
                .with_spec(SpecType::J1939, spec)
        }
        (None, None) => bail!("either a spec file or --config is required"),
    };

    let parser = CanParser::new(config).context("Failed to build parser")?;
    let output = parser
        .parse_file(&args.log_file)
        .with_context(|| format!("Failed to parse {:?}", args.log_file))?;

    let mut per_message: HashMap<String, usize> = HashMap::new();
    for frame in &output.frames {
        let name = frame
            .message_name
            .clone()
            .unwrap_or_else(|| {
                if frame.extended {
                    format!("PGN {}", frame.pgn)
                } else {
                    format!("ID 0x{:03X}", frame.arbitration_id)
                }
            });
        *per_message.entry(name.clone()).or_default() += 1;

        for signal in &frame.signals {
            println!(
                "{:.6}  SA 0x{:02X}  {:<32} {:<40} {} {}",
                frame.timestamp,
                frame.source_address,
                name,
                signal.name,
                signal.value,
                signal.unit.as_deref().unwrap_or("")
            );
        }
    }

    let warnings = output.all_warnings();
    if !warnings.is_empty() {
        println!("\n=== WARNINGS ===");
        for warning in &warnings {
            println!("  {}", warning);
        }
    }

    let stats = parser.database_stats();
    println!("\n=== SUMMARY ===");
    println!("Spec messages: {} ({} signals, {} skipped)", stats.num_messages, stats.num_signals, stats.skipped_signals);
    println!("Lines read: {}", output.lines_read);
    println!("Frames decoded: {}", output.frames.len());
    println!("Warnings: {}", warnings.len());

    let mut sorted: Vec<_> = per_message.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (name, count) in sorted.iter().take(10) {
        println!("  {}: {} frames", name, count);
    }

    if let Some(path) = &args.json_out {
        output
            .write_json(path)
            .with_context(|| format!("Failed to write {:?}", path))?;
        println!("\nJSON report written to {:?}", path);
    }

    if let Some(path) = &args.csv_out {
        output
            .write_csv(path)
            .with_context(|| format!("Failed to write {:?}", path))?;
        println!("CSV written to {:?}", path);
    }

    Ok(())
}

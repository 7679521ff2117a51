//! rowhouse-unfurl: Flatten nested JSON documents into typed tables
//!
//! Usage:
//!   # Array-wrapped JSON file, tagged rows on stdout
//!   rowhouse-unfurl --config tables.yaml events.json
//!
//!   # NDJSON from stdin, one .jsonl file per table
//!   cat events.jsonl | rowhouse-unfurl -c tables.json --ndjson -o ./tables
//!
//!   # Attach source metadata columns to every row
//!   rowhouse-unfurl -c tables.yaml events.json --source-label s3://bucket/events.json

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::Parser;
use rowhouse::input::{read_source, InputFormat};
use rowhouse::unfurl::{
    EmptyArrayPolicy, ProcessingResult, RunConfig, RunContext, StreamWriter, TableFileWriter, TableSink,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Failures listed individually in the summary
const SHOWN_FAILURES: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "rowhouse-unfurl")]
#[command(about = "Flatten nested JSON documents into typed tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Run configuration (.json, .yaml or .yml)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Process newline-delimited JSON (one document per line)
    #[arg(long)]
    ndjson: bool,

    /// Output directory for one .jsonl file per table
    /// If omitted, writes to stdout as a single stream tagged with `_table`
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// Coerce every field leniently unless the field says otherwise
    #[arg(long)]
    coerce: bool,

    /// Drop rows for empty arrays instead of keeping one null row
    #[arg(long)]
    drop_empty: bool,

    /// Source label added to every row
    #[arg(long)]
    source_label: Option<String>,

    /// Source timestamp (RFC 3339); defaults to the input file's modification time
    #[arg(long, requires = "source_label")]
    source_date: Option<String>,

    /// Process documents on all cores
    #[arg(long)]
    parallel: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = RunConfig::load(&args.config)?;
    if args.coerce {
        config.coerce = true;
    }
    if args.drop_empty {
        config.empty_arrays = EmptyArrayPolicy::DropRow;
    }
    let processor = config
        .build_processor()
        .with_context(|| format!("Invalid configuration: {}", args.config.display()))?;

    let format = if args.ndjson {
        InputFormat::Ndjson
    } else {
        InputFormat::Auto
    };
    let docs = read_source(args.input.as_deref(), format)?;

    let mut ctx = RunContext::new();
    if let Some(label) = &args.source_label {
        let date = source_date(args.source_date.as_deref(), args.input.as_deref())?;
        ctx = ctx.with_source(label.clone(), date);
    }

    let result = if args.parallel {
        processor.process_parallel(&docs, &ctx)
    } else {
        processor.process(&docs, &ctx)
    };

    match &args.output_dir {
        Some(dir) => TableFileWriter::new(dir)?.write_result(&result)?,
        None => StreamWriter::new(std::io::stdout().lock()).write_result(&result)?,
    }

    print_summary(&result);
    Ok(())
}

fn source_date(explicit: Option<&str>, input: Option<&Path>) -> Result<NaiveDateTime> {
    if let Some(text) = explicit {
        let parsed = DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.naive_utc())
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
            .with_context(|| format!("Invalid --source-date: {}", text))?;
        return Ok(parsed);
    }

    match input {
        Some(path) => {
            let modified = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .with_context(|| format!("Failed to read modification time: {}", path.display()))?;
            Ok(DateTime::<Utc>::from(modified).naive_utc())
        }
        None => Ok(Utc::now().naive_utc()),
    }
}

fn print_summary(result: &ProcessingResult) {
    let stats = &result.stats;
    eprintln!(
        "Documents: {} processed, {} unrouted, {} failed, {} unprocessed",
        stats.processed, stats.unrouted, stats.failed, stats.unprocessed
    );

    for table in result.tables.values() {
        eprintln!(
            "  {}: {} rows from {} documents ({} values coerced to null)",
            table.name, table.stats.rows, table.stats.documents, table.stats.null_coerced
        );
    }

    for (value, count) in &result.unrouted_values {
        eprintln!("  unrouted \"{}\": {} documents", value, count);
    }

    for failure in result.failures.iter().take(SHOWN_FAILURES) {
        eprintln!(
            "  document {} ({}): {} at {}",
            failure.index,
            failure.discriminator,
            failure.error,
            failure.path.as_deref().unwrap_or("-")
        );
    }
    if result.failures.len() > SHOWN_FAILURES {
        eprintln!("  ... {} more failures", result.failures.len() - SHOWN_FAILURES);
    }
}

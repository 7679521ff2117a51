//! rowhouse-discover: Find the field that separates document shapes
//!
//! Usage:
//!   # Human-readable report
//!   rowhouse-discover events.json
//!
//!   # Ranked candidates as JSON
//!   rowhouse-discover --ndjson events.jsonl --format candidates
//!
//!   # Draft a table configuration for the best (or a chosen) splitter
//!   rowhouse-discover events.json --format config --splitter header.action

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rowhouse::discover::{
    draft_table_configs, ExactMatchSimilarity, JaccardPathSimilarity, SplitterOptions, StructureAnalyzer,
    WeightedJaccardSimilarity,
};
use rowhouse::input::{read_source, InputFormat};
use rowhouse::unfurl::PathExpression;
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Text summary for people
    Report,
    /// Ranked splitter candidates as JSON
    Candidates,
    /// Draft table configuration as JSON
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Similarity {
    Jaccard,
    Weighted,
    Exact,
}

#[derive(Parser, Debug)]
#[command(name = "rowhouse-discover")]
#[command(about = "Find splitter fields and draft table configurations", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Process newline-delimited JSON (one document per line)
    #[arg(long)]
    ndjson: bool,

    /// What to print
    #[arg(long, value_enum, default_value = "report")]
    format: OutputFormat,

    /// Splitter to structure by instead of the best candidate
    #[arg(long)]
    splitter: Option<String>,

    /// Number of candidates to show in the report
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Only analyze the first N documents
    #[arg(long)]
    sample_size: Option<usize>,

    /// Path-set similarity used for scoring
    #[arg(long, value_enum, default_value = "jaccard")]
    similarity: Similarity,

    /// Skip fields with more distinct values than this
    #[arg(long)]
    max_cardinality: Option<usize>,

    /// Minimum fraction of documents a field must appear in
    #[arg(long)]
    min_coverage: Option<f64>,

    /// Maximum number of keys in a candidate path
    #[arg(long)]
    max_depth: Option<usize>,

    /// Compact output (no pretty-printing)
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let format = if args.ndjson {
        InputFormat::Ndjson
    } else {
        InputFormat::Auto
    };
    let mut docs = read_source(args.input.as_deref(), format)?;
    if let Some(n) = args.sample_size {
        docs.truncate(n);
    }

    let mut options = SplitterOptions::default();
    if let Some(max) = args.max_cardinality {
        options.max_cardinality = max;
    }
    if let Some(min) = args.min_coverage {
        options.min_coverage = min;
    }
    if let Some(depth) = args.max_depth {
        options.max_depth = depth;
    }

    let analyzer = StructureAnalyzer::new().with_options(options);
    let analyzer = match args.similarity {
        Similarity::Jaccard => analyzer.with_similarity(JaccardPathSimilarity),
        Similarity::Weighted => analyzer.with_similarity(WeightedJaccardSimilarity::default()),
        Similarity::Exact => analyzer.with_similarity(ExactMatchSimilarity),
    };

    let splitter = args
        .splitter
        .as_deref()
        .map(PathExpression::parse)
        .transpose()
        .context("Invalid --splitter")?;

    match args.format {
        OutputFormat::Report => {
            println!("{}", analyzer.describe(&docs, splitter.as_ref(), args.top));
        }
        OutputFormat::Candidates => {
            let candidates = analyzer.find_splitters(&docs);
            print_json(&serde_json::to_value(&candidates)?, args.compact)?;
        }
        OutputFormat::Config => {
            let splitter = match splitter {
                Some(s) => s,
                None => match analyzer.find_splitters(&docs).into_iter().next() {
                    Some(best) => best.field,
                    None => bail!("No candidate splitters found; pass --splitter"),
                },
            };
            let tables = draft_table_configs(&docs, &splitter)?;
            let config = json!({
                "split_path": splitter.to_string(),
                "tables": tables.to_value(),
            });
            print_json(&config, args.compact)?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", text);
    Ok(())
}

//! Board Signal Scout CLI
//!
//! - `scout chunk`: split extracted meeting text into chunks
//! - `scout evaluate`: classify, verify and score chunks into an evaluation log
//! - `scout export`: turn the evaluation log into `signals.json` and `top_signals.md`

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

mod evaluate;
mod logging;

use scout_ingest::{Artifact, ChunkParams, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use scout_storage::export::DEFAULT_TOP;

#[derive(Parser)]
#[command(name = "scout")]
#[command(
    author,
    version,
    about = "Board Signal Scout: buying signals from school board meeting documents"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk one extracted text file and append the chunks to a JSON lines file.
    Chunk(ChunkArgs),

    /// Evaluate chunks and append one record per chunk to the evaluation log.
    ///
    /// Chunks already in the log are skipped unless `--reprocess` is given.
    /// Ctrl-C stops new work; chunks in flight are finished and logged.
    Evaluate(EvaluateArgs),

    /// Export kept signals from the evaluation log.
    Export {
        /// Evaluation log to read.
        #[arg(long, default_value = "data/evaluations.jsonl")]
        evaluations: PathBuf,

        /// Directory for signals.json and top_signals.md.
        #[arg(long, default_value = "outputs")]
        out_dir: PathBuf,

        /// Signals listed in top_signals.md.
        #[arg(long, default_value_t = DEFAULT_TOP)]
        top: usize,
    },
}

#[derive(Args)]
struct ChunkArgs {
    /// Extracted text of one document.
    #[arg(long)]
    text: PathBuf,

    #[arg(long)]
    district: String,

    /// URL the document was fetched from.
    #[arg(long)]
    source_url: String,

    #[arg(long, default_value = "")]
    board_page_url: String,

    /// Meeting date; inferred from the text when omitted.
    #[arg(long)]
    meeting_date: Option<String>,

    #[arg(long, default_value = "data/chunks.jsonl")]
    out: PathBuf,

    /// Words per chunk.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Words shared by consecutive chunks.
    #[arg(long, default_value_t = DEFAULT_OVERLAP)]
    overlap: usize,
}

#[derive(Args)]
pub(crate) struct EvaluateArgs {
    #[arg(long, default_value = "data/chunks.jsonl")]
    pub chunks: PathBuf,

    #[arg(long, default_value = "data/evaluations.jsonl")]
    pub out: PathBuf,

    /// Evaluate at most this many chunks.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Discard the existing log and evaluate everything again.
    #[arg(long)]
    pub reprocess: bool,

    /// Chunks evaluated at once (default from SCOUT_CONCURRENCY or 4).
    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long)]
    pub confidence_threshold: Option<f64>,

    #[arg(long)]
    pub score_threshold: Option<u8>,

    /// Per-call timeout for the language model.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long, value_enum, default_value_t = ScorerKind::Heuristic)]
    pub scorer: ScorerKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum ScorerKind {
    /// Deterministic weighted sum.
    Heuristic,
    /// Ask the language model.
    Llm,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Chunk(args) => cmd_chunk(&args),
        Commands::Evaluate(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting async runtime")?;
            runtime.block_on(evaluate::run(args))
        }
        Commands::Export {
            evaluations,
            out_dir,
            top,
        } => cmd_export(&evaluations, &out_dir, top),
    }
}

fn cmd_chunk(args: &ChunkArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.text)
        .with_context(|| format!("reading {}", args.text.display()))?;

    let mut artifact = Artifact::new(&args.district, &args.source_url).with_board_page(&args.board_page_url);
    if let Some(date) = &args.meeting_date {
        artifact = artifact.with_meeting_date(date);
    }

    let params = ChunkParams {
        chunk_size: args.chunk_size,
        overlap: args.overlap,
    };
    let chunks = scout_ingest::build_chunks(&artifact, &text, params)?;
    if chunks.is_empty() {
        eprintln!(
            "{} {} has too little text to chunk",
            "skipped".yellow().bold(),
            args.text.display()
        );
        return Ok(());
    }

    scout_ingest::append_chunks(&args.out, &chunks)?;
    eprintln!(
        "{} {} chunks for {} → {}",
        "wrote".green().bold(),
        chunks.len(),
        artifact.artifact_id,
        args.out.display().to_string().bold()
    );
    Ok(())
}

fn cmd_export(evaluations: &std::path::Path, out_dir: &std::path::Path, top: usize) -> Result<()> {
    println!("{} {}", "Exporting".green().bold(), evaluations.display());
    let summary = scout_storage::export::run(evaluations, out_dir, top)?;

    if summary.unique == 0 {
        println!("{}", "No signals to export.".yellow());
    } else {
        println!(
            "  {} records, {} kept, {} unique",
            summary.records, summary.kept, summary.unique
        );
    }
    println!("{} {}", "wrote".green().bold(), summary.json_path.display());
    println!("{} {}", "wrote".green().bold(), summary.markdown_path.display());
    Ok(())
}

//! ntupler CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nt_core::TruthLevel;
use nt_match::key_index::report_path;
use nt_match::{KeyIndex, MatchConfig, OutputTarget, Pipeline, SumWeights};
use nt_store::{EventStore, EventTable, KeyFields, read_parquet_chain};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ntupler")]
#[command(about = "ntupler - match reconstructed ttbar events to their truth record")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join reco rows with truth rows and fill unfolding corrections
    Match {
        /// Reco inputs (Parquet files, or `.txt` lists of files)
        #[arg(long, num_args = 1.., required = true)]
        reco: Vec<PathBuf>,

        /// Parton-level truth inputs
        #[arg(long, num_args = 1..)]
        parton: Vec<PathBuf>,

        /// Particle-level truth inputs
        #[arg(long, num_args = 1..)]
        particle: Vec<PathBuf>,

        /// `sumWeights` inputs used to normalize event weights
        #[arg(long, num_args = 1..)]
        sumweights: Vec<PathBuf>,

        /// Matching configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        outdir: PathBuf,

        /// Output file prefix
        #[arg(short, long, default_value = "ntuple")]
        name: String,

        /// Scan at most this many rows of each stream (reco and truth) per pass
        #[arg(long)]
        max_rows: Option<usize>,

        /// Exclude duplicated keys on both sides
        #[arg(long)]
        check_duplicate: bool,

        /// Write duplicated keys next to this path
        #[arg(long)]
        duplicate_report: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Build a key index and report duplicated keys
    Index {
        /// Inputs (Parquet files, or `.txt` lists of files)
        #[arg(long, num_args = 1.., required = true)]
        input: Vec<PathBuf>,

        /// Stream name used in logs and report file names
        #[arg(long, default_value = "input")]
        stream: String,

        /// Run number field
        #[arg(long, default_value = "runNumber")]
        run_field: String,

        /// Event number field
        #[arg(long, default_value = "eventNumber")]
        event_field: String,

        /// Write duplicated keys next to this path
        #[arg(long)]
        duplicate_report: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Match {
            reco,
            parton,
            particle,
            sumweights,
            config,
            outdir,
            name,
            max_rows,
            check_duplicate,
            duplicate_report,
            threads,
        } => {
            let inputs = MatchInputs { reco, parton, particle, sumweights };
            let overrides = Overrides { max_rows, check_duplicate, duplicate_report };
            cmd_match(&inputs, config.as_deref(), &overrides, outdir, name, threads)
        }
        Commands::Index { input, stream, run_field, event_field, duplicate_report } => {
            cmd_index(&input, &stream, &run_field, &event_field, duplicate_report.as_deref())
        }
    }
}

struct MatchInputs {
    reco: Vec<PathBuf>,
    parton: Vec<PathBuf>,
    particle: Vec<PathBuf>,
    sumweights: Vec<PathBuf>,
}

struct Overrides {
    max_rows: Option<usize>,
    check_duplicate: bool,
    duplicate_report: Option<PathBuf>,
}

fn load_config(path: Option<&Path>, inputs: &MatchInputs, o: &Overrides) -> Result<MatchConfig> {
    let mut cfg = match path {
        Some(p) => {
            tracing::info!(path = %p.display(), "loading config");
            MatchConfig::load(p).with_context(|| format!("config {}", p.display()))?
        }
        None => MatchConfig {
            truth_levels: [(TruthLevel::Parton, &inputs.parton), (TruthLevel::Particle, &inputs.particle)]
                .into_iter()
                .filter(|(_, files)| !files.is_empty())
                .map(|(level, _)| level)
                .collect(),
            ..MatchConfig::default()
        },
    };
    if o.max_rows.is_some() {
        cfg.max_rows = o.max_rows;
    }
    if o.check_duplicate {
        cfg.check_duplicate = true;
    }
    if o.duplicate_report.is_some() {
        cfg.duplicate_report = o.duplicate_report.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn cmd_match(
    inputs: &MatchInputs,
    config: Option<&Path>,
    overrides: &Overrides,
    outdir: PathBuf,
    name: String,
    threads: usize,
) -> Result<()> {
    if inputs.parton.is_empty() && inputs.particle.is_empty() {
        anyhow::bail!("at least one of --parton or --particle is required");
    }
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
    let cfg = load_config(config, inputs, overrides)?;

    let reco = open_stream("reco", &inputs.reco)?;
    let parton = open_optional("parton", &inputs.parton)?;
    let particle = open_optional("particle", &inputs.particle)?;

    let mut pipeline = Pipeline::new(&cfg, &reco);
    if let Some(t) = &parton {
        pipeline = pipeline.with_truth(TruthLevel::Parton, t);
    }
    if let Some(t) = &particle {
        pipeline = pipeline.with_truth(TruthLevel::Particle, t);
    }
    if let Some(sw) = open_optional("sumWeights", &inputs.sumweights)? {
        pipeline = pipeline.with_sum_weights(SumWeights::from_store(&sw)?);
    }

    let target = OutputTarget::Parquet { dir: outdir, name };
    let reports = pipeline.run(&target)?;
    let failed: Vec<_> = reports.iter().filter(|r| r.result.is_err()).map(|r| r.level.name()).collect();
    if !failed.is_empty() {
        anyhow::bail!("pass failed: {}", failed.join(", "));
    }
    if reports.iter().any(|r| r.result.as_ref().is_ok_and(|res| res.summary.cancelled)) {
        tracing::warn!("run was cancelled, outputs are partial");
    }
    Ok(())
}

fn cmd_index(
    input: &[PathBuf],
    stream: &str,
    run_field: &str,
    event_field: &str,
    duplicate_report: Option<&Path>,
) -> Result<()> {
    let table = open_stream(stream, input)?;
    let keys = KeyFields::resolve(table.schema(), run_field, event_field)?;
    let index = KeyIndex::build(&table, keys, true)?;
    let path = duplicate_report.map(|p| report_path(p, stream));
    index.report(path.as_deref())?;
    println!(
        "{stream}: {} rows, {} unique keys, {} duplicated keys",
        table.n_rows(),
        index.len(),
        index.duplicates().len()
    );
    Ok(())
}

fn open_stream(name: &str, inputs: &[PathBuf]) -> Result<EventTable> {
    let files = expand_inputs(inputs)?;
    if files.is_empty() {
        anyhow::bail!("no input files for {name}");
    }
    read_parquet_chain(name, &files).with_context(|| format!("reading {name}"))
}

fn open_optional(name: &str, inputs: &[PathBuf]) -> Result<Option<EventTable>> {
    if inputs.is_empty() { Ok(None) } else { open_stream(name, inputs).map(Some) }
}

/// Expand `.txt` file lists (one path per line, `#` comments) recursively.
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for p in inputs {
        expand_into(p, &mut out, 0)?;
    }
    Ok(out)
}

fn expand_into(path: &Path, out: &mut Vec<PathBuf>, depth: usize) -> Result<()> {
    if depth > 16 {
        anyhow::bail!("file lists nested too deeply at {}", path.display());
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading file list {}", path.display()))?;
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            for line in text.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let entry = Path::new(line);
                let entry = if entry.is_absolute() { entry.to_path_buf() } else { base.join(entry) };
                expand_into(&entry, out, depth + 1)?;
            }
        }
        Some("parquet") => out.push(path.to_path_buf()),
        _ => tracing::warn!(path = %path.display(), "unrecognized input extension, skipped"),
    }
    Ok(())
}

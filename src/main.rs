// src/main.rs
//
// =============================================================================
// FLOWBRIDGE: COMMANDER & ENTRY POINT
// =============================================================================
//
// The CLI surface over the conversion core.
//
// Modes:
// 1. CONVERT:  one descriptor in, one descriptor out.
// 2. VALIDATE: parse + structural checks, no output.
// 3. DETECT:   report which platform some bytes look like.
// 4. BATCH:    convert a directory on a worker pool.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use flowbridge::batch::{BatchDriver, BatchJob};
use flowbridge::convert::{ConversionService, IdPolicy};
use flowbridge::error::Warning;
use flowbridge::platforms::Platform;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "flowbridge",
    version,
    about = "Agent workflow converter (iFlytek Spark <-> Dify / Coze)"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one workflow descriptor.
    Convert {
        /// Input descriptor (.yml/.yaml, or .zip for Coze).
        input: PathBuf,

        /// Output path. Defaults to "<input stem>.<target>.yml".
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Source platform; auto-detected when omitted.
        #[arg(long)]
        from: Option<Platform>,

        /// Target platform.
        #[arg(long)]
        to: Platform,

        /// Seed generator randomness for reproducible output.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Parse and structurally validate a descriptor.
    Validate {
        input: PathBuf,

        /// Source platform; auto-detected when omitted.
        #[arg(long)]
        from: Option<Platform>,
    },

    /// Report the detected source platform.
    Detect { input: PathBuf },

    /// Convert every descriptor in a directory.
    Batch {
        /// Directory holding input descriptors.
        dir: PathBuf,

        /// Target platform.
        #[arg(long)]
        to: Platform,

        /// Output directory (created if missing).
        #[arg(long, default_value = "converted")]
        out_dir: PathBuf,

        /// Worker count; defaults to CPU count, capped at 16.
        #[arg(long)]
        workers: Option<usize>,
    },
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            output,
            from,
            to,
            seed,
        } => run_convert(input, output, from, to, seed),
        Commands::Validate { input, from } => run_validate(input, from),
        Commands::Detect { input } => run_detect(input),
        Commands::Batch {
            dir,
            to,
            out_dir,
            workers,
        } => run_batch(dir, to, out_dir, workers).await,
    }
}

// ============================================================================
// 3. SINGLE-FILE MODES
// ============================================================================

fn run_convert(
    input: PathBuf,
    output: Option<PathBuf>,
    from: Option<Platform>,
    to: Platform,
    seed: Option<u64>,
) -> Result<()> {
    let bytes = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;

    let mut service = ConversionService::new();
    if let Some(seed) = seed {
        service = service.with_id_policy(IdPolicy::Seeded(seed));
    }

    let outcome = match from {
        Some(from) => service.convert(&bytes, from, to),
        None => service.convert_detected(&bytes, to),
    }
    .map_err(|e| anyhow!("[{}] {e}", e.code()))?;

    let output = output.unwrap_or_else(|| default_output(&input, to));
    fs::write(&output, &outcome.bytes)
        .with_context(|| format!("writing {}", output.display()))?;

    log::info!("💾 wrote {}", output.display());
    report_warnings(&outcome.warnings);
    Ok(())
}

fn run_validate(input: PathBuf, from: Option<Platform>) -> Result<()> {
    let bytes = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
    let from = from.unwrap_or_else(|| flowbridge::detect_platform(&bytes));

    let service = ConversionService::new();
    let warnings = service
        .validate(&bytes, from)
        .map_err(|e| anyhow!("[{}] {e}", e.code()))?;

    log::info!("✅ {} is a structurally valid {from} workflow", input.display());
    report_warnings(&warnings);
    Ok(())
}

fn run_detect(input: PathBuf) -> Result<()> {
    let bytes = fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
    println!("{}", flowbridge::detect_platform(&bytes));
    Ok(())
}

// ============================================================================
// 4. BATCH MODE
// ============================================================================

async fn run_batch(
    dir: PathBuf,
    to: Platform,
    out_dir: PathBuf,
    workers: Option<usize>,
) -> Result<()> {
    let mut jobs = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_descriptor = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e, "yml" | "yaml" | "zip"))
            .unwrap_or(false);
        if !is_descriptor {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("descriptor")
            .to_string();
        jobs.push(BatchJob {
            name,
            bytes: fs::read(&path)?,
            from: None,
            to,
        });
    }
    if jobs.is_empty() {
        return Err(anyhow!("no .yml/.yaml/.zip descriptors in {}", dir.display()));
    }

    fs::create_dir_all(&out_dir)?;

    let mut driver = BatchDriver::new();
    if let Some(w) = workers {
        driver = driver.with_workers(w);
    }

    // Ctrl-c stops pulling new jobs; in-flight conversions finish and are
    // discarded.
    let cancel = driver.cancel_flag();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        log::warn!("🛑 interrupt received, cancelling batch");
        cancel.store(true, Ordering::SeqCst);
    });

    let service = Arc::new(ConversionService::new());
    let results = driver.run(service, jobs).await;

    let mut failed = 0usize;
    for result in &results {
        match &result.outcome {
            Ok(outcome) => {
                let target = out_dir.join(format!(
                    "{}.{to}.yml",
                    Path::new(&result.name)
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("workflow")
                ));
                fs::write(&target, &outcome.bytes)?;
            }
            Err(_) => failed += 1,
        }
    }

    log::info!(
        "🏁 batch finished: {} ok, {} failed",
        results.len() - failed,
        failed
    );
    if failed > 0 {
        return Err(anyhow!("{failed} conversion(s) failed"));
    }
    Ok(())
}

// ============================================================================
// 5. HELPERS
// ============================================================================

fn default_output(input: &Path, to: Platform) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow");
    input.with_file_name(format!("{stem}.{to}.yml"))
}

fn report_warnings(warnings: &[Warning]) {
    for w in warnings {
        match &w.node_id {
            Some(node) => log::warn!("⚠️  [{}] {} (node {})", w.code, w.message, node),
            None => log::warn!("⚠️  [{}] {}", w.code, w.message),
        }
    }
}

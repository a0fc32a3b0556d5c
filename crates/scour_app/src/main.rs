//! Scour - content disarm and reconstruction for office documents, PDFs and images.
//!
//! Every input is taken apart, its pictures re-encoded from raw pixels, and a fresh
//! file of the same family written from what survived.

mod batch;
mod config;
mod journal;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use scour_core::Sanitizer;
use tracing_subscriber::EnvFilter;

use batch::{BatchOptions, print_report, print_summary, run_batch};
use config::AppConfig;
use journal::Journal;

#[derive(Parser, Debug)]
#[command(name = "scour")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to sanitize; repeat for several files
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Remove each source file after it was sanitized
    #[arg(short = 'r', long = "remove", default_value_t = false)]
    remove: bool,

    /// Run every file of the samples directory and report the outcomes
    #[arg(long, default_value_t = false)]
    test: bool,

    /// Output directory [default: Outputs]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Audit journal [default: san_results.json]
    #[arg(long)]
    journal: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads (0 = one per CPU)
    #[arg(short, long)]
    jobs: Option<usize>,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(output) = args.output {
        config.sanitizer.output_dir = output;
    }
    if let Some(journal) = args.journal {
        config.journal_path = journal;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }

    let sanitizer = Arc::new(Sanitizer::new(config.sanitizer.clone()));

    if args.test {
        return run_self_test(&config, sanitizer, running);
    }

    if args.files.is_empty() {
        anyhow::bail!("No input files. Pass one or more with -f FILE, or run --test.");
    }

    let journal = Arc::new(Journal::new(&config.journal_path));
    let single = args.files.len() == 1;
    let options = BatchOptions {
        remove_source: args.remove,
        workers: config.workers(args.files.len()),
        show_progress: !single,
    };
    tracing::debug!(files = args.files.len(), workers = options.workers, "starting");

    let (reports, summary) = run_batch(sanitizer, args.files, Some(journal), options, running);
    for report in &reports {
        print_report(report);
    }
    if !single {
        print_summary(&summary, &config.sanitizer.output_dir);
    }

    if single && summary.sanitized == 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Sanitizes every sample without journaling or removing anything.
fn run_self_test(
    config: &AppConfig,
    sanitizer: Arc<Sanitizer>,
    running: Arc<AtomicBool>,
) -> Result<ExitCode> {
    println!("Self-test started on [{}]", Local::now().format("%d/%m/%Y-%H:%M:%S"));

    let samples = list_samples(&config.samples_dir)?;
    if samples.is_empty() {
        anyhow::bail!("No samples found in {}", config.samples_dir.display());
    }

    let options = BatchOptions {
        remove_source: false,
        workers: config.workers(samples.len()),
        show_progress: true,
    };
    let (reports, summary) = run_batch(sanitizer, samples, None, options, running);
    for report in &reports {
        print_report(report);
    }
    print_summary(&summary, &config.sanitizer.output_dir);

    println!("Self-test ended on [{}]", Local::now().format("%d/%m/%Y-%H:%M:%S"));
    Ok(if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn list_samples(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read samples directory: {}", dir.display()))?;
    let mut samples = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .path();
        if path.is_file() {
            samples.push(path);
        }
    }
    samples.sort();
    Ok(samples)
}

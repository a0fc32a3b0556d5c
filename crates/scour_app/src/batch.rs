//! Worker pool running many files through the sanitizer, one file per worker at a time.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use humansize::{BINARY, format_size};
use indicatif::{ProgressBar, ProgressStyle};
use scour_core::{FileType, Outcome, Phase, Sanitizer, identify_path};

use crate::journal::{Journal, JournalEntry};

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Delete each source once its clean copy is written.
    pub remove_source: bool,
    pub workers: usize,
    pub show_progress: bool,
}

#[derive(Debug)]
pub enum FileStatus {
    Sanitized(Outcome),
    Failed { phase: Phase, error: String },
    /// Never attempted because the batch was interrupted.
    Skipped,
}

#[derive(Debug)]
pub struct FileReport {
    pub source: PathBuf,
    pub file_type: FileType,
    pub status: FileStatus,
    pub journal_error: Option<String>,
}

impl FileReport {
    pub fn is_sanitized(&self) -> bool {
        matches!(self.status, FileStatus::Sanitized(_))
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub sanitized: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warnings: usize,
    pub journal_errors: usize,
    pub bytes_written: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn from_reports(reports: &[FileReport], elapsed: Duration, cancelled: bool) -> Self {
        let mut summary = Self {
            elapsed,
            cancelled,
            ..Self::default()
        };
        for report in reports {
            match &report.status {
                FileStatus::Sanitized(outcome) => {
                    summary.processed += 1;
                    summary.sanitized += 1;
                    summary.warnings += outcome.warnings.len();
                    summary.bytes_written += outcome.bytes_written;
                }
                FileStatus::Failed { .. } => {
                    summary.processed += 1;
                    summary.failed += 1;
                }
                FileStatus::Skipped => summary.skipped += 1,
            }
            if report.journal_error.is_some() {
                summary.journal_errors += 1;
            }
        }
        summary
    }
}

/// Runs `files` on `options.workers` threads. Reports come back in input order.
pub fn run_batch(
    sanitizer: Arc<Sanitizer>,
    files: Vec<PathBuf>,
    journal: Option<Arc<Journal>>,
    options: BatchOptions,
    running: Arc<AtomicBool>,
) -> (Vec<FileReport>, BatchSummary) {
    let start_time = Instant::now();
    let total = files.len();

    let pb = if options.show_progress {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let (job_tx, job_rx): (Sender<(usize, PathBuf)>, Receiver<(usize, PathBuf)>) = unbounded();
    let (result_tx, result_rx): (Sender<(usize, FileReport)>, Receiver<(usize, FileReport)>) =
        unbounded();
    for job in files.iter().cloned().enumerate() {
        // The receiver is alive until the workers below exit.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let workers = options.workers.clamp(1, total.max(1));
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let rx = job_rx.clone();
        let tx = result_tx.clone();
        let sanitizer = Arc::clone(&sanitizer);
        let journal = journal.clone();
        let running = Arc::clone(&running);

        handles.push(thread::spawn(move || {
            worker_thread(worker_id, &sanitizer, journal.as_deref(), options, rx, tx, &running);
        }));
    }
    drop(job_rx);
    drop(result_tx);

    let mut slots: Vec<Option<FileReport>> = (0..total).map(|_| None).collect();
    for (index, report) in result_rx {
        let name = report
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        pb.set_message(name);
        pb.inc(1);
        slots[index] = Some(report);
    }

    for (i, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            tracing::error!(worker = i, "worker thread panicked");
        }
    }
    pb.finish_and_clear();

    let cancelled = !running.load(Ordering::SeqCst);
    let reports: Vec<FileReport> = slots
        .into_iter()
        .zip(files)
        .map(|(slot, source)| {
            slot.unwrap_or_else(|| FileReport {
                file_type: FileType::Unknown,
                source,
                status: FileStatus::Skipped,
                journal_error: None,
            })
        })
        .collect();
    let summary = BatchSummary::from_reports(&reports, start_time.elapsed(), cancelled);
    (reports, summary)
}

fn worker_thread(
    worker_id: usize,
    sanitizer: &Sanitizer,
    journal: Option<&Journal>,
    options: BatchOptions,
    rx: Receiver<(usize, PathBuf)>,
    tx: Sender<(usize, FileReport)>,
    running: &AtomicBool,
) {
    for (index, path) in rx {
        if !running.load(Ordering::SeqCst) {
            tracing::debug!(worker = worker_id, "stopping on interrupt");
            break;
        }
        let report = process_file(sanitizer, journal, options, &path);
        if tx.send((index, report)).is_err() {
            break;
        }
    }
}

/// Sanitizes one file, journals the result and removes the source when asked to.
pub fn process_file(
    sanitizer: &Sanitizer,
    journal: Option<&Journal>,
    options: BatchOptions,
    path: &Path,
) -> FileReport {
    let file_type = identify_path(path);
    let status = match sanitizer.process_as(path, file_type) {
        Ok(outcome) => FileStatus::Sanitized(outcome),
        Err(e) => {
            tracing::error!(file = %path.display(), phase = %e.phase(), "{e}");
            FileStatus::Failed {
                phase: e.phase(),
                error: e.to_string(),
            }
        }
    };

    let output = match &status {
        FileStatus::Sanitized(outcome) => Some(outcome.output.as_path()),
        _ => None,
    };
    let journal_error = journal.and_then(|journal| {
        let entry = JournalEntry::new(path, file_type, output);
        journal.record(entry).err().map(|e| {
            tracing::error!(file = %path.display(), "{e}");
            e.to_string()
        })
    });

    if options.remove_source && output.is_some() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(file = %path.display(), error = %e, "could not remove source");
        }
    }

    FileReport {
        source: path.to_path_buf(),
        file_type,
        status,
        journal_error,
    }
}

pub fn print_report(report: &FileReport) {
    let name = report.source.display();
    match &report.status {
        FileStatus::Sanitized(outcome) => {
            println!(
                "  OK    {name} ({}) -> {} [{} blocks, {} images, {} warnings]",
                report.file_type,
                outcome.output.display(),
                outcome.blocks,
                outcome.images,
                outcome.warnings.len()
            );
            for warning in &outcome.warnings {
                println!("          - {warning}");
            }
        }
        FileStatus::Failed { phase, error } => {
            println!("  FAIL  {name} ({}) at {phase}: {error}", report.file_type);
        }
        FileStatus::Skipped => println!("  SKIP  {name}"),
    }
    if let Some(error) = &report.journal_error {
        println!("          journal: {error}");
    }
}

pub fn print_summary(summary: &BatchSummary, output_dir: &Path) {
    println!("\n╔════════════════════════════════════════╗");
    if summary.cancelled {
        println!("║     === Sanitizing Interrupted ===     ║");
    } else {
        println!("║       === Sanitizing Finished ===      ║");
    }
    println!("╠════════════════════════════════════════╣");
    println!(
        "║ Elapsed Time:       {:>18} ║",
        format!("{:.1}s", summary.elapsed.as_secs_f64())
    );
    println!("║ Processed:          {:>18} ║", summary.processed);
    println!("║ Sanitized:          {:>18} ║", summary.sanitized);
    println!("║ Failed:             {:>18} ║", summary.failed);
    if summary.skipped > 0 {
        println!("║ Skipped:            {:>18} ║", summary.skipped);
    }
    println!("║ Warnings:           {:>18} ║", summary.warnings);
    if summary.journal_errors > 0 {
        println!("║ Journal Errors:     {:>18} ║", summary.journal_errors);
    }
    println!(
        "║ Written:            {:>18} ║",
        format_size(summary.bytes_written, BINARY)
    );
    println!("╠════════════════════════════════════════╣");
    println!("║ Files saved to:     {:<18} ║", output_dir.display());
    println!("╚════════════════════════════════════════╝");
}

#[cfg(test)]
mod tests {
    use super::*;
    use scour_core::SanitizerConfig;
    use scour_core::document::{Block, IntermediateDocument, Layout};
    use scour_core::formats::word;

    fn docx_bytes(text: &str) -> Vec<u8> {
        let document = IntermediateDocument {
            blocks: vec![Block::Text(text.into())],
            images: Vec::new(),
        };
        word::write(&Layout::default(), &document).unwrap().bytes
    }

    fn setup(dir: &Path) -> (Arc<Sanitizer>, Arc<Journal>) {
        let sanitizer = Sanitizer::new(SanitizerConfig::new(dir.join("Outputs")));
        (Arc::new(sanitizer), Arc::new(Journal::new(dir.join("san_results.json"))))
    }

    #[test]
    fn batch_keeps_input_order_and_journals_everything() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("memo.docx");
        let bad = dir.path().join("notes.txt");
        fs::write(&good, docx_bytes("hello")).unwrap();
        fs::write(&bad, b"plain text").unwrap();
        let (sanitizer, journal) = setup(dir.path());

        let options = BatchOptions {
            workers: 2,
            ..BatchOptions::default()
        };
        let (reports, summary) = run_batch(
            sanitizer,
            vec![good.clone(), bad.clone()],
            Some(Arc::clone(&journal)),
            options,
            Arc::new(AtomicBool::new(true)),
        );

        assert_eq!(reports[0].source, good);
        assert!(reports[0].is_sanitized());
        assert!(matches!(
            reports[1].status,
            FileStatus::Failed { phase: Phase::Identify, .. }
        ));
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.sanitized, 1);
        assert_eq!(summary.failed, 1);

        let mut entries = journal.entries().unwrap();
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_name, "memo.docx");
        assert!(entries[0].sanitized);
        assert_eq!(entries[0].hash.as_ref().map(String::len), Some(64));
        assert_eq!(entries[1].file_name, "notes.txt");
        assert!(!entries[1].sanitized);
        assert_eq!(entries[1].file_type, "unknown");
        assert!(entries[1].hash.is_none());
    }

    #[test]
    fn remove_source_only_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("memo.docx");
        let bad = dir.path().join("junk.bin");
        fs::write(&good, docx_bytes("hello")).unwrap();
        fs::write(&bad, b"\x00\x01\x02\x03").unwrap();
        let (sanitizer, _) = setup(dir.path());
        let options = BatchOptions {
            remove_source: true,
            workers: 1,
            show_progress: false,
        };

        let report = process_file(&sanitizer, None, options, &good);
        assert!(report.is_sanitized());
        assert!(!good.exists());

        let report = process_file(&sanitizer, None, options, &bad);
        assert!(!report.is_sanitized());
        assert!(bad.exists());
    }

    #[test]
    fn parallel_workers_never_share_an_output() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = ["a", "b", "c"]
            .iter()
            .map(|sub| {
                let folder = dir.path().join(sub);
                fs::create_dir_all(&folder).unwrap();
                let file = folder.join("memo.docx");
                fs::write(&file, docx_bytes(sub)).unwrap();
                file
            })
            .collect();
        let (sanitizer, _) = setup(dir.path());

        let (reports, summary) = run_batch(
            sanitizer,
            files,
            None,
            BatchOptions {
                workers: 3,
                ..BatchOptions::default()
            },
            Arc::new(AtomicBool::new(true)),
        );
        assert_eq!(summary.sanitized, 3);
        let mut outputs: Vec<String> = reports
            .iter()
            .filter_map(|r| match &r.status {
                FileStatus::Sanitized(outcome) => outcome.output.file_name(),
                _ => None,
            })
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        outputs.sort();
        assert_eq!(outputs, ["out_memo.docx", "out_memo_2.docx", "out_memo_3.docx"]);
        assert_eq!(fs::read_dir(dir.path().join("Outputs")).unwrap().count(), 3);
    }

    #[test]
    fn interrupted_batch_skips_remaining_files() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("{i}.docx"))).collect();
        for file in &files {
            fs::write(file, docx_bytes("x")).unwrap();
        }
        let (sanitizer, _) = setup(dir.path());

        let (reports, summary) = run_batch(
            sanitizer,
            files,
            None,
            BatchOptions {
                workers: 1,
                ..BatchOptions::default()
            },
            Arc::new(AtomicBool::new(false)),
        );
        assert!(reports.iter().all(|r| matches!(r.status, FileStatus::Skipped)));
        assert_eq!(summary.skipped, 3);
        assert!(summary.cancelled);
    }
}

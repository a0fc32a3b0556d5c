//! Append-only audit journal of sanitization results.
//!
//! The journal is one JSON document, `{"ind_results": [...]}`. Every record rewrites
//! the whole document through a temporary file and a rename, under a lock shared by
//! all workers of the process.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const DATE_FORMAT: &str = "%d/%m/%Y-%H:%M:%S";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Cannot access journal {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Journal {path} is not valid: {source}")]
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "FileType")]
    pub file_type: String,
    #[serde(rename = "SANSTat")]
    pub sanitized: bool,
    #[serde(rename = "OUTPATH")]
    pub output: Option<String>,
    /// SHA-256 of the output, `None` when there is none or it could not be read.
    #[serde(rename = "HASH")]
    pub hash: Option<String>,
}

impl JournalEntry {
    /// An entry stamped now. The output is hashed from disk.
    pub fn new(source: &Path, file_type: impl ToString, output: Option<&Path>) -> Self {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        Self {
            date: Local::now().format(DATE_FORMAT).to_string(),
            file_name,
            file_type: file_type.to_string(),
            sanitized: output.is_some(),
            output: output.map(|p| p.display().to_string()),
            hash: output.and_then(hash_file),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalDocument {
    ind_results: Vec<JournalEntry>,
}

pub struct Journal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry`, creating the journal when it does not exist yet.
    pub fn record(&self, entry: JournalEntry) -> Result<(), JournalError> {
        let _guard = self.lock.lock();

        let mut document = self.load()?;
        document.ind_results.push(entry);
        let json = serde_json::to_vec_pretty(&document).map_err(|source| JournalError::Format {
            path: self.path.clone(),
            source,
        })?;

        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, json)
            .and_then(|()| fs::rename(&temp, &self.path))
            .map_err(|source| {
                let _ = fs::remove_file(&temp);
                self.io_error(source)
            })
    }

    pub fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.ind_results)
    }

    fn load(&self) -> Result<JournalDocument, JournalError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(JournalDocument::default()),
            Err(e) => return Err(self.io_error(e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            tracing::warn!(journal = %self.path.display(), "journal is empty, starting a new one");
            return Ok(JournalDocument::default());
        }
        serde_json::from_slice(&bytes).map_err(|source| JournalError::Format {
            path: self.path.clone(),
            source,
        })
    }

    fn io_error(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn hash_file(path: &Path) -> Option<String> {
    match fs::read(path) {
        Ok(data) => Some(compute_sha256(&data)),
        Err(e) => {
            tracing::error!(output = %path.display(), error = %e, "cannot hash output");
            None
        }
    }
}

fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn entry(name: &str) -> JournalEntry {
        JournalEntry {
            date: "01/02/2026-10:00:00".into(),
            file_name: name.into(),
            file_type: "docx".into(),
            sanitized: true,
            output: Some(format!("Outputs/out_{name}")),
            hash: None,
        }
    }

    #[test]
    fn record_creates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("san_results.json"));
        journal.record(entry("a.docx")).unwrap();
        journal.record(entry("b.docx")).unwrap();

        let names: Vec<String> = journal.entries().unwrap().into_iter().map(|e| e.file_name).collect();
        assert_eq!(names, vec!["a.docx", "b.docx"]);
        assert!(!dir.path().join("san_results.json.tmp").exists());
    }

    #[test]
    fn field_names_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("san_results.json");
        let journal = Journal::new(&path);
        let mut failed = entry("c.pdf");
        failed.sanitized = false;
        failed.output = None;
        journal.record(failed).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        let first = &value["ind_results"][0];
        assert_eq!(first["FileName"], "c.pdf");
        assert_eq!(first["FileType"], "docx");
        assert_eq!(first["SANSTat"], false);
        assert!(first["OUTPATH"].is_null());
        assert!(first["HASH"].is_null());
        assert!(first["Date"].is_string());
    }

    #[test]
    fn empty_file_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("san_results.json");
        fs::write(&path, "\n").unwrap();
        let journal = Journal::new(&path);
        journal.record(entry("a.docx")).unwrap();
        assert_eq!(journal.entries().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_journal_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("san_results.json");
        fs::write(&path, "{\"ind_results\": [").unwrap();
        let journal = Journal::new(&path);
        assert!(matches!(
            journal.record(entry("a.docx")),
            Err(JournalError::Format { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"ind_results\": [");
    }

    #[test]
    fn concurrent_records_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(Journal::new(dir.path().join("san_results.json")));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let journal = Arc::clone(&journal);
                thread::spawn(move || journal.record(entry(&format!("{i}.docx"))).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(journal.entries().unwrap().len(), 8);
    }

    #[test]
    fn entry_hashes_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out_x.png");
        fs::write(&output, b"abc").unwrap();

        let entry = JournalEntry::new(Path::new("/in/x.png"), "png", Some(&output));
        assert_eq!(entry.file_name, "x.png");
        assert!(entry.sanitized);
        assert_eq!(
            entry.hash.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );

        let missing = JournalEntry::new(Path::new("/in/y.png"), "png", Some(&dir.path().join("gone")));
        assert!(missing.hash.is_none());
    }
}

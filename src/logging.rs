//! Request journal: a bounded ring buffer of recent entries, optionally
//! mirrored to a JSONL file.
//!
//! The file is appended to and compacted back down to the ring's contents
//! once it holds twice the ring capacity, so it stays bounded.
//!
//! `tracing` carries the operational log. The journal keeps what
//! `GET /v1/diagnostics` serves: one entry per request and one per
//! normalization report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::normalize::NormalizationReport;

pub const MAX_JOURNAL_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub level: JournalLevel,
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl JournalEntry {
    pub fn new(level: JournalLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }
}

pub struct Journal {
    entries: VecDeque<JournalEntry>,
    capacity: usize,
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    /// Lines currently in the file, valid or not.
    lines_on_disk: usize,
}

impl Journal {
    /// Journal that lives only in memory.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(MAX_JOURNAL_ENTRIES)),
            capacity: capacity.max(1),
            writer: None,
            path: None,
            lines_on_disk: 0,
        }
    }

    /// Journal backed by `file_path`. Existing entries are loaded back in.
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::open_with_capacity(file_path, MAX_JOURNAL_ENTRIES)
    }

    pub fn open_with_capacity(file_path: impl AsRef<Path>, capacity: usize) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut journal = Self::in_memory(capacity);
        journal.path = Some(file_path.to_path_buf());

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                journal.lines_on_disk += 1;
                // Skip torn or foreign lines
                if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
                    journal.push(entry);
                }
            }
        }

        if journal.lines_on_disk > journal.capacity {
            journal.compact()?;
        } else {
            let file = OpenOptions::new().create(true).append(true).open(file_path)?;
            journal.writer = Some(BufWriter::new(file));
        }

        Ok(journal)
    }

    pub fn record(&mut self, entry: JournalEntry) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                match writeln!(writer, "{json}").and_then(|()| writer.flush()) {
                    Ok(()) => self.lines_on_disk += 1,
                    Err(e) => tracing::warn!(error = %e, "failed to append to journal file"),
                }
            }
        }
        self.push(entry);

        if self.writer.is_some() && self.lines_on_disk >= self.capacity.saturating_mul(2) {
            if let Err(e) = self.compact() {
                tracing::warn!(error = %e, "failed to compact journal file");
            }
        }
    }

    /// Rewrite the file with exactly the entries held in memory.
    fn compact(&mut self) -> std::io::Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let tmp = path.with_extension("jsonl.tmp");

        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for entry in &self.entries {
                let json = serde_json::to_string(entry).map_err(std::io::Error::other)?;
                writeln!(out, "{json}")?;
            }
            out.flush()?;
        }

        // Close the old handle before the file is replaced
        self.writer = None;
        std::fs::rename(&tmp, &path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.writer = Some(BufWriter::new(file));
        self.lines_on_disk = self.entries.len();
        tracing::debug!(path = %path.display(), entries = self.lines_on_disk, "compacted journal file");
        Ok(())
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, entry: JournalEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

#[derive(Clone)]
pub struct SharedJournal(Arc<Mutex<Journal>>);

impl SharedJournal {
    pub fn new(journal: Journal) -> Self {
        Self(Arc::new(Mutex::new(journal)))
    }

    pub fn in_memory() -> Self {
        Self::new(Journal::in_memory(MAX_JOURNAL_ENTRIES))
    }

    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self::new(Journal::open(file_path)?))
    }

    pub fn record(&self, entry: JournalEntry) {
        if let Ok(mut journal) = self.0.lock() {
            journal.record(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.record(JournalEntry::new(JournalLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.record(JournalEntry::new(JournalLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.record(JournalEntry::new(JournalLevel::Error, component, message));
    }

    /// One entry per normalized response; warn level when anything was lost.
    pub fn normalization(&self, model: &str, report: &NormalizationReport) {
        let lossy = report.diagnostics.iter().any(|d| d.is_lossy());
        let level = if lossy { JournalLevel::Warn } else { JournalLevel::Info };
        let message = format!(
            "model={model} path={} tool_calls={} diagnostics={}",
            report.extraction_path,
            report.tool_calls,
            report.diagnostics.len()
        );
        let context = serde_json::to_value(report).unwrap_or(serde_json::Value::Null);
        self.record(JournalEntry::new(level, "normalize", message).with_context(context));
    }

    pub fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        self.0.lock().map(|j| j.recent(limit)).unwrap_or_default()
    }
}

impl std::fmt::Debug for SharedJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedJournal").finish()
    }
}

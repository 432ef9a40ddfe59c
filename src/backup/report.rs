use crate::backup::plan::{ExcludedEntry, PlanEntry};
use crate::backup::result_error::error::Error;

use derive_more::Display;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use serde::Serialize;

use std::fmt::{Display as FmtDisplay, Formatter};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[display("COPIED")]
    Copied,
    #[display("SKIPPED")]
    Skipped,
    #[display("FAILED")]
    Failed,
}

/// Result of one entry, as sent back by a copy worker.
#[derive(Clone, Debug, Serialize, Getters, CopyGetters)]
pub struct EntryRecord {
    /// Plan position; `None` for entries excluded while planning.
    #[getset(get_copy = "pub")]
    index: Option<usize>,
    #[getset(get = "pub")]
    src: PathBuf,
    /// Where the entry was (or would have been) written.
    #[getset(get = "pub")]
    dst: PathBuf,
    #[getset(get_copy = "pub")]
    outcome: Outcome,
    #[getset(get_copy = "pub")]
    bytes: u64,
    #[getset(get_copy = "pub")]
    error_kind: Option<&'static str>,
    #[getset(get = "pub")]
    error: Option<String>,
}

impl EntryRecord {
    pub fn copied<P: Into<PathBuf>>(entry: &PlanEntry, dst: P, bytes: u64) -> Self {
        Self::new(entry, dst.into(), Outcome::Copied, bytes, None)
    }

    pub fn skipped(entry: &PlanEntry) -> Self {
        Self::new(entry, entry.dst().clone(), Outcome::Skipped, 0, None)
    }

    pub fn failed(entry: &PlanEntry, error: &Error) -> Self {
        Self::new(entry, entry.dst().clone(), Outcome::Failed, 0, Some(error))
    }

    pub fn excluded(entry: &ExcludedEntry) -> Self {
        Self {
            index: None,
            src: entry.src.clone(),
            dst: entry.dst.clone(),
            outcome: Outcome::Skipped,
            bytes: 0,
            error_kind: Some(entry.reason.kind_name()),
            error: Some(entry.reason.to_string()),
        }
    }

    fn new(entry: &PlanEntry, dst: PathBuf, outcome: Outcome, bytes: u64, error: Option<&Error>) -> Self {
        Self {
            index: Some(entry.index()),
            src: entry.src().clone(),
            dst,
            outcome,
            bytes,
            error_kind: error.map(Error::kind_name),
            error: error.map(ToString::to_string),
        }
    }
}

impl FmtDisplay for EntryRecord {
    /// `<OUTCOME>\t<source>\t<destination>`
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{}\t{}", self.outcome, self.src.display(), self.dst.display())
    }
}

/// Mutable side of the report. Only the collector thread owns one.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    records: Vec<EntryRecord>,
}

impl ReportBuilder {
    pub fn add(&mut self, record: EntryRecord) {
        match record.outcome {
            Outcome::Failed => tracing::debug!(
                "{} {:?}: {}",
                record.outcome,
                record.src,
                record.error.as_deref().unwrap_or_default()
            ),
            _ => tracing::trace!("{} {:?} -> {:?}", record.outcome, record.src, record.dst),
        }
        self.records.push(record);
    }

    /// Drains `rx` on its own thread until every sender is dropped.
    pub fn spawn_collector(mut self, rx: Receiver<EntryRecord>) -> JoinHandle<ReportBuilder> {
        std::thread::spawn(move || {
            for record in rx {
                self.add(record);
            }
            self
        })
    }

    /// A run counts as stopped when any entry was cancelled.
    pub fn finish(self) -> OperationReport {
        let records = self
            .records
            .into_iter()
            .sorted_by_key(|r| r.index.unwrap_or(usize::MAX))
            .collect_vec();
        let count = |o: Outcome| records.iter().filter(|r| r.outcome == o).count();
        OperationReport {
            copied: count(Outcome::Copied),
            skipped: count(Outcome::Skipped),
            failed: count(Outcome::Failed),
            bytes_copied: records.iter().map(|r| r.bytes).sum(),
            stopped: records.iter().any(|r| r.error_kind == Some("Cancelled")),
            records,
        }
    }
}

/// Finalized outcome of one run, records in plan order.
#[derive(Clone, Debug, Serialize, Getters, CopyGetters)]
pub struct OperationReport {
    #[getset(get_copy = "pub")]
    copied: usize,
    #[getset(get_copy = "pub")]
    skipped: usize,
    #[getset(get_copy = "pub")]
    failed: usize,
    #[getset(get_copy = "pub")]
    bytes_copied: u64,
    #[getset(get_copy = "pub")]
    stopped: bool,
    #[getset(get = "pub")]
    records: Vec<EntryRecord>,
}

impl OperationReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn record_for<P: AsRef<Path>>(&self, src: P) -> Option<&EntryRecord> {
        self.records.iter().find(|r| r.src == src.as_ref())
    }
}

impl FmtDisplay for OperationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "copied: {}, skipped: {}, failed: {}",
            self.copied, self.skipped, self.failed
        )?;
        if self.stopped {
            write!(f, " (stopped early)")?;
        }
        Ok(())
    }
}

//! Copy Engine.
//!
//! Runs a [`Plan`] in three passes:
//! 1. directory entries, in plan order, on the calling thread;
//! 2. file and symlink entries, on a bounded rayon pool;
//! 3. directory metadata, in reverse plan order.
//!
//! Every worker reports through one channel to a collector thread that owns
//! the [`ReportBuilder`]. A failed entry never stops its siblings.

pub mod atomic;
pub mod metadata;

use crate::backup::conflict::{self, ConflictDecision, ConflictPolicy};
use crate::backup::copy::atomic::{atomic_symlink, atomic_write, CommitMode};
use crate::backup::function_path;
use crate::backup::plan::{EntryKind, Plan, PlanEntry};
use crate::backup::report::{EntryRecord, OperationReport, Outcome, ReportBuilder};
use crate::backup::resolve::map_io_error;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::stop::StopToken;

use bon::Builder;
use function_name::named;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};
use std::time::Duration;

pub static DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound of the default worker count.
static DEFAULT_MAX_JOBS: usize = 8;

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, DEFAULT_MAX_JOBS)
}

/// What happened to one entry that did not fail.
#[derive(Debug, PartialEq, Eq)]
enum Committed {
    Written { dst: PathBuf, bytes: u64 },
    Skipped,
}

#[derive(Clone, Debug, Builder)]
pub struct CopyEngine {
    #[builder(default)]
    policy: ConflictPolicy,
    /// Skip the conflict resolver and replace in place (timestamped runs).
    #[builder(default)]
    bypass_conflicts: bool,
    #[builder(default = true)]
    preserve_metadata: bool,
    #[builder(default = default_jobs())]
    jobs: usize,
    #[builder(default)]
    stop: StopToken,
    #[builder(default = DEFAULT_RETRY_BACKOFF)]
    retry_backoff: Duration,
}

impl CopyEngine {
    #[named]
    pub fn execute(&self, plan: Plan) -> Result<OperationReport> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.jobs.max(1))
            .thread_name(|i| format!("bkup-copy-{i}"))
            .build()
            .map_err(Error::from)
            .with_debug_object_and_fn_name(self.clone(), function_path!())?;

        let (entries, excluded) = plan.into_parts();
        let mut builder = ReportBuilder::default();
        excluded
            .iter()
            .for_each(|e| builder.add(EntryRecord::excluded(e)));

        let (tx, rx) = channel();
        let collector = builder.spawn_collector(rx);

        tracing::info!("Copying {} entries with {} workers", entries.len(), self.jobs);
        let failed_dirs = self.create_directories(&entries, &tx);

        pool.install(|| {
            entries
                .par_iter()
                .filter(|e| !e.is_dir())
                .for_each_with(tx.clone(), |tx, entry| {
                    send(tx, self.process(entry, &failed_dirs))
                })
        });

        if self.preserve_metadata {
            self.apply_directory_metadata(&entries, &failed_dirs);
        }

        drop(tx);
        let builder = collector
            .join()
            .map_err(|_| Error::WorkerPanicked("report collector panicked".into()))?;
        let report = builder.finish();
        tracing::info!("Backup finished: {report}");
        Ok(report)
    }

    /// Creates every directory entry and returns the indices that failed.
    fn create_directories(&self, entries: &[PlanEntry], tx: &Sender<EntryRecord>) -> HashSet<usize> {
        let mut failed = HashSet::new();
        for entry in entries.iter().filter(|e| e.is_dir()) {
            let record = self.process(entry, &failed);
            if record.outcome() == Outcome::Failed {
                failed.insert(entry.index());
            }
            send(tx, record);
        }
        failed
    }

    fn apply_directory_metadata(&self, entries: &[PlanEntry], failed_dirs: &HashSet<usize>) {
        entries
            .iter()
            .rev()
            .filter(|e| e.is_dir() && !failed_dirs.contains(&e.index()))
            .for_each(|entry| match std::fs::metadata(entry.src()) {
                Ok(md) => metadata::apply_to_dir(entry.dst(), &md),
                Err(e) => tracing::warn!("Cannot read metadata of {:?}: {}", entry.src(), e),
            });
    }

    fn process(&self, entry: &PlanEntry, failed_dirs: &HashSet<usize>) -> EntryRecord {
        if self.stop.is_stopped() {
            return EntryRecord::failed(entry, &Error::Cancelled(entry.src().clone()));
        }
        if let Some(parent) = entry.parent().filter(|p| failed_dirs.contains(p)) {
            tracing::debug!("Not copying {:?}, parent entry {} failed", entry.src(), parent);
            let parent_dst = entry.dst().parent().map(Path::to_path_buf).unwrap_or_default();
            return EntryRecord::failed(entry, &Error::ParentFailed(parent_dst));
        }

        match self.with_retry(entry, || self.copy_entry(entry)) {
            Ok(Committed::Written { dst, bytes }) => EntryRecord::copied(entry, dst, bytes),
            Ok(Committed::Skipped) => EntryRecord::skipped(entry),
            Err(e) => {
                let e = e.with_msg(format!("Backing up {:?} failed", entry.src()));
                tracing::warn!("{e}");
                EntryRecord::failed(entry, &e)
            }
        }
    }

    fn with_retry<T, F: Fn() -> Result<T>>(&self, entry: &PlanEntry, f: F) -> Result<T> {
        match f() {
            Err(e) if e.is_retryable() => {
                tracing::info!(
                    "Retrying {:?} in {:?} after: {}",
                    entry.src(),
                    self.retry_backoff,
                    e
                );
                std::thread::sleep(self.retry_backoff);
                f()
            }
            res => res,
        }
    }

    fn copy_entry(&self, entry: &PlanEntry) -> Result<Committed> {
        match entry.kind() {
            EntryKind::Directory => create_directory(entry.dst()),
            EntryKind::File { .. } => self.copy_file(entry),
            EntryKind::Symlink { target } => self.copy_symlink(entry, target),
        }
    }

    /// Consulted right before writing, never earlier. `None` means skip.
    fn decide(&self, entry: &PlanEntry) -> Result<Option<(PathBuf, CommitMode)>> {
        if self.bypass_conflicts {
            return Ok(Some((entry.dst().clone(), CommitMode::Replace)));
        }
        let decision = conflict::decide(self.policy, entry)?;
        let mode = match decision {
            ConflictDecision::Skip => return Ok(None),
            ConflictDecision::Overwrite => CommitMode::Replace,
            ConflictDecision::Write | ConflictDecision::Version(_) => CommitMode::NoClobber,
        };
        Ok(Some((decision.destination(entry.dst()), mode)))
    }

    fn copy_file(&self, entry: &PlanEntry) -> Result<Committed> {
        let Some((dst, mode)) = self.decide(entry)? else {
            return Ok(Committed::Skipped);
        };
        ensure_parent(&dst)?;

        let src = entry.src();
        let file = File::open(src).map_err(|e| map_io_error(e, src))?;
        let md = file.metadata()?;
        if entry.modified().is_some() && md.modified().ok() != entry.modified() {
            tracing::warn!("{:?} changed after planning, backing up current content", src);
        }
        let bytes = atomic_write(
            &mut BufReader::new(file),
            &dst,
            mode,
            self.preserve_metadata.then_some(&md),
        )?;
        tracing::debug!("Copied {:?} -> {:?} ({} bytes)", src, dst, bytes);
        Ok(Committed::Written { dst, bytes })
    }

    fn copy_symlink(&self, entry: &PlanEntry, target: &Path) -> Result<Committed> {
        let Some((dst, mode)) = self.decide(entry)? else {
            return Ok(Committed::Skipped);
        };
        ensure_parent(&dst)?;

        atomic_symlink(target, &dst, mode)?;
        if self.preserve_metadata {
            match std::fs::symlink_metadata(entry.src()) {
                Ok(md) => metadata::apply_to_symlink(&dst, &md),
                Err(e) => tracing::warn!("Cannot read metadata of {:?}: {}", entry.src(), e),
            }
        }
        tracing::debug!("Linked {:?} -> {:?}", dst, target);
        Ok(Committed::Written { dst, bytes: 0 })
    }
}

fn send(tx: &Sender<EntryRecord>, record: EntryRecord) {
    if let Err(e) = tx.send(record) {
        tracing::error!("{}", Error::from(e));
    }
}

/// Idempotent: an existing directory is reported as skipped.
fn create_directory(dst: &Path) -> Result<Committed> {
    if dst.is_dir() {
        return Ok(Committed::Skipped);
    }
    match std::fs::create_dir_all(dst) {
        Ok(()) => Ok(Committed::Written {
            dst: dst.to_path_buf(),
            bytes: 0,
        }),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && !dst.is_dir() => {
            Err(Error::DestinationExists(dst.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn ensure_parent(dst: &Path) -> Result<()> {
    match dst.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(Error::from)
            .with_msg(format!("Creating directory {parent:?} failed")),
        _ => Ok(()),
    }
}

//! Snapshot Planner.
//!
//! Walks a [`BackupTarget`] and produces a [`Plan`]: a flat, ordered list of
//! [`PlanEntry`] values (directories before their contents, names sorted at
//! each level). Nothing is written while planning, so a plan can be printed
//! or inspected before the copy engine runs it.

pub mod exclude;
pub mod naming;

use crate::backup::function_path;
use crate::backup::plan::exclude::Excluder;
use crate::backup::plan::naming::Naming;
use crate::backup::resolve::{normalize, BackupTarget, TargetKind};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;

use bon::Builder;
use derive_more::{Deref, Display};
use function_name::named;
use getset::{CopyGetters, Getters};
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// What a plan entry is, with only the data each kind needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    #[display("file")]
    File { size: u64 },
    #[display("directory")]
    Directory,
    /// Copied as a link reference, never followed.
    #[display("symlink")]
    Symlink { target: PathBuf },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Getters, CopyGetters)]
pub struct PlanEntry {
    #[getset(get_copy = "pub")]
    index: usize,
    /// Index of the directory entry this entry lives in, if it is in the plan.
    #[getset(get_copy = "pub")]
    parent: Option<usize>,
    #[getset(get = "pub")]
    src: PathBuf,
    #[getset(get = "pub")]
    dst: PathBuf,
    #[getset(get = "pub")]
    kind: EntryKind,
    #[serde(skip)]
    #[getset(get_copy = "pub")]
    modified: Option<SystemTime>,
}

impl PlanEntry {
    pub fn size(&self) -> u64 {
        match self.kind {
            EntryKind::File { size } => size,
            EntryKind::Directory | EntryKind::Symlink { .. } => 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A descendant left out of the plan at planning time.
#[derive(Debug)]
pub struct ExcludedEntry {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub reason: Error,
}

#[derive(Debug, Deref, Getters)]
#[getset(get = "pub")]
pub struct Plan {
    /// Resolved root of the source tree.
    source: PathBuf,
    root_dst: PathBuf,
    #[deref]
    entries: Vec<PlanEntry>,
    excluded: Vec<ExcludedEntry>,
}

impl Plan {
    pub fn into_parts(self) -> (Vec<PlanEntry>, Vec<ExcludedEntry>) {
        (self.entries, self.excluded)
    }

    fn check_invariants(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !seen.insert(entry.dst.as_path()) {
                return Err(Error::InvalidPath {
                    path: entry.dst.clone(),
                    reason: "is the destination of more than one entry".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Builder)]
pub struct Planner {
    #[builder(default)]
    naming: Naming,
    #[builder(into)]
    destination_dir: Option<PathBuf>,
    #[builder(default)]
    excluder: Excluder,
}

impl Planner {
    /// Build the full plan or fail without one: a read error anywhere in the
    /// tree aborts the whole plan.
    #[named]
    pub fn plan(&self, target: &BackupTarget) -> Result<Plan> {
        let root_dst = self
            .naming
            .destination_root(target, self.destination_dir.as_deref());
        check_overlap(target, &root_dst)?;

        tracing::info!("Planning backup of {:?} into {:?}", target.path(), root_dst);
        let mut builder = PlanBuilder::new(target, root_dst.clone());
        match target.kind() {
            TargetKind::File => {
                let md = std::fs::metadata(target.path()).map_err(|e| traversal(target.path(), e))?;
                builder.push(target.path().to_path_buf(), root_dst.clone(), file_kind(&md), &md);
            }
            TargetKind::Directory => self.walk(target, &mut builder)?,
        }

        let plan = builder.finish();
        plan.check_invariants()
            .with_debug_object_and_fn_name(target.path().to_path_buf(), function_path!())?;
        tracing::info!(
            "Planned {} entries, {} excluded",
            plan.entries.len(),
            plan.excluded.len()
        );
        Ok(plan)
    }

    /// Plan of a root that is a dangling symlink: nothing to copy, the link
    /// itself is reported as excluded.
    pub fn plan_broken_link(&self, link: PathBuf, target: PathBuf) -> Plan {
        let root_dst = self
            .naming
            .destination_for(&link, self.destination_dir.as_deref());
        tracing::warn!("Excluding broken link {:?} -> {:?}", link, target);
        Plan {
            source: link.clone(),
            root_dst: root_dst.clone(),
            entries: Vec::new(),
            excluded: vec![ExcludedEntry {
                src: link.clone(),
                dst: root_dst,
                reason: Error::BrokenLink { link, target },
            }],
        }
    }

    fn walk(&self, target: &BackupTarget, builder: &mut PlanBuilder) -> Result<()> {
        let root = target.path();
        let excluder = &self.excluder;
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|de| match de.path().strip_prefix(root) {
                Ok(relative) if excluder.is_excluded(relative) => {
                    tracing::debug!("Excluding {:?}", de.path());
                    false
                }
                _ => true,
            });

        for res in walker {
            let de = res.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                traversal(&path, e.into())
            })?;
            self.visit(de, builder)?;
        }
        Ok(())
    }

    fn visit(&self, de: DirEntry, builder: &mut PlanBuilder) -> Result<()> {
        if de.depth() == 0 {
            // the root was resolved through any link it may be
            let md = std::fs::metadata(de.path()).map_err(|e| traversal(de.path(), e))?;
            let dst = builder.root_dst.clone();
            builder.push(de.into_path(), dst, EntryKind::Directory, &md);
            return Ok(());
        }

        let relative = de.path().strip_prefix(builder.target.path())?;
        let dst = if relative.as_os_str().is_empty() {
            builder.root_dst.clone()
        } else {
            builder.root_dst.join(relative)
        };
        let md = de.metadata().map_err(|e| {
            let path = de.path().to_path_buf();
            traversal(&path, e.into())
        })?;

        let ft = md.file_type();
        let src = de.into_path();
        if ft.is_symlink() {
            let link = std::fs::read_link(&src).map_err(|e| traversal(&src, e))?;
            match std::fs::metadata(&src) {
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!("Excluding broken link {:?} -> {:?}", src, link);
                    let reason = Error::BrokenLink {
                        link: src.clone(),
                        target: link,
                    };
                    builder.exclude(src, dst, reason);
                }
                _ => builder.push(src, dst, EntryKind::Symlink { target: link }, &md),
            }
        } else if ft.is_dir() {
            builder.push(src, dst, EntryKind::Directory, &md);
        } else if ft.is_file() {
            builder.push(src, dst, file_kind(&md), &md);
        } else {
            tracing::warn!("Excluding special file {:?}", src);
            let reason = Error::InvalidPath {
                path: src.clone(),
                reason: "is a special file (device, socket or pipe)".into(),
            };
            builder.exclude(src, dst, reason);
        }
        Ok(())
    }
}

struct PlanBuilder<'a> {
    target: &'a BackupTarget,
    root_dst: PathBuf,
    entries: Vec<PlanEntry>,
    excluded: Vec<ExcludedEntry>,
    dir_index: HashMap<PathBuf, usize>,
}

impl<'a> PlanBuilder<'a> {
    fn new(target: &'a BackupTarget, root_dst: PathBuf) -> Self {
        Self {
            target,
            root_dst,
            entries: Vec::new(),
            excluded: Vec::new(),
            dir_index: HashMap::new(),
        }
    }

    fn push(&mut self, src: PathBuf, dst: PathBuf, kind: EntryKind, md: &Metadata) {
        let index = self.entries.len();
        let parent = src.parent().and_then(|p| self.dir_index.get(p)).copied();
        if kind == EntryKind::Directory {
            self.dir_index.insert(src.clone(), index);
        }
        tracing::trace!("Planned {} {:?} -> {:?}", kind, src, dst);
        self.entries.push(PlanEntry {
            index,
            parent,
            src,
            dst,
            kind,
            modified: md.modified().ok(),
        });
    }

    fn exclude(&mut self, src: PathBuf, dst: PathBuf, reason: Error) {
        self.excluded.push(ExcludedEntry { src, dst, reason });
    }

    fn finish(self) -> Plan {
        Plan {
            source: self.target.path().to_path_buf(),
            root_dst: self.root_dst,
            entries: self.entries,
            excluded: self.excluded,
        }
    }
}

fn file_kind(md: &Metadata) -> EntryKind {
    EntryKind::File { size: md.len() }
}

fn traversal(path: &Path, source: std::io::Error) -> Error {
    Error::TraversalError {
        path: path.to_path_buf(),
        source,
    }
}

/// Rejects a destination that lies inside the source tree or contains it.
fn check_overlap(target: &BackupTarget, root_dst: &Path) -> Result<()> {
    let src = physical(target.path());
    let dst = physical(root_dst);
    let overlaps = match target.kind() {
        TargetKind::Directory => dst.starts_with(&src) || src.starts_with(&dst),
        TargetKind::File => src == dst,
    };
    if overlaps {
        return Err(Error::OverlappingDestination { src, dst });
    }
    Ok(())
}

/// Canonical form of the deepest existing ancestor, with the rest re-attached.
fn physical(path: &Path) -> PathBuf {
    let path = normalize(path);
    let mut existing = path.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return rest.iter().rev().fold(canonical, |acc, c| acc.join(c));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return path,
        }
    }
}

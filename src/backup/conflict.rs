//! Conflict Resolver.
//!
//! Consulted by the copy engine right before an entry is written, so a
//! destination created earlier in the same run is a live collision.

use crate::backup::plan::{EntryKind, PlanEntry};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use std::ffi::OsString;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Skip identical backups, refuse to replace differing ones
    #[default]
    Default,
    /// Always replace the existing backup
    Overwrite,
    /// Never touch an existing backup
    SkipExisting,
    /// Keep the existing backup and write to the first free `.N` slot
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Nothing at the destination.
    Write,
    Overwrite,
    Skip,
    Version(u32),
}

impl ConflictDecision {
    /// Path the entry is written to under this decision.
    pub fn destination(&self, dst: &Path) -> PathBuf {
        match self {
            ConflictDecision::Version(n) => versioned_path(dst, *n),
            _ => dst.to_path_buf(),
        }
    }
}

pub fn decide(policy: ConflictPolicy, entry: &PlanEntry) -> Result<ConflictDecision> {
    let dst = entry.dst();
    let existing = match std::fs::symlink_metadata(dst) {
        Ok(md) => md,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ConflictDecision::Write),
        Err(e) => return Err(e.into()),
    };

    let decision = match policy {
        ConflictPolicy::Overwrite if existing.is_dir() => {
            return Err(Error::DestinationExists(dst.to_path_buf()))
        }
        ConflictPolicy::Overwrite => ConflictDecision::Overwrite,
        ConflictPolicy::SkipExisting => ConflictDecision::Skip,
        ConflictPolicy::Default | ConflictPolicy::Version => {
            if same_content(entry, dst, &existing)? {
                ConflictDecision::Skip
            } else if policy == ConflictPolicy::Version {
                latest_version_or_next(entry)?
            } else {
                return Err(Error::DestinationExists(dst.to_path_buf()));
            }
        }
    };
    tracing::debug!("Conflict on {:?} under {:?}: {:?}", dst, policy, decision);
    Ok(decision)
}

/// A source already saved in the newest `.N` slot is not versioned again.
fn latest_version_or_next(entry: &PlanEntry) -> Result<ConflictDecision> {
    let next = next_free_version(entry.dst())?;
    if next > 1 {
        let latest = versioned_path(entry.dst(), next - 1);
        let md = std::fs::symlink_metadata(&latest)?;
        if same_content(entry, &latest, &md)? {
            return Ok(ConflictDecision::Skip);
        }
    }
    Ok(ConflictDecision::Version(next))
}

fn same_content(entry: &PlanEntry, existing_path: &Path, existing: &Metadata) -> Result<bool> {
    let same = match entry.kind() {
        EntryKind::File { size } => {
            existing.is_file()
                && existing.len() == *size
                && sha256_hex_of(entry.src())? == sha256_hex_of(existing_path)?
        }
        EntryKind::Symlink { target } => {
            existing.file_type().is_symlink() && &std::fs::read_link(existing_path)? == target
        }
        EntryKind::Directory => existing.is_dir(),
    };
    Ok(same)
}

/// SHA-256 of the file at `path` as lowercase hex.
pub fn sha256_hex_of(path: &Path) -> std::io::Result<String> {
    let mut f = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn versioned_path(dst: &Path, n: u32) -> PathBuf {
    let mut name: OsString = dst.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

fn next_free_version(dst: &Path) -> Result<u32> {
    for n in 1..=u32::MAX {
        match std::fs::symlink_metadata(versioned_path(dst, n)) {
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(n),
            Err(e) => return Err(e.into()),
            Ok(_) => continue,
        }
    }
    Err(Error::DestinationExists(dst.to_path_buf()))
}

//! Atomic commit of one backup entry.
//!
//! File content goes to a temporary file in the destination directory, is
//! flushed and fsynced, then renamed onto the final name. A reader of the
//! destination path sees either the previous backup or the complete new one.

use crate::backup::copy::metadata;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;

use std::fs::Metadata;
use std::io::{BufWriter, ErrorKind, IntoInnerError, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub static TMP_SUFFIX: &str = ".bkup-tmp";

static NEXT_TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitMode {
    /// Replace whatever is at the destination.
    Replace,
    /// Fail with `DestinationExists` if the destination appeared meanwhile.
    NoClobber,
}

/// Streams `reader` into `dst`, returning the number of bytes written.
///
/// `src_md`, when given, is applied to the temporary file before the rename,
/// so the committed file already carries the source's mode and times.
pub fn atomic_write<R: Read>(
    reader: &mut R,
    dst: &Path,
    mode: CommitMode,
    src_md: Option<&Metadata>,
) -> Result<u64> {
    let parent = parent_dir(dst);
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name(dst)))
        .suffix(TMP_SUFFIX)
        .tempfile_in(parent)?;
    tracing::trace!("Writing {:?} through {:?}", dst, tmp.path());

    let mut writer = BufWriter::new(tmp.as_file_mut());
    let bytes = std::io::copy(reader, &mut writer)?;
    writer.into_inner().map_err(IntoInnerError::into_error)?;

    if let Some(md) = src_md {
        metadata::apply_to_file(tmp.as_file(), md, dst);
    }
    tmp.as_file().sync_all()?;

    let tmp_path = tmp.path().to_path_buf();
    let persisted = match mode {
        CommitMode::Replace => tmp.persist(dst),
        CommitMode::NoClobber => tmp.persist_noclobber(dst),
    };
    persisted.map_err(|e| rename_error(e.error, tmp_path, dst, mode))?;

    sync_parent_dir(parent);
    Ok(bytes)
}

/// Creates a symlink at `dst` pointing to `target`.
#[cfg(unix)]
pub fn atomic_symlink(target: &Path, dst: &Path, mode: CommitMode) -> Result<()> {
    use std::os::unix::fs::symlink;

    match mode {
        // creating a link is itself atomic and refuses an existing name
        CommitMode::NoClobber => symlink(target, dst).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::DestinationExists(dst.to_path_buf()),
            _ => Error::from(e),
        })?,
        CommitMode::Replace => {
            let parent = parent_dir(dst);
            let ctr = NEXT_TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            let tmp = parent.join(format!(
                ".{}.{}.{}{}",
                file_name(dst),
                std::process::id(),
                ctr,
                TMP_SUFFIX
            ));
            symlink(target, &tmp)?;
            if let Err(e) = std::fs::rename(&tmp, dst) {
                let _ = std::fs::remove_file(&tmp);
                return Err(rename_error(e, tmp, dst, mode));
            }
        }
    }
    sync_parent_dir(parent_dir(dst));
    Ok(())
}

#[cfg(not(unix))]
pub fn atomic_symlink(_target: &Path, dst: &Path, _mode: CommitMode) -> Result<()> {
    Err(Error::from(std::io::Error::new(
        ErrorKind::Unsupported,
        format!("cannot recreate symbolic link {dst:?} on this platform"),
    )))
}

fn rename_error(e: std::io::Error, from: PathBuf, to: &Path, mode: CommitMode) -> Error {
    if mode == CommitMode::NoClobber && e.kind() == ErrorKind::AlreadyExists {
        Error::DestinationExists(to.to_path_buf())
    } else {
        Error::RenameFailure {
            from,
            to: to.to_path_buf(),
            source: e,
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bkup".to_string())
}

/// Makes the rename itself durable. Not every platform can open a directory.
fn sync_parent_dir(dir: &Path) {
    #[cfg(unix)]
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::warn!("Cannot fsync directory {:?}: {}", dir, e);
    }
    #[cfg(not(unix))]
    let _ = dir;
}

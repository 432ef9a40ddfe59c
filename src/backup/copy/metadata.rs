//! Permission and timestamp propagation.
//!
//! Every failure here is logged and swallowed: a backup whose bytes are right
//! but whose mode bits are not is still a backup.

use filetime::FileTime;

use std::fs::{File, Metadata};
use std::path::Path;

/// Applies `src_md` to the still open temporary file before it is committed.
pub fn apply_to_file(file: &File, src_md: &Metadata, dst: &Path) {
    if let Err(e) = file.set_permissions(src_md.permissions()) {
        tracing::warn!("Cannot set permissions on {:?}: {}", dst, e);
    }
    let atime = FileTime::from_last_access_time(src_md);
    let mtime = FileTime::from_last_modification_time(src_md);
    if let Err(e) = filetime::set_file_handle_times(file, Some(atime), Some(mtime)) {
        tracing::warn!("Cannot set times on {:?}: {}", dst, e);
    }
}

pub fn apply_to_dir(dir: &Path, src_md: &Metadata) {
    if let Err(e) = std::fs::set_permissions(dir, src_md.permissions()) {
        tracing::warn!("Cannot set permissions on {:?}: {}", dir, e);
    }
    let atime = FileTime::from_last_access_time(src_md);
    let mtime = FileTime::from_last_modification_time(src_md);
    if let Err(e) = filetime::set_file_times(dir, atime, mtime) {
        tracing::warn!("Cannot set times on {:?}: {}", dir, e);
    }
}

/// Links carry no mode bits worth copying, only times.
pub fn apply_to_symlink(link: &Path, src_md: &Metadata) {
    let atime = FileTime::from_last_access_time(src_md);
    let mtime = FileTime::from_last_modification_time(src_md);
    if let Err(e) = filetime::set_symlink_file_times(link, atime, mtime) {
        tracing::warn!("Cannot set times on link {:?}: {}", link, e);
    }
}

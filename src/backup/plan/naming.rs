use crate::backup::resolve::BackupTarget;

use chrono::{DateTime, TimeZone};

use std::ffi::{OsStr, OsString};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub static DEFAULT_SUFFIX: &str = ".bkup";
static TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Naming policy of one run: the suffix appended to the target name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Naming {
    suffix: Arc<str>,
    timestamped: bool,
}

impl Default for Naming {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX)
    }
}

impl Naming {
    pub fn new<S: AsRef<str>>(suffix: S) -> Self {
        Self {
            suffix: dotted(suffix.as_ref()).into(),
            timestamped: false,
        }
    }

    /// `.<YYYYMMDDHHMMSS><suffix>`, fixed once for the whole run.
    pub fn timestamped<S, O, T>(suffix: S, dt: DateTime<T>) -> Self
    where
        S: AsRef<str>,
        O: Display,
        T: TimeZone<Offset = O>,
    {
        Self {
            suffix: format!(".{}{}", dt.format(TIME_FORMAT), dotted(suffix.as_ref())).into(),
            timestamped: true,
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn is_timestamped(&self) -> bool {
        self.timestamped
    }

    pub fn backup_name(&self, name: &OsStr) -> OsString {
        let mut out = name.to_os_string();
        out.push(self.suffix.as_ref());
        out
    }

    /// Where the backup of `target` goes: next to it, or under `destination_dir`.
    pub fn destination_root(&self, target: &BackupTarget, destination_dir: Option<&Path>) -> PathBuf {
        self.destination_for(target.path(), destination_dir)
    }

    pub fn destination_for(&self, src: &Path, destination_dir: Option<&Path>) -> PathBuf {
        let dir = match destination_dir {
            Some(dir) => dir.to_path_buf(),
            None => src.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        dir.join(self.backup_name(src.file_name().unwrap_or_default()))
    }
}

fn dotted(suffix: &str) -> String {
    if suffix.starts_with('.') {
        suffix.to_string()
    } else {
        format!(".{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::resolve::resolve_target;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_default_suffix() {
        let naming = Naming::default();
        assert_eq!(naming.backup_name(OsStr::new("name.ext")), "name.ext.bkup");
        assert!(!naming.is_timestamped());
    }

    #[test]
    fn test_suffix_gets_leading_dot() {
        assert_eq!(Naming::new("old").suffix(), ".old");
        assert_eq!(Naming::new(".old").suffix(), ".old");
    }

    #[test]
    fn test_timestamped_suffix() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let naming = Naming::timestamped(DEFAULT_SUFFIX, dt);
        assert_eq!(naming.suffix(), ".20240309070501.bkup");
        assert!(naming.is_timestamped());
    }

    #[test]
    fn test_destination_root_alongside_and_under_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("docs")).unwrap();
        let target = resolve_target(temp_dir.path().join("docs")).unwrap();
        let naming = Naming::default();

        assert_eq!(
            naming.destination_root(&target, None),
            temp_dir.path().join("docs.bkup")
        );
        assert_eq!(
            naming.destination_root(&target, Some(Path::new("/tmp/out"))),
            PathBuf::from("/tmp/out/docs.bkup")
        );
    }
}

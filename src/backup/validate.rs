//! Validation functions for configuration values.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

static MAX_SUFFIX_LEN: usize = 100;

pub fn validate_suffix<S: AsRef<str>>(suffix: S) -> Result<(), ValidationError> {
    let suffix = suffix.as_ref();
    if suffix.is_empty() || suffix == "." {
        return Err(ValidationError::new("InvalidSuffix")
            .with_message("Invalid suffix, must not be empty".into()));
    }

    if suffix.chars().any(|c| c == '/' || c == '\\' || c == '\0') {
        return Err(ValidationError::new("InvalidSuffix")
            .with_message("Invalid suffix, must not contain path separators or null".into()));
    }

    if suffix.len() > MAX_SUFFIX_LEN {
        return Err(ValidationError::new("InvalidSuffix").with_message(
            format!("Invalid suffix, maximum len is {MAX_SUFFIX_LEN}").into(),
        ));
    }

    if !is_sanitized(suffix) {
        return Err(ValidationError::new("InvalidSuffix").with_message(
            format!(
                "Invalid suffix, try sanitizing like {:?}",
                sanitize(suffix)
            )
            .into(),
        ));
    }

    Ok(())
}

/// A destination directory may be missing (it is created on demand), but if
/// something is there it must be a directory.
pub fn validate_dir_if_exists<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.as_os_str().is_empty() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message("destination_dir must not be empty".into()));
    }
    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

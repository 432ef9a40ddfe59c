//! # bkup
//!
//! Makes a backup copy of one file or directory tree, next to the original or
//! under a chosen directory.
//!
//! ## Features
//!
//! - **Atomic writes**: every file lands through a temporary file, fsync and rename
//! - **Conflict policies**: skip identical backups, overwrite, skip existing, or version
//! - **Timestamped names**: `docs.20240102030405.bkup`
//! - **Exclusions**: glob patterns relative to the target
//! - **Parallel copying**: bounded worker pool with an optional deadline
//!
//! ## Quick Start
//!
//! ```no_run
//! use bkup::backup::backup_config::BackupConfig;
//!
//! let config = BackupConfig::builder().destination_dir("/tmp/out").build();
//! let report = config.run("docs", config.stop_token())?;
//! for record in report.records() {
//!     println!("{record}");
//! }
//! eprintln!("{report}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;

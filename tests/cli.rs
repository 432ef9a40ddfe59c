//! End-to-end runs of the `bkup` binary.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn bkup<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_bkup"))
        .args(args)
        .output()
        .expect("failed to run bkup")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn create_docs(dir: &Path) -> std::path::PathBuf {
    let docs = dir.join("docs");
    std::fs::create_dir_all(docs.join("sub")).unwrap();
    std::fs::write(docs.join("a.txt"), "alpha").unwrap();
    std::fs::write(docs.join("sub/b.txt"), "beta").unwrap();
    docs
}

#[test]
fn test_single_file_backup() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("test.txt");
    std::fs::write(&file, "hello").unwrap();

    let output = bkup([&file]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let backup = temp_dir.path().join("test.txt.bkup");
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), "hello");
    assert_eq!(
        stdout(&output).trim_end(),
        format!("COPIED\t{}\t{}", file.display(), backup.display())
    );
    assert!(stderr(&output).contains("copied: 1, skipped: 0, failed: 0"));
}

#[test]
fn test_directory_into_destination_dir() {
    let temp_dir = TempDir::new().unwrap();
    let docs = create_docs(temp_dir.path());
    let out = temp_dir.path().join("out");

    let output = bkup([docs.as_os_str(), OsStr::new("--destination-dir"), out.as_os_str()]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(std::fs::read_to_string(out.join("docs.bkup/a.txt")).unwrap(), "alpha");
    assert_eq!(std::fs::read_to_string(out.join("docs.bkup/sub/b.txt")).unwrap(), "beta");
    assert_eq!(stdout(&output).lines().count(), 4);
    assert!(stdout(&output).lines().all(|l| l.starts_with("COPIED\t")));
}

#[test]
fn test_missing_path_exits_2() {
    let temp_dir = TempDir::new().unwrap();

    let output = bkup([temp_dir.path().join("nope")]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("NotFound"));
    assert!(stdout(&output).is_empty());
}

#[test]
fn test_conflict_exits_1_and_keeps_old_backup() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("test.txt");
    std::fs::write(&file, "new").unwrap();
    let backup = temp_dir.path().join("test.txt.bkup");
    std::fs::write(&backup, "old").unwrap();

    let output = bkup([&file]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).starts_with("FAILED\t"));
    assert!(stderr(&output).contains("DestinationExists"));
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), "old");

    let output = bkup([file.as_os_str(), OsStr::new("--policy"), OsStr::new("version")]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(
        std::fs::read_to_string(temp_dir.path().join("test.txt.bkup.1")).unwrap(),
        "new"
    );
}

#[test]
fn test_rerun_skips_identical() {
    let temp_dir = TempDir::new().unwrap();
    let docs = create_docs(temp_dir.path());

    assert_eq!(bkup([&docs]).status.code(), Some(0));
    let output = bkup([&docs]);

    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).lines().all(|l| l.starts_with("SKIPPED\t")));
    assert!(stderr(&output).contains("copied: 0, skipped: 4, failed: 0"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let docs = create_docs(temp_dir.path());

    let output = bkup([docs.as_os_str(), OsStr::new("--dry-run")]);

    assert_eq!(output.status.code(), Some(0));
    assert!(!temp_dir.path().join("docs.bkup").exists());
    let out = stdout(&output);
    assert!(out.lines().all(|l| l.starts_with("PLAN\t")));
    assert!(out.contains(&format!("PLAN\tdirectory\t{}\t", docs.display())));
}

#[test]
fn test_exclude_and_json_report() {
    let temp_dir = TempDir::new().unwrap();
    let docs = create_docs(temp_dir.path());
    std::fs::write(docs.join("sub/skip.log"), "log").unwrap();
    let report = temp_dir.path().join("report.json");

    let output = bkup([
        docs.as_os_str(),
        OsStr::new("--exclude"),
        OsStr::new("**/*.log"),
        OsStr::new("--report"),
        report.as_os_str(),
    ]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(!temp_dir.path().join("docs.bkup/sub/skip.log").exists());
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["copied"], 4);
    assert_eq!(json["skipped"], 0);
    assert!(!stdout(&output).contains("skip.log"));
    assert_eq!(json["failed"], 0);
}

#[test]
fn test_config_file_and_invalid_values() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("test.txt");
    std::fs::write(&file, "hello").unwrap();
    let config = temp_dir.path().join("bkup.yml");
    std::fs::write(&config, "suffix: .old\n").unwrap();

    let output = bkup([file.as_os_str(), OsStr::new("--config"), config.as_os_str()]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(temp_dir.path().join("test.txt.old").exists());

    let output = bkup([file.as_os_str(), OsStr::new("--suffix"), OsStr::new("a/b")]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("InvalidConfig"));

    let output = bkup([file.as_os_str(), OsStr::new("--policy"), OsStr::new("sometimes")]);
    assert_eq!(output.status.code(), Some(2));
}

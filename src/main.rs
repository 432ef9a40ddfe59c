use bkup::backup::backup_config::{BackupConfig, CliOverrides};
use bkup::backup::conflict::ConflictPolicy;
use bkup::backup::plan::exclude::CustomDeserializedGlob;
use bkup::backup::report::{OperationReport, Outcome};
use bkup::backup::result_error::error::Error;
use bkup::backup::result_error::result::Result;
use bkup::backup::result_error::WithMsg;
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use validator::Validate;

const EXIT_OK: i32 = 0;
const EXIT_FAILED_ENTRIES: i32 = 1;
const EXIT_NOT_STARTED: i32 = 2;

/// Copy a file or directory tree to a sibling backup, atomically per file
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File or directory to back up
    path: PathBuf,

    /// Write backups under this directory instead of next to the target
    #[arg(short, long)]
    destination_dir: Option<PathBuf>,

    /// Suffix appended to the backup name [default: .bkup]
    #[arg(short, long)]
    suffix: Option<String>,

    /// Insert the run's local time into the backup name
    #[arg(short, long)]
    timestamp: bool,

    /// What to do when a backup already exists
    #[arg(short, long, value_enum)]
    policy: Option<ConflictPolicy>,

    /// Location of YAML config file, flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Glob of paths to leave out, relative to the target (repeatable)
    #[arg(short, long)]
    exclude: Vec<CustomDeserializedGlob>,

    /// Number of copy workers
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Stop starting new entries after this long, e.g. "30s" or "5m"
    #[arg(long, value_parser = parse_duration)]
    deadline: Option<Duration>,

    /// Print the plan without touching the filesystem
    #[arg(long)]
    dry_run: bool,

    /// Also write the final report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, humantime_serde::re::humantime::DurationError> {
    humantime_serde::re::humantime::parse_duration(s)
}

fn level_filter(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn load_config(args: &Args) -> Result<BackupConfig> {
    let file_config = match &args.config {
        Some(path) => BackupConfig::from_yaml_file(path)?,
        None => BackupConfig::default(),
    };
    let overrides = CliOverrides::builder()
        .maybe_destination_dir(args.destination_dir.clone())
        .maybe_suffix(args.suffix.clone())
        .timestamp(args.timestamp)
        .maybe_policy(args.policy)
        .exclude(args.exclude.clone())
        .maybe_jobs(args.jobs)
        .maybe_deadline(args.deadline)
        .build();
    let config = file_config.merge(overrides);
    config
        .validate()
        .map_err(Error::from)
        .with_msg("Config validation failed")?;
    Ok(config)
}

fn dry_run(config: &BackupConfig, path: &Path) -> Result<()> {
    let plan = config.plan(path)?;
    let mut out = std::io::stdout().lock();
    for entry in plan.iter() {
        writeln!(
            out,
            "PLAN\t{}\t{}\t{}",
            entry.kind(),
            entry.src().display(),
            entry.dst().display()
        )?;
    }
    for excluded in plan.excluded() {
        writeln!(
            out,
            "SKIPPED\t{}\t{}",
            excluded.src.display(),
            excluded.dst.display()
        )?;
    }
    Ok(())
}

fn print_report(report: &OperationReport) -> Result<()> {
    let mut out = std::io::stdout().lock();
    for record in report.records() {
        writeln!(out, "{record}")?;
    }
    out.flush()?;

    for record in report.records() {
        if record.outcome() != Outcome::Failed {
            continue;
        }
        if let (Some(kind), Some(msg)) = (record.error_kind(), record.error()) {
            eprintln!("{kind}: {msg}");
        }
    }
    eprintln!("{report}");
    Ok(())
}

fn write_json_report(report: &OperationReport, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush()?;
    Ok(())
}

fn run(args: &Args) -> Result<i32> {
    let config = load_config(args)?;
    if args.dry_run {
        dry_run(&config, &args.path)?;
        return Ok(EXIT_OK);
    }

    let report = config.run(&args.path, config.stop_token())?;
    print_report(&report)?;
    if let Some(path) = &args.report {
        if let Err(e) = write_json_report(&report, path)
            .with_msg(format!("Writing report to {:?} failed", path))
        {
            eprintln!("{}: {e}", e.kind_name());
            return Ok(EXIT_FAILED_ENTRIES);
        }
    }

    Ok(if report.is_success() {
        EXIT_OK
    } else {
        EXIT_FAILED_ENTRIES
    })
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level_filter(args.verbose))
        .init();

    let code = match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {e}", e.kind_name());
            EXIT_NOT_STARTED
        }
    };
    exit(code);
}

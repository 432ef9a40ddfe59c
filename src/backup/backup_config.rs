use crate::backup::conflict::ConflictPolicy;
use crate::backup::copy::{default_jobs, CopyEngine};
use crate::backup::function_path;
use crate::backup::plan::exclude::{CustomDeserializedGlob, Excluder};
use crate::backup::plan::naming::{Naming, DEFAULT_SUFFIX};
use crate::backup::plan::{Plan, Planner};
use crate::backup::report::OperationReport;
use crate::backup::resolve::{normalize, resolve_target};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::stop::StopToken;
use crate::backup::validate::{validate_dir_if_exists, validate_suffix};

use bon::Builder;
use chrono::{DateTime, Local};
use function_name::named;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of one backup run. Loaded from YAML, then overridden by the
/// command line.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Backups go under this directory instead of next to the target.
    #[serde(default)]
    #[builder(into)]
    #[validate(custom(function = validate_dir_if_exists))]
    #[getset(get = "pub")]
    destination_dir: Option<PathBuf>,
    #[serde(default = "default_suffix")]
    #[builder(default = default_suffix(), into)]
    #[validate(custom(function = validate_suffix))]
    #[getset(get = "pub")]
    suffix: String,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    timestamp: bool,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    policy: ConflictPolicy,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    exclude: Vec<CustomDeserializedGlob>,
    /// Worker count, defaults to the available parallelism capped at 8.
    #[serde(default)]
    #[validate(range(min = 1))]
    #[getset(get_copy = "pub")]
    jobs: Option<usize>,
    #[serde(default, with = "humantime_serde")]
    #[getset(get_copy = "pub")]
    deadline: Option<Duration>,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    #[getset(get_copy = "pub")]
    preserve_metadata: bool,
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BackupConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
            .with_msg(format!("Parse YAML config failed: {:?}", path))
    }

    /// Layers `cli` over `self`. Flags given on the command line win; switches
    /// are OR-ed and exclusion patterns are concatenated.
    pub fn merge(self, cli: CliOverrides) -> Self {
        let mut exclude = self.exclude;
        exclude.extend(cli.exclude);
        Self {
            destination_dir: cli.destination_dir.or(self.destination_dir),
            suffix: cli.suffix.unwrap_or(self.suffix),
            timestamp: cli.timestamp || self.timestamp,
            policy: cli.policy.unwrap_or(self.policy),
            exclude,
            jobs: cli.jobs.or(self.jobs),
            deadline: cli.deadline.or(self.deadline),
            preserve_metadata: self.preserve_metadata,
        }
    }

    pub fn naming<T: chrono::TimeZone>(&self, now: DateTime<T>) -> Naming
    where
        T::Offset: std::fmt::Display,
    {
        if self.timestamp {
            Naming::timestamped(&self.suffix, now)
        } else {
            Naming::new(&self.suffix)
        }
    }

    pub fn stop_token(&self) -> StopToken {
        self.deadline
            .map(StopToken::with_deadline)
            .unwrap_or_default()
    }

    /// Resolves `path` and plans its backup. Touches nothing on disk.
    ///
    /// A root that is a dangling symlink yields an empty plan carrying one
    /// exclusion instead of an error.
    #[named]
    pub fn plan<P: AsRef<Path>>(&self, path: P) -> Result<Plan> {
        let destination_dir = self
            .destination_dir
            .as_deref()
            .map(|d| std::path::absolute(d).map(|p| normalize(&p)))
            .transpose()
            .map_err(Error::from)
            .with_debug_object_and_fn_name(self.destination_dir.clone(), function_path!())?;
        let planner = Planner::builder()
            .naming(self.naming(Local::now()))
            .maybe_destination_dir(destination_dir)
            .excluder(Excluder::new(&self.exclude)?)
            .build();
        match resolve_target(path) {
            Ok(target) => planner.plan(&target),
            Err(Error::BrokenLink { link, target }) => Ok(planner.plan_broken_link(link, target)),
            Err(e) => Err(e),
        }
    }

    pub fn copy_engine(&self, stop: StopToken) -> CopyEngine {
        CopyEngine::builder()
            .policy(self.policy)
            .bypass_conflicts(self.timestamp)
            .preserve_metadata(self.preserve_metadata)
            .jobs(self.jobs.unwrap_or_else(default_jobs))
            .stop(stop)
            .build()
    }

    /// Plans and executes the backup of `path`.
    ///
    /// `Err` means the run could not start; per-entry failures land in the
    /// returned report.
    pub fn run<P: AsRef<Path>>(&self, path: P, stop: StopToken) -> Result<OperationReport> {
        let plan = self.plan(path)?;
        tracing::info!(
            "Backing up {:?} to {:?} ({} entries)",
            plan.source(),
            plan.root_dst(),
            plan.len()
        );
        self.copy_engine(stop).execute(plan)
    }
}

/// Values given on the command line. `None` leaves the config file's value.
#[derive(Clone, Debug, Default, Builder)]
pub struct CliOverrides {
    #[builder(into)]
    destination_dir: Option<PathBuf>,
    #[builder(into)]
    suffix: Option<String>,
    #[builder(default)]
    timestamp: bool,
    policy: Option<ConflictPolicy>,
    #[builder(default)]
    exclude: Vec<CustomDeserializedGlob>,
    jobs: Option<usize>,
    deadline: Option<Duration>,
}

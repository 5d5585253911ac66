//! Run configuration.
//!
//! A [`RunConfig`] can be read from a file and then have individual values
//! overridden, which is how the command line program layers its flags on
//! top of a configuration file.
//!
//! ```toml
//! n_events = "1e7"
//! n_process = 8
//! csv_input = "params.csv"
//! output = "combined.dat"
//! remove = true
//!
//! [compile]
//! compiler = "clang"
//! ```
//!
//! [`RunConfig`]: struct.RunConfig.html

use std::path::{Path, PathBuf};

use crate::aggregate::{AggregateOptions, HeaderMode};
use crate::error::Error;
use crate::job::{JobSource, NamingConfig};
use crate::pool::PoolConfig;
use crate::table::ParameterTable;
use crate::util::deser_struct_from_path;
use crate::{
    available_cores, Result, DEFAULT_EVENTS, DEFAULT_GRACE_SECS, DEFAULT_OUTPUT_SUFFIX,
    DEFAULT_POLL_SECS, DEFAULT_PREFIX,
};

/// Everything needed to set up a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of events for each simulation, passed on verbatim
    pub n_events: String,
    /// Maximum number of processes running at the same time, defaults to
    /// the number of available cores
    pub n_process: Option<usize>,
    /// Total number of jobs in identical mode, defaults to `n_process`
    pub t_process: Option<i64>,
    /// Parameter table, one job per row
    pub csv_input: Option<PathBuf>,
    /// Job name prefix in identical mode
    pub prefix: String,
    /// Output file suffix in identical mode
    pub output_suffix: String,
    /// Directory to move all outputs into
    pub dir: Option<PathBuf>,
    /// File to combine all outputs into
    pub output: Option<PathBuf>,
    /// Remove job directories once their output is collected
    pub remove: bool,
    /// Seconds between polls
    pub sleep_sec: f64,
    /// Seconds interrupted processes get before they're killed
    pub grace_sec: f64,
    /// Extra arguments passed to every simulation
    pub additional: Vec<String>,
    pub verbose: bool,
    pub header: HeaderMode,
    /// Remove job directories left over from a previous run before starting
    pub clean: bool,
    /// Directory job working directories are created in
    pub work_root: PathBuf,
    pub compile: CompileConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            n_events: DEFAULT_EVENTS.to_string(),
            n_process: None,
            t_process: None,
            csv_input: None,
            prefix: DEFAULT_PREFIX.to_string(),
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            dir: None,
            output: None,
            remove: false,
            sleep_sec: DEFAULT_POLL_SECS,
            grace_sec: DEFAULT_GRACE_SECS,
            additional: Vec::new(),
            verbose: false,
            header: HeaderMode::default(),
            clean: false,
            work_root: PathBuf::from("."),
            compile: CompileConfig::default(),
        }
    }
}

/// Tools used for turning an instrument file into an executable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Translates the instrument description into C
    pub translator: String,
    pub compiler: String,
    pub cflags: Vec<String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            translator: "mcxtrace".to_string(),
            compiler: "gcc".to_string(),
            cflags: vec![
                "-lm".to_string(),
                "-g".to_string(),
                "-O2".to_string(),
                "-std=c99".to_string(),
            ],
        }
    }
}

impl RunConfig {
    /// Reads configuration from a toml (or yaml) file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: RunConfig = deser_struct_from_path(path)?;
        debug!("read run configuration from {}", path.to_string_lossy());
        Ok(config)
    }

    /// Checks the configuration for invalid or contradicting values.
    pub fn validate(&self) -> Result<()> {
        if self.n_events.trim().is_empty() {
            return Err(Error::config("number of events can't be empty"));
        }
        if let Some(0) = self.n_process {
            return Err(Error::config("number of concurrent processes must be at least 1"));
        }
        if let Some(total) = self.t_process {
            if total < 1 {
                return Err(Error::config(format!(
                    "total process count must be a positive integer, got {}",
                    total
                )));
            }
        }
        if self.t_process.is_some() && self.csv_input.is_some() {
            return Err(Error::config(
                "total process count can't be used together with a parameter table, \
                 the number of table rows decides the total",
            ));
        }
        if !self.sleep_sec.is_finite() || self.sleep_sec <= 0. {
            return Err(Error::config(format!(
                "sleep interval must be a positive number of seconds, got {}",
                self.sleep_sec
            )));
        }
        if !self.grace_sec.is_finite() || self.grace_sec < 0. {
            return Err(Error::config(format!(
                "grace period can't be negative, got {}",
                self.grace_sec
            )));
        }
        self.aggregate_options().validate()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.n_process.unwrap_or_else(available_cores)
    }

    /// Reads the parameter table if there is one, otherwise returns the
    /// total for identical mode.
    pub fn job_source(&self) -> Result<JobSource> {
        match (&self.csv_input, self.t_process) {
            (Some(_), Some(_)) => Err(Error::config(
                "total process count can't be used together with a parameter table",
            )),
            (Some(path), None) => Ok(JobSource::table(ParameterTable::from_path(path)?)),
            (None, Some(total)) => Ok(JobSource::identical(total)),
            (None, None) => Ok(JobSource::identical(self.concurrency_limit() as i64)),
        }
    }

    /// Command line shared by all jobs, before any per-job arguments.
    pub fn base_argv(&self, executable: &Path) -> Vec<String> {
        let mut argv = vec![
            executable.to_string_lossy().to_string(),
            "-n".to_string(),
            self.n_events.clone(),
        ];
        argv.extend(self.additional.iter().cloned());
        argv
    }

    pub fn naming(&self) -> NamingConfig {
        NamingConfig {
            prefix: self.prefix.clone(),
            output_suffix: self.output_suffix.clone(),
            root: self.work_root.clone(),
        }
    }

    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            combine_into: self.output.clone(),
            relocate_to: self.dir.clone(),
            delete_job_dirs: self.remove,
            header: self.header,
        }
    }

    pub fn pool_config(&self) -> Result<PoolConfig> {
        PoolConfig::new(self.concurrency_limit(), self.sleep_sec, self.grace_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn assert_config_err(config: &RunConfig) {
        assert!(matches!(config.validate(), Err(Error::ConfigurationError(_))));
    }

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert!(config.concurrency_limit() >= 1);
        assert_eq!(config.aggregate_options(), AggregateOptions::default());
    }

    #[test]
    fn pool_config_carries_timing() {
        let mut config = RunConfig::default();
        config.n_process = Some(3);
        config.sleep_sec = 0.25;
        config.grace_sec = 4.;
        let pool = config.pool_config().unwrap();
        assert_eq!(pool.concurrency_limit, 3);
        assert_eq!(pool.poll_interval, Duration::from_millis(250));
        assert_eq!(pool.grace_period, Duration::from_secs(4));

        config.grace_sec = f64::INFINITY;
        assert!(config.pool_config().is_err());
    }

    #[test]
    fn contradicting_values_are_rejected() {
        let mut config = RunConfig::default();
        config.dir = Some(PathBuf::from("out"));
        config.output = Some(PathBuf::from("all.dat"));
        assert_config_err(&config);

        let mut config = RunConfig::default();
        config.remove = true;
        assert_config_err(&config);

        let mut config = RunConfig::default();
        config.t_process = Some(4);
        config.csv_input = Some(PathBuf::from("params.csv"));
        assert_config_err(&config);

        let mut config = RunConfig::default();
        config.n_process = Some(0);
        assert_config_err(&config);

        let mut config = RunConfig::default();
        config.sleep_sec = 0.;
        assert_config_err(&config);

        let mut config = RunConfig::default();
        config.grace_sec = -1.;
        assert_config_err(&config);
    }

    #[test]
    fn total_defaults_to_concurrency_limit() {
        let mut config = RunConfig::default();
        config.n_process = Some(6);
        let source = config.job_source().unwrap();
        assert_eq!(source.total, Some(6));
        assert!(source.table.is_none());
    }

    #[test]
    fn base_argv_layout() {
        let mut config = RunConfig::default();
        config.n_events = "1e6".to_string();
        config.additional = vec!["--seed=4".to_string(), "-g".to_string()];
        assert_eq!(
            config.base_argv(Path::new("/opt/sim.out")),
            vec!["/opt/sim.out", "-n", "1e6", "--seed=4", "-g"]
        );
    }

    #[test]
    fn read_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multirun.toml");
        fs::write(
            &path,
            r#"
n_process = 3
output = "all.dat"
remove = true
header = "first-line"

[compile]
compiler = "clang"
"#,
        )
        .unwrap();
        let config = RunConfig::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.n_process, Some(3));
        assert_eq!(config.header, HeaderMode::FirstLine);
        assert_eq!(config.compile.compiler, "clang");
        assert_eq!(config.compile.translator, "mcxtrace");
        assert_eq!(config.n_events, DEFAULT_EVENTS);
        let options = config.aggregate_options();
        assert!(options.delete_job_dirs);
        assert_eq!(options.combine_into, Some(PathBuf::from("all.dat")));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn read_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multirun.yaml");
        fs::write(&path, "t_process: 12\nprefix: run_\n").unwrap();
        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.t_process, Some(12));
        assert_eq!(config.naming().prefix, "run_");
    }
}

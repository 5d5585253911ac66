//! Job descriptors and the logic for building them.
//!
//! ## Identical and table modes
//!
//! In identical mode every job runs the same invocation, only the job name
//! (and with it the working directory and the output file) differs. This is
//! used for gathering more statistics with the same simulation.
//!
//! In table mode each row of a [`ParameterTable`] becomes one job. Every
//! column of the row is passed to the simulation as a `--<key>=<value>`
//! argument, and the reserved `filename` column names the job.
//!
//! [`ParameterTable`]: ../table/struct.ParameterTable.html

use std::path::{Path, PathBuf};

use fnv::FnvHashSet;

use crate::error::Error;
use crate::table::{ParameterRow, ParameterTable};
use crate::{Result, DEFAULT_OUTPUT_SUFFIX, DEFAULT_PREFIX, FILENAME_KEY, LOG_FILE_EXTENSION};

/// Ordinal of a job within a run, starting at 0.
pub type JobId = usize;

/// Immutable description of a single simulation invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub id: JobId,
    /// Unique name, also used for the working directory
    pub name: String,
    /// Directory the process is started in, never shared with another job
    pub working_dir: PathBuf,
    /// Program followed by its arguments
    pub argv: Vec<String>,
    /// Where the simulation is expected to leave its output
    pub expected_output_path: PathBuf,
    /// Captured stdout and stderr of the process
    pub log_path: PathBuf,
}

impl JobSpec {
    /// File name part of the expected output path.
    pub fn output_file_name(&self) -> String {
        self.expected_output_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Rules for naming jobs and placing their working directories.
#[derive(Debug, Clone, PartialEq)]
pub struct NamingConfig {
    /// Job name prefix in identical mode, followed by the job id
    pub prefix: String,
    /// Appended to the job name to get the output file name in identical mode
    pub output_suffix: String,
    /// Directory under which job working directories are created
    pub root: PathBuf,
}

impl Default for NamingConfig {
    fn default() -> Self {
        NamingConfig {
            prefix: DEFAULT_PREFIX.to_string(),
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            root: PathBuf::from("."),
        }
    }
}

/// Where the list of jobs comes from.
///
/// Exactly one of the two has to be set. Both fields are kept optional
/// so that contradicting input can be reported instead of silently
/// picking one of them.
#[derive(Debug, Clone, Default)]
pub struct JobSource {
    /// Total number of jobs in identical mode
    pub total: Option<i64>,
    /// One job per row in table mode
    pub table: Option<ParameterTable>,
}

impl JobSource {
    pub fn identical(total: i64) -> Self {
        JobSource {
            total: Some(total),
            table: None,
        }
    }

    pub fn table(table: ParameterTable) -> Self {
        JobSource {
            total: None,
            table: Some(table),
        }
    }
}

/// Builds the full, ordered list of jobs for a run.
///
/// Everything that can be checked about the jobs is checked here, so that
/// no process gets spawned for a run that is bound to be rejected halfway.
pub fn build(base_argv: &[String], source: &JobSource, naming: &NamingConfig) -> Result<Vec<JobSpec>> {
    if base_argv.is_empty() {
        return Err(Error::config("base command line is empty"));
    }
    match (&source.total, &source.table) {
        (Some(_), Some(_)) => Err(Error::config(
            "can't use a parameter table and a total process count at the same time",
        )),
        (None, None) => Err(Error::config(
            "either a parameter table or a total process count is required",
        )),
        (Some(total), None) => build_identical(base_argv, *total, naming),
        (None, Some(table)) => build_from_table(base_argv, table, naming),
    }
}

fn build_identical(base_argv: &[String], total: i64, naming: &NamingConfig) -> Result<Vec<JobSpec>> {
    if total < 1 {
        return Err(Error::config(format!(
            "total process count must be a positive integer, got {}",
            total
        )));
    }
    if naming.output_suffix == format!(".{}", LOG_FILE_EXTENSION) {
        return Err(Error::config(format!(
            "output suffix \"{}\" would make output files overwrite the job logs",
            naming.output_suffix
        )));
    }
    let mut jobs = Vec::with_capacity(total as usize);
    for id in 0..total as usize {
        let name = format!("{}{}", naming.prefix, id);
        let file_name = format!("{}{}", name, naming.output_suffix);
        let mut argv = base_argv.to_vec();
        argv.push(format!("--{}={}", FILENAME_KEY, file_name));
        jobs.push(new_spec(id, name, &file_name, argv, &naming.root));
    }
    // prefix could contain path separators or be empty
    check_unique_names(&jobs)?;
    Ok(jobs)
}

fn build_from_table(
    base_argv: &[String],
    table: &ParameterTable,
    naming: &NamingConfig,
) -> Result<Vec<JobSpec>> {
    table.validate_schema()?;
    if table.is_empty() {
        return Err(Error::config("parameter table doesn't contain any rows"));
    }
    if !table.has_column(FILENAME_KEY) {
        return Err(Error::config(format!(
            "parameter table must provide a \"{}\" column",
            FILENAME_KEY
        )));
    }

    let mut seen = FnvHashSet::default();
    let mut jobs = Vec::with_capacity(table.len());
    for (id, row) in table.rows().iter().enumerate() {
        let name = row_filename(row, id)?;
        if !seen.insert(name.clone()) {
            return Err(Error::DuplicateNameError(name));
        }
        let mut argv = base_argv.to_vec();
        for column in table.columns() {
            // presence of every column is guaranteed by the schema check
            if let Some(value) = row.get(column) {
                argv.push(format!("--{}={}", column, value));
            }
        }
        jobs.push(new_spec(id, name.clone(), &name, argv, &naming.root));
    }
    Ok(jobs)
}

fn row_filename(row: &ParameterRow, id: JobId) -> Result<String> {
    let value = row.get(FILENAME_KEY).map(|v| v.as_str()).unwrap_or("");
    if value.is_empty() {
        return Err(Error::config(format!(
            "row {} of the parameter table has no \"{}\" value",
            id + 1,
            FILENAME_KEY
        )));
    }
    let path = Path::new(value);
    if path.components().count() != 1 || path.file_name().is_none() {
        return Err(Error::config(format!(
            "\"{}\" value on row {} must be a plain file name, got \"{}\"",
            FILENAME_KEY,
            id + 1,
            value
        )));
    }
    Ok(value.to_string())
}

/// Removes working directories left over from a previous run with the same
/// job names, returns how many were removed.
pub fn clean_working_dirs(jobs: &[JobSpec]) -> Result<usize> {
    let mut removed = 0;
    for job in jobs {
        if job.working_dir.exists() {
            info!("removing stale job directory {}", job.working_dir.to_string_lossy());
            std::fs::remove_dir_all(&job.working_dir).map_err(|e| {
                Error::IoError(format!("{}: {}", job.working_dir.to_string_lossy(), e))
            })?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn new_spec(id: JobId, name: String, file_name: &str, argv: Vec<String>, root: &Path) -> JobSpec {
    let working_dir = root.join(&name);
    JobSpec {
        id,
        expected_output_path: working_dir.join(file_name),
        log_path: working_dir.join(format!("{}.{}", name, LOG_FILE_EXTENSION)),
        working_dir,
        argv,
        name,
    }
}

fn check_unique_names(jobs: &[JobSpec]) -> Result<()> {
    let mut seen = FnvHashSet::default();
    for job in jobs {
        if job.name.is_empty() || Path::new(&job.name).components().count() != 1 {
            return Err(Error::config(format!("invalid job name: \"{}\"", job.name)));
        }
        if !seen.insert(job.name.as_str()) {
            return Err(Error::DuplicateNameError(job.name.clone()));
        }
    }
    Ok(())
}

//! Collecting job output after the pool has drained.
//!
//! Output files of the successful jobs are either concatenated into a single
//! combined file or moved into a single directory. Job working directories
//! may then be removed, but only for the jobs whose output was collected.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;
use crate::job::{JobId, JobSpec};
use crate::summary::{FailureKind, RunSummary};
use crate::util;
use crate::Result;

/// Describes which part of an output file is its header.
///
/// When combining, the header of the first included file is kept and the
/// headers of all the other files are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderMode {
    /// Files are concatenated as they are
    None,
    /// The first line of each file is the header
    FirstLine,
    /// All the leading lines starting with `#` form the header
    Comment,
}

impl Default for HeaderMode {
    fn default() -> Self {
        HeaderMode::Comment
    }
}

impl FromStr for HeaderMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(HeaderMode::None),
            "first-line" | "first_line" => Ok(HeaderMode::FirstLine),
            "comment" => Ok(HeaderMode::Comment),
            _ => Err(Error::config(format!(
                "unknown header mode \"{}\", expected one of: comment, first-line, none",
                s
            ))),
        }
    }
}

impl HeaderMode {
    /// Length in bytes of the header at the start of `data`.
    pub fn header_len(&self, data: &[u8]) -> usize {
        match self {
            HeaderMode::None => 0,
            HeaderMode::FirstLine => line_end(data, 0),
            HeaderMode::Comment => {
                let mut pos = 0;
                while pos < data.len() && data[pos] == b'#' {
                    pos = line_end(data, pos);
                }
                pos
            }
        }
    }
}

/// Position right after the line break ending the line that starts at
/// `start`, or the end of data.
fn line_end(data: &[u8], start: usize) -> usize {
    match data[start..].iter().position(|b| *b == b'\n') {
        Some(n) => start + n + 1,
        None => data.len(),
    }
}

/// What to do with the output of the successful jobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    /// File to concatenate all outputs into
    pub combine_into: Option<PathBuf>,
    /// Directory to move all outputs into
    pub relocate_to: Option<PathBuf>,
    /// Remove job working directories once their output is collected
    pub delete_job_dirs: bool,
    pub header: HeaderMode,
}

impl AggregateOptions {
    pub fn validate(&self) -> Result<()> {
        if self.combine_into.is_some() && self.relocate_to.is_some() {
            return Err(Error::config(
                "combining output into a file and moving output into a directory \
                 can't be used together",
            ));
        }
        if self.delete_job_dirs && self.combine_into.is_none() && self.relocate_to.is_none() {
            return Err(Error::config(
                "removing job directories requires output to be either combined or moved",
            ));
        }
        Ok(())
    }

    /// Creates the directories output is going to be collected into, so that
    /// an unusable target is found before any job runs.
    pub fn prepare_targets(&self) -> Result<()> {
        if let Some(target) = &self.combine_into {
            prepare_combine_target(target)?;
        }
        if let Some(dir) = &self.relocate_to {
            fs::create_dir_all(dir)
                .map_err(|e| Error::RelocateError(dir.to_path_buf(), e.to_string()))?;
        }
        Ok(())
    }
}

fn prepare_combine_target(target: &Path) -> Result<()> {
    let combine_err = |e: std::io::Error| Error::CombineError(target.to_path_buf(), e.to_string());
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(combine_err)?;
        }
    }
    if target.is_dir() {
        return Err(Error::CombineError(
            target.to_path_buf(),
            "path is a directory".to_string(),
        ));
    }
    Ok(())
}

/// Collects output of the successful jobs of a finished run.
///
/// Successful jobs that didn't leave their expected output are marked as
/// failed. Problems with a single job's output are recorded on that job and
/// don't stop the rest from being processed. Only failing to set up the
/// combined file or the target directory is returned as an error.
pub fn aggregate(
    mut summary: RunSummary,
    jobs: &[JobSpec],
    options: &AggregateOptions,
) -> Result<RunSummary> {
    options.validate()?;

    for id in summary.succeeded_ids() {
        let path = &jobs[id].expected_output_path;
        if !path.is_file() {
            summary.demote(id, FailureKind::MissingOutput(path.clone()));
        }
    }

    let collected = if let Some(target) = &options.combine_into {
        if summary.succeeded_ids().is_empty() {
            warn!(
                "no successful jobs, not creating {}",
                target.to_string_lossy()
            );
            Vec::new()
        } else {
            let collected = combine(&mut summary, jobs, target, options.header)?;
            summary.combined_output = Some(target.clone());
            collected
        }
    } else if let Some(dir) = &options.relocate_to {
        let collected = relocate(&mut summary, jobs, dir)?;
        summary.relocated_to = Some(dir.clone());
        collected
    } else {
        Vec::new()
    };

    if options.delete_job_dirs {
        for id in collected {
            let dir = &jobs[id].working_dir;
            debug!("removing job directory {}", dir.to_string_lossy());
            if let Err(e) = fs::remove_dir_all(dir) {
                error!("failed removing {}: {}", dir.to_string_lossy(), e);
                summary.demote(
                    id,
                    FailureKind::Directory(format!("can't remove {}: {}", dir.to_string_lossy(), e)),
                );
            }
        }
    }

    Ok(summary)
}

/// Concatenates the output of all successful jobs into `target`, returns
/// the ids of the jobs that made it into the file.
///
/// The returned jobs are only reported once the file is synced to disk.
fn combine(
    summary: &mut RunSummary,
    jobs: &[JobSpec],
    target: &Path,
    header: HeaderMode,
) -> Result<Vec<JobId>> {
    prepare_combine_target(target)?;
    let combine_err = |e: std::io::Error| Error::CombineError(target.to_path_buf(), e.to_string());
    let file = File::create(target).map_err(combine_err)?;
    let mut writer = BufWriter::new(file);

    let mut collected = Vec::new();
    for id in summary.succeeded_ids() {
        let path = &jobs[id].expected_output_path;
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                error!("failed reading {}: {}", path.to_string_lossy(), e);
                summary.demote(
                    id,
                    FailureKind::Aggregation(format!("{}: {}", path.to_string_lossy(), e)),
                );
                continue;
            }
        };
        let skip = if collected.is_empty() {
            0
        } else {
            header.header_len(&data)
        };
        let body = &data[skip..];
        writer.write_all(body).map_err(combine_err)?;
        if !body.is_empty() && !body.ends_with(b"\n") {
            writer.write_all(b"\n").map_err(combine_err)?;
        }
        collected.push(id);
    }

    let file = writer
        .into_inner()
        .map_err(|e| combine_err(e.into_error()))?;
    file.sync_all().map_err(combine_err)?;
    info!(
        "combined output of {} jobs into {}",
        collected.len(),
        target.to_string_lossy()
    );
    Ok(collected)
}

/// Moves output of all successful jobs into `dir`, returns the ids of the
/// jobs whose output was moved.
fn relocate(summary: &mut RunSummary, jobs: &[JobSpec], dir: &Path) -> Result<Vec<JobId>> {
    fs::create_dir_all(dir).map_err(|e| Error::RelocateError(dir.to_path_buf(), e.to_string()))?;

    let mut collected = Vec::new();
    for id in summary.succeeded_ids() {
        let job = &jobs[id];
        let target = util::free_path_in(dir, &job.output_file_name(), &job.name);
        match util::move_file(&job.expected_output_path, &target) {
            Ok(()) => {
                debug!(
                    "moved {} to {}",
                    job.expected_output_path.to_string_lossy(),
                    target.to_string_lossy()
                );
                collected.push(id);
            }
            Err(e) => {
                error!(
                    "failed moving {}: {}",
                    job.expected_output_path.to_string_lossy(),
                    e
                );
                summary.demote(
                    id,
                    FailureKind::Aggregation(format!(
                        "can't move {} to {}: {}",
                        job.expected_output_path.to_string_lossy(),
                        target.to_string_lossy(),
                        e
                    )),
                );
            }
        }
    }
    info!("moved output of {} jobs to {}", collected.len(), dir.to_string_lossy());
    Ok(collected)
}

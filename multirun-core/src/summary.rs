//! Outcome of individual jobs and of the run as a whole.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::job::{JobId, JobSpec};

/// Reason a single job is counted as failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// Process couldn't be started at all
    Spawn(String),
    /// Process exited with a nonzero code
    Exit(i32),
    /// Process ended without an exit code, e.g. killed by a signal
    NoExitCode(Option<i32>),
    /// Working directory couldn't be created or was already in use
    Directory(String),
    /// Process exited successfully but didn't write its output file
    MissingOutput(PathBuf),
    /// Output file couldn't be collected after the run
    Aggregation(String),
    /// Process was terminated because the run was interrupted
    Interrupted,
}

impl FailureKind {
    /// Short name of the failure class.
    pub fn class(&self) -> &'static str {
        match self {
            FailureKind::Spawn(_) => "SpawnError",
            FailureKind::Exit(_) | FailureKind::NoExitCode(_) => "ProcessFailure",
            FailureKind::Directory(_) => "DirectoryError",
            FailureKind::MissingOutput(_) => "MissingOutputError",
            FailureKind::Aggregation(_) => "AggregationError",
            FailureKind::Interrupted => "Interrupted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Spawn(e) => write!(f, "failed to start process: {}", e),
            FailureKind::Exit(code) => write!(f, "exited with code {}", code),
            FailureKind::NoExitCode(Some(signal)) => write!(f, "terminated by signal {}", signal),
            FailureKind::NoExitCode(None) => write!(f, "terminated without exit code"),
            FailureKind::Directory(e) => write!(f, "working directory error: {}", e),
            FailureKind::MissingOutput(path) => {
                write!(f, "output file not found: {}", path.to_string_lossy())
            }
            FailureKind::Aggregation(e) => write!(f, "failed collecting output: {}", e),
            FailureKind::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded,
    Failed(FailureKind),
}

/// Final state of a single job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub outcome: JobOutcome,
    /// Exit code of the process if it ran and reported one
    pub exit_code: Option<i32>,
    /// Wall-clock time between spawn and observed termination
    pub duration: Duration,
}

impl JobRecord {
    pub fn succeeded(duration: Duration) -> Self {
        JobRecord {
            outcome: JobOutcome::Succeeded,
            exit_code: Some(0),
            duration,
        }
    }

    pub fn failed(kind: FailureKind, exit_code: Option<i32>, duration: Duration) -> Self {
        JobRecord {
            outcome: JobOutcome::Failed(kind),
            exit_code,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Succeeded
    }

    pub fn failure(&self) -> Option<&FailureKind> {
        match &self.outcome {
            JobOutcome::Failed(kind) => Some(kind),
            JobOutcome::Succeeded => None,
        }
    }
}

/// Single line of the failure listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedJob {
    pub id: JobId,
    pub name: String,
    pub kind: FailureKind,
    pub exit_code: Option<i32>,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Total number of jobs in the run
    pub total: usize,
    /// Records of all jobs that reached a final state, keyed by job id
    pub records: BTreeMap<JobId, JobRecord>,
    /// Jobs that were never started because the run was interrupted
    pub not_started: Vec<JobId>,
    pub interrupted: bool,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    /// Names of jobs, indexed by job id
    names: Vec<String>,
    /// Combined output file, if one was produced
    pub combined_output: Option<PathBuf>,
    /// Directory output files were moved to, if any
    pub relocated_to: Option<PathBuf>,
}

impl RunSummary {
    pub(crate) fn new(jobs: &[JobSpec], started_at: DateTime<Local>) -> Self {
        RunSummary {
            total: jobs.len(),
            records: BTreeMap::new(),
            not_started: Vec::new(),
            interrupted: false,
            started_at,
            elapsed: Duration::default(),
            names: jobs.iter().map(|j| j.name.clone()).collect(),
            combined_output: None,
            relocated_to: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.records.values().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.values().filter(|r| !r.is_success()).count()
    }

    /// Whether every single job ran and succeeded.
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.not_started.is_empty() && self.succeeded() == self.total
    }

    pub fn job_name(&self, id: JobId) -> &str {
        self.names.get(id).map(|n| n.as_str()).unwrap_or("")
    }

    /// Failures in job id order.
    pub fn failures(&self) -> Vec<FailedJob> {
        self.records
            .iter()
            .filter_map(|(id, record)| {
                record.failure().map(|kind| FailedJob {
                    id: *id,
                    name: self.job_name(*id).to_string(),
                    kind: kind.clone(),
                    exit_code: record.exit_code,
                })
            })
            .collect()
    }

    /// Ids of jobs that succeeded, in ascending order.
    pub fn succeeded_ids(&self) -> Vec<JobId> {
        self.records
            .iter()
            .filter(|(_, r)| r.is_success())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Marks a nominally successful job as failed.
    pub(crate) fn demote(&mut self, id: JobId, kind: FailureKind) {
        if let Some(record) = self.records.get_mut(&id) {
            warn!("job {} demoted to failure: {}", self.names[id], kind);
            record.outcome = JobOutcome::Failed(kind);
        }
    }
}

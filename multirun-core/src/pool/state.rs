//! Bookkeeping of a single pool run.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::job::{JobId, JobSpec};
use crate::process::RunningProcess;
use crate::summary::{JobRecord, RunSummary};

use super::PoolSnapshot;

/// Where every job of the run currently is.
///
/// Each job id lives in exactly one of `pending`, `active` and `finished`,
/// so the three together always account for every job of the run. Maps
/// are ordered so that iteration follows ascending job ids.
pub(crate) struct PoolState {
    pub total: usize,
    /// Jobs waiting to be started, in launch order
    pub pending: VecDeque<JobId>,
    /// Jobs with a live process
    pub active: BTreeMap<JobId, RunningProcess>,
    /// Jobs that reached a final state
    pub finished: BTreeMap<JobId, JobRecord>,
}

impl PoolState {
    pub fn new(total: usize) -> Self {
        PoolState {
            total,
            pending: (0..total).collect(),
            active: BTreeMap::new(),
            finished: BTreeMap::new(),
        }
    }

    /// Number of jobs currently accounted for, always equal to `total`.
    pub fn accounted(&self) -> usize {
        self.pending.len() + self.active.len() + self.finished.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    pub fn finish(&mut self, id: JobId, record: JobRecord) {
        debug_assert!(!self.finished.contains_key(&id));
        self.finished.insert(id, record);
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let succeeded = self.finished.values().filter(|r| r.is_success()).count();

        let running = self.active.len();
        let avg_percent = if running > 0 {
            self.active
                .values()
                .map(|p| p.progress.percent as f32)
                .sum::<f32>()
                / running as f32
        } else {
            0.
        };
        let etas: Vec<Duration> = self.active.values().filter_map(|p| p.progress.eta).collect();
        let finish_times: Vec<Duration> = self
            .finished
            .values()
            .filter(|r| r.is_success())
            .map(|r| r.duration)
            .collect();

        PoolSnapshot {
            total: self.total,
            waiting: self.pending.len(),
            running,
            succeeded,
            failed: self.finished.len() - succeeded,
            avg_percent,
            avg_eta: average(&etas),
            avg_finish_time: average(&finish_times),
        }
    }

    pub fn into_summary(
        self,
        jobs: &[JobSpec],
        started_at: DateTime<Local>,
        elapsed: Duration,
        interrupted: bool,
    ) -> RunSummary {
        debug_assert!(self.active.is_empty());
        let mut summary = RunSummary::new(jobs, started_at);
        summary.records = self.finished;
        summary.not_started = self.pending.into_iter().collect();
        summary.interrupted = interrupted;
        summary.elapsed = elapsed;
        summary
    }
}

fn average(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<Duration>() / durations.len() as u32)
    }
}

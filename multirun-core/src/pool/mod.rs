//! Process pool running a bounded number of jobs at the same time.

mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::error::Error;
use crate::job::JobSpec;
use crate::process::RunningProcess;
use crate::summary::{FailureKind, JobRecord, RunSummary};
use crate::{available_cores, Result, DEFAULT_GRACE_SECS, DEFAULT_POLL_SECS};

use self::state::PoolState;

/// Upper bound for the wait between checks while shutting down.
const SHUTDOWN_POLL_WAIT: Duration = Duration::from_millis(100);

/// Configuration settings for the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of processes running at the same time
    pub concurrency_limit: usize,
    /// Time between polls in the main loop
    pub poll_interval: Duration,
    /// Time terminated processes get to exit before being killed
    pub grace_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            concurrency_limit: available_cores(),
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_SECS),
            grace_period: Duration::from_secs_f64(DEFAULT_GRACE_SECS),
        }
    }
}

impl PoolConfig {
    pub fn new(concurrency_limit: usize, poll_interval_secs: f64, grace_secs: f64) -> Result<Self> {
        if concurrency_limit < 1 {
            return Err(Error::config("number of concurrent processes must be at least 1"));
        }
        if !poll_interval_secs.is_finite() || poll_interval_secs <= 0. {
            return Err(Error::config(format!(
                "poll interval must be a positive number of seconds, got {}",
                poll_interval_secs
            )));
        }
        if !grace_secs.is_finite() || grace_secs < 0. {
            return Err(Error::config(format!(
                "grace period can't be negative, got {}",
                grace_secs
            )));
        }
        Ok(PoolConfig {
            concurrency_limit,
            poll_interval: Duration::from_secs_f64(poll_interval_secs),
            grace_period: Duration::from_secs_f64(grace_secs),
        })
    }
}

/// Point-in-time view of the pool, passed to observers on every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub total: usize,
    pub waiting: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Average percentage done of the running jobs
    pub avg_percent: f32,
    /// Average estimated run time of the running jobs that reported one
    pub avg_eta: Option<Duration>,
    /// Average run time of the jobs that succeeded so far
    pub avg_finish_time: Option<Duration>,
}

impl PoolSnapshot {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Receives notifications about what's happening inside the pool.
///
/// All methods are called from the supervising thread, between polls.
pub trait PoolObserver {
    /// Called right before the job's process is spawned.
    fn job_started(&mut self, _job: &JobSpec) {}
    /// Called once the job reached its final state.
    fn job_finished(&mut self, _job: &JobSpec, _record: &JobRecord) {}
    /// Called once per iteration of the main loop, after new jobs were
    /// admitted, and once more when the run is over.
    fn tick(&mut self, _snapshot: &PoolSnapshot) {}
}

impl PoolObserver for () {}

/// Runs jobs as child processes, at most `concurrency_limit` at a time.
///
/// # Admission
///
/// Jobs are started strictly in the order they were given. Whenever a
/// process finishes, the freed slot goes to the next job in line. Jobs
/// that fail to start are recorded as failed right away and don't take
/// up a slot.
///
/// # Interrupting
///
/// The pool keeps running as long as its `running` flag stays set. Once
/// the flag is cleared, no more jobs are started, all running processes
/// are asked to terminate and, after the grace period, killed.
pub struct Pool {
    pub config: PoolConfig,
    running: Arc<AtomicBool>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_running_flag(config, Arc::new(AtomicBool::new(true)))
    }

    /// Creates a pool that stops as soon as the given flag is set to false.
    pub fn with_running_flag(config: PoolConfig, running: Arc<AtomicBool>) -> Self {
        Pool { config, running }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Runs all the jobs to completion.
    pub fn run(&self, jobs: &[JobSpec]) -> RunSummary {
        self.run_observed(jobs, &mut ())
    }

    /// Runs all the jobs to completion, reporting to the given observer.
    ///
    /// Jobs are identified by their position in `jobs`, which is what
    /// [`job::build`] assigns as their id.
    ///
    /// [`job::build`]: ../job/fn.build.html
    pub fn run_observed(&self, jobs: &[JobSpec], observer: &mut dyn PoolObserver) -> RunSummary {
        debug_assert!(jobs.iter().enumerate().all(|(n, j)| j.id == n));
        let started_at = Local::now();
        let clock = Instant::now();

        let limit = self.config.concurrency_limit.min(jobs.len()).max(1);
        if limit < self.config.concurrency_limit {
            info!(
                "lowering concurrency limit from {} to {} to match the number of jobs",
                self.config.concurrency_limit, limit
            );
        }

        let mut state = PoolState::new(jobs.len());
        let mut interrupted = false;
        while !state.is_drained() {
            if !self.running.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }

            self.admit(&mut state, jobs, limit, observer);
            debug_assert_eq!(state.accounted(), jobs.len());
            debug_assert!(state.active.len() <= limit);
            observer.tick(&state.snapshot());

            // every job so far failed to start, no need to wait
            if state.active.is_empty() {
                continue;
            }

            // wait a little to reduce polling overhead
            thread::sleep(self.config.poll_interval);
            self.poll(&mut state, jobs, observer);
            debug_assert_eq!(state.accounted(), jobs.len());
        }

        if interrupted {
            self.shutdown(&mut state, jobs, observer);
        }
        observer.tick(&state.snapshot());

        let summary = state.into_summary(jobs, started_at, clock.elapsed(), interrupted);
        info!(
            "run finished: {} succeeded, {} failed, {} not started",
            summary.succeeded(),
            summary.failed(),
            summary.not_started.len()
        );
        summary
    }

    /// Starts pending jobs until the pool is full or nothing is left.
    fn admit(
        &self,
        state: &mut PoolState,
        jobs: &[JobSpec],
        limit: usize,
        observer: &mut dyn PoolObserver,
    ) {
        while state.active.len() < limit {
            let id = match state.pending.pop_front() {
                Some(id) => id,
                None => break,
            };
            let job = &jobs[id];
            debug!("starting job {}: {}", job.name, job.argv.join(" "));
            observer.job_started(job);
            match RunningProcess::start(job) {
                Ok(process) => {
                    trace!("job {} running with pid {}", job.name, process.pid());
                    state.active.insert(id, process);
                }
                Err(kind) => {
                    info!("job {} failed to start: {}", job.name, kind);
                    let record = JobRecord::failed(kind, None, Duration::default());
                    observer.job_finished(job, &record);
                    state.finish(id, record);
                }
            }
        }
    }

    /// Checks every running process once, moving the finished ones out of
    /// the active set in ascending job id order.
    fn poll(&self, state: &mut PoolState, jobs: &[JobSpec], observer: &mut dyn PoolObserver) {
        let mut done = Vec::new();
        for (id, process) in state.active.iter_mut() {
            match process.try_finish() {
                Some(record) => done.push((*id, record)),
                None => process.update_progress(),
            }
        }
        for (id, record) in done {
            state.active.remove(&id);
            let job = &jobs[id];
            match record.failure() {
                None => info!("job {} finished in {:?}", job.name, record.duration),
                Some(kind) => info!("job {} failed: {}", job.name, kind),
            }
            observer.job_finished(job, &record);
            state.finish(id, record);
        }
    }

    /// Terminates all running processes, killing whatever is still alive
    /// once the grace period is over.
    fn shutdown(&self, state: &mut PoolState, jobs: &[JobSpec], observer: &mut dyn PoolObserver) {
        warn!(
            "run interrupted: terminating {} running jobs, {} jobs won't be started",
            state.active.len(),
            state.pending.len()
        );
        for process in state.active.values_mut() {
            if let Err(e) = process.terminate() {
                warn!("failed terminating job {}: {}", jobs[process.job_id].name, e);
            }
        }

        let deadline = Instant::now() + self.config.grace_period;
        let wait = self.config.poll_interval.min(SHUTDOWN_POLL_WAIT);
        while !state.active.is_empty() && Instant::now() < deadline {
            thread::sleep(wait);
            let mut done = Vec::new();
            for (id, process) in state.active.iter_mut() {
                if let Some(record) = process.try_finish() {
                    done.push((*id, record));
                }
            }
            for (id, record) in done {
                state.active.remove(&id);
                self.finish_interrupted(state, &jobs[id], record, observer);
            }
        }

        let remaining: Vec<_> = state.active.keys().cloned().collect();
        for id in remaining {
            if let Some(mut process) = state.active.remove(&id) {
                warn!("job {} still running after grace period, killing it", jobs[id].name);
                let duration = process.get_uptime();
                process.kill();
                let record = JobRecord::failed(FailureKind::Interrupted, None, duration);
                self.finish_interrupted(state, &jobs[id], record, observer);
            }
        }
    }

    fn finish_interrupted(
        &self,
        state: &mut PoolState,
        job: &JobSpec,
        record: JobRecord,
        observer: &mut dyn PoolObserver,
    ) {
        let record = JobRecord::failed(FailureKind::Interrupted, record.exit_code, record.duration);
        observer.job_finished(job, &record);
        state.finish(job.id, record);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::job::{build, JobId, JobSource, NamingConfig};
    use crate::testing::sim_jobs;

    /// Records everything it gets told and checks the pool invariants.
    #[derive(Default)]
    struct Recorder {
        started: Vec<JobId>,
        finished: Vec<JobId>,
        max_running: usize,
        ticks: usize,
        limit: usize,
    }

    impl PoolObserver for Recorder {
        fn job_started(&mut self, job: &JobSpec) {
            self.started.push(job.id);
        }
        fn job_finished(&mut self, job: &JobSpec, _record: &JobRecord) {
            self.finished.push(job.id);
        }
        fn tick(&mut self, snapshot: &PoolSnapshot) {
            assert_eq!(
                snapshot.waiting + snapshot.running + snapshot.finished(),
                snapshot.total
            );
            assert!(snapshot.running <= self.limit);
            self.max_running = self.max_running.max(snapshot.running);
            self.ticks += 1;
        }
    }

    fn config(limit: usize) -> PoolConfig {
        PoolConfig {
            concurrency_limit: limit,
            poll_interval: Duration::from_millis(20),
            grace_period: Duration::from_secs(2),
        }
    }

    #[test]
    fn identical_jobs_fill_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = sim_jobs(dir.path(), 8, "sleep 0.3");
        let mut recorder = Recorder {
            limit: 4,
            ..Recorder::default()
        };
        let summary = Pool::new(config(4)).run_observed(&jobs, &mut recorder);

        assert_eq!(summary.succeeded(), 8);
        assert_eq!(summary.failed(), 0);
        assert!(summary.is_success());
        assert_eq!(recorder.max_running, 4);
        assert_eq!(recorder.started, (0..8).collect::<Vec<_>>());
        assert_eq!(recorder.finished.len(), 8);
        for job in &jobs {
            assert!(job.expected_output_path.is_file());
        }
    }

    #[test]
    fn launch_order_is_fifo_regardless_of_completion() {
        let dir = tempfile::tempdir().unwrap();
        // earlier jobs take longer, so later ones finish first
        let script = r#"case "$f" in sim_data_0.dat) sleep 0.4;; sim_data_1.dat) sleep 0.2;; esac"#;
        let jobs = sim_jobs(dir.path(), 6, script);
        let mut recorder = Recorder {
            limit: 2,
            ..Recorder::default()
        };
        let summary = Pool::new(config(2)).run_observed(&jobs, &mut recorder);
        assert_eq!(summary.succeeded(), 6);
        assert_eq!(recorder.started, vec![0, 1, 2, 3, 4, 5]);
        assert_ne!(recorder.finished[0], 0);
    }

    #[test]
    fn failed_job_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = sim_jobs(dir.path(), 8, r#"[ "$f" = sim_data_5.dat ] && exit 1"#);
        let summary = Pool::new(config(4)).run(&jobs);
        assert_eq!(summary.succeeded(), 7);
        assert_eq!(summary.failed(), 1);
        let failures = summary.failures();
        assert_eq!(failures[0].name, "sim_data_5");
        assert_eq!(failures[0].exit_code, Some(1));
        assert_eq!(failures[0].kind, FailureKind::Exit(1));
    }

    #[test]
    fn spawn_failures_are_recorded_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let naming = NamingConfig {
            root: dir.path().to_path_buf(),
            ..NamingConfig::default()
        };
        let base = vec!["/nonexistent/sim.out".to_string()];
        let jobs = build(&base, &JobSource::identical(3), &naming).unwrap();
        let mut recorder = Recorder {
            limit: 2,
            ..Recorder::default()
        };
        let summary = Pool::new(config(2)).run_observed(&jobs, &mut recorder);
        assert_eq!(summary.failed(), 3);
        assert!(summary
            .failures()
            .iter()
            .all(|f| f.kind.class() == "SpawnError"));
        assert_eq!(recorder.started, vec![0, 1, 2]);
    }

    #[test]
    fn occupied_working_dir_fails_only_that_job() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = sim_jobs(dir.path(), 3, "");
        std::fs::create_dir_all(&jobs[1].working_dir).unwrap();
        std::fs::write(jobs[1].working_dir.join("leftover"), "x").unwrap();
        let summary = Pool::new(config(3)).run(&jobs);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failures()[0].kind.class(), "DirectoryError");
    }

    #[test]
    fn interrupt_terminates_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = sim_jobs(dir.path(), 5, "sleep 30");
        let pool = Pool::new(config(2));
        let flag = pool.running_flag();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            flag.store(false, Ordering::SeqCst);
        });
        let clock = Instant::now();
        let summary = pool.run(&jobs);
        stopper.join().unwrap();

        assert!(clock.elapsed() < Duration::from_secs(10));
        assert!(summary.interrupted);
        assert!(!summary.is_success());
        assert_eq!(summary.records.len(), 2);
        assert!(summary
            .records
            .values()
            .all(|r| r.failure() == Some(&FailureKind::Interrupted)));
        assert_eq!(summary.not_started, vec![2, 3, 4]);
    }

    #[test]
    fn jobs_ignoring_terminate_are_killed_after_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = sim_jobs(dir.path(), 2, "trap '' TERM; sleep 5");
        let pool = Pool::new(PoolConfig {
            grace_period: Duration::from_millis(300),
            ..config(2)
        });
        let flag = pool.running_flag();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            flag.store(false, Ordering::SeqCst);
        });
        let clock = Instant::now();
        let summary = pool.run(&jobs);
        stopper.join().unwrap();

        // well below the 5 seconds the jobs would take on their own
        assert!(clock.elapsed() < Duration::from_secs(3));
        assert!(summary.interrupted);
        assert_eq!(summary.records.len(), 2);
        assert!(summary
            .records
            .values()
            .all(|r| r.failure() == Some(&FailureKind::Interrupted)));
        assert!(summary.not_started.is_empty());
    }

    #[test]
    fn limit_is_clamped_to_job_count() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = sim_jobs(dir.path(), 2, "sleep 0.1");
        let mut recorder = Recorder {
            limit: 2,
            ..Recorder::default()
        };
        let summary = Pool::new(config(16)).run_observed(&jobs, &mut recorder);
        assert_eq!(summary.succeeded(), 2);
        assert!(recorder.ticks >= 2);
    }

    #[test]
    fn config_validation() {
        assert!(PoolConfig::new(0, 1., 10.).is_err());
        assert!(PoolConfig::new(2, 0., 10.).is_err());
        assert!(PoolConfig::new(2, f64::NAN, 10.).is_err());
        assert!(PoolConfig::new(2, 1., -1.).is_err());
        let config = PoolConfig::new(3, 0.5, 2.).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.grace_period, Duration::from_secs(2));
    }
}

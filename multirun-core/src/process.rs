//! Child process handling for a single job.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::job::{JobId, JobSpec};
use crate::progress::{LogTail, Progress};
use crate::summary::{FailureKind, JobRecord};

/// Running simulation process bound to a single job.
///
/// # Scoped acquisition
///
/// Creating the working directory, opening the log file and spawning the
/// process happen together in [`start`]. The process is owned here until a
/// terminal state is observed. If a `RunningProcess` gets dropped before
/// that, the child is killed and reaped so that it never outlives its
/// supervisor with nobody left to decide what happens to its files.
///
/// [`start`]: #method.start
#[derive(Debug)]
pub struct RunningProcess {
    pub job_id: JobId,
    /// Handle to the child process
    handle: Child,
    /// Spawn time of the process
    started_at: Instant,
    /// Reader for the captured output
    tail: LogTail,
    /// Latest progress reported by the simulation
    pub progress: Progress,
    /// Whether the exit status was already collected
    reaped: bool,
}

impl RunningProcess {
    /// Prepares the job's working directory and spawns the process inside
    /// it, with both stdout and stderr going to the job's log file.
    pub fn start(job: &JobSpec) -> Result<Self, FailureKind> {
        prepare_working_dir(&job.working_dir).map_err(FailureKind::Directory)?;

        let log = File::create(&job.log_path).map_err(|e| {
            FailureKind::Directory(format!(
                "can't create log file {}: {}",
                job.log_path.to_string_lossy(),
                e
            ))
        })?;
        let log_err = log
            .try_clone()
            .map_err(|e| FailureKind::Spawn(format!("can't duplicate log handle: {}", e)))?;

        let (program, args) = match job.argv.split_first() {
            Some(split) => split,
            None => return Err(FailureKind::Spawn("empty command line".to_string())),
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&job.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        let started_at = Instant::now();
        let handle = cmd
            .spawn()
            .map_err(|e| FailureKind::Spawn(format!("{}: {}", program, e)))?;

        Ok(RunningProcess {
            job_id: job.id,
            handle,
            started_at,
            tail: LogTail::new(job.log_path.clone()),
            progress: Progress::default(),
            reaped: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.handle.id()
    }

    pub fn get_uptime(&self) -> Duration {
        Instant::now() - self.started_at
    }

    /// Checks whether the process has terminated, without blocking.
    ///
    /// Returns the job's record once the process is gone, `None` while it's
    /// still running.
    pub fn try_finish(&mut self) -> Option<JobRecord> {
        if self.reaped {
            return None;
        }
        match self.handle.try_wait() {
            Ok(Some(status)) => {
                self.reaped = true;
                Some(record_from_status(status, self.get_uptime()))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "failed checking status of process {} (job {}): {}",
                    self.pid(),
                    self.job_id,
                    e
                );
                self.kill();
                Some(JobRecord::failed(
                    FailureKind::NoExitCode(None),
                    None,
                    self.get_uptime(),
                ))
            }
        }
    }

    /// Reads any new output of the process and updates progress.
    pub fn update_progress(&mut self) {
        match self.tail.read_lines() {
            Ok(lines) => {
                for line in lines {
                    trace!("job {}: {}", self.job_id, line);
                    self.progress.update_from_line(&line);
                }
            }
            Err(e) => trace!("job {}: can't read log: {}", self.job_id, e),
        }
    }

    /// Asks the process to terminate.
    ///
    /// On Unix this sends `SIGTERM`, giving the simulation a chance to save
    /// its data before exiting. Elsewhere the process is killed outright.
    pub fn terminate(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        send_terminate(&mut self.handle)
    }

    /// Kills the process and waits for it to be gone.
    pub fn kill(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.handle.kill() {
            // already exited
            debug!("kill job {}: {}", self.job_id, e);
        }
        if let Err(e) = self.handle.wait() {
            error!("failed reaping process of job {}: {}", self.job_id, e);
        }
        self.reaped = true;
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if !self.reaped {
            warn!("job {} dropped while still running, killing it", self.job_id);
            self.kill();
        }
    }
}

/// Creates the working directory, or reuses it if it exists and is empty.
pub fn prepare_working_dir(dir: &Path) -> Result<(), String> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {
            let mut entries = fs::read_dir(dir).map_err(|e| e.to_string())?;
            if entries.next().is_some() {
                Err(format!(
                    "{} already exists and is not empty",
                    dir.to_string_lossy()
                ))
            } else {
                Ok(())
            }
        }
        Ok(_) => Err(format!(
            "{} already exists and is not a directory",
            dir.to_string_lossy()
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(dir).map_err(|e| {
            format!("can't create {}: {}", dir.to_string_lossy(), e)
        }),
        Err(e) => Err(format!("{}: {}", dir.to_string_lossy(), e)),
    }
}

#[cfg(unix)]
fn send_terminate(handle: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    kill(Pid::from_raw(handle.id() as i32), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn send_terminate(handle: &mut Child) -> io::Result<()> {
    handle.kill()
}

fn record_from_status(status: ExitStatus, duration: Duration) -> JobRecord {
    match status.code() {
        Some(0) => JobRecord::succeeded(duration),
        Some(code) => JobRecord::failed(FailureKind::Exit(code), Some(code), duration),
        None => JobRecord::failed(FailureKind::NoExitCode(signal_of(&status)), None, duration),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::thread;

    fn job(root: &Path, script: &str) -> JobSpec {
        let working_dir = root.join("job");
        JobSpec {
            id: 0,
            name: "job".to_string(),
            expected_output_path: working_dir.join("out.dat"),
            log_path: working_dir.join("job.log"),
            working_dir,
            argv: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
        }
    }

    fn wait_for(process: &mut RunningProcess) -> JobRecord {
        loop {
            if let Some(record) = process.try_finish() {
                return record;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn runs_in_working_dir_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), "echo hello; echo oops >&2; pwd > where.txt");
        let mut process = RunningProcess::start(&job).unwrap();
        let record = wait_for(&mut process);
        assert!(record.is_success());
        let log = fs::read_to_string(&job.log_path).unwrap();
        assert!(log.contains("hello") && log.contains("oops"));
        let cwd = fs::read_to_string(job.working_dir.join("where.txt")).unwrap();
        assert_eq!(
            PathBuf::from(cwd.trim()).canonicalize().unwrap(),
            job.working_dir.canonicalize().unwrap()
        );
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = RunningProcess::start(&job(dir.path(), "exit 3")).unwrap();
        let record = wait_for(&mut process);
        assert_eq!(record.outcome, crate::JobOutcome::Failed(FailureKind::Exit(3)));
        assert_eq!(record.exit_code, Some(3));
    }

    #[test]
    fn terminate_sends_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = RunningProcess::start(&job(dir.path(), "sleep 30")).unwrap();
        process.terminate().unwrap();
        let record = wait_for(&mut process);
        assert_eq!(
            record.failure(),
            Some(&FailureKind::NoExitCode(Some(nix::sys::signal::Signal::SIGTERM as i32)))
        );
    }

    #[test]
    fn missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job(dir.path(), "");
        job.argv = vec!["/nonexistent/simulation.out".to_string()];
        match RunningProcess::start(&job) {
            Err(FailureKind::Spawn(_)) => (),
            other => panic!("unexpected: {:?}", other.map(|p| p.job_id)),
        }
    }

    #[test]
    fn non_empty_dir_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), "true");
        fs::create_dir_all(&job.working_dir).unwrap();
        fs::write(job.working_dir.join("stale.dat"), "old").unwrap();
        assert!(matches!(
            RunningProcess::start(&job),
            Err(FailureKind::Directory(_))
        ));
        assert!(prepare_working_dir(&dir.path().join("fresh")).is_ok());
        assert!(prepare_working_dir(&dir.path().join("fresh")).is_ok());
    }

    #[test]
    fn progress_is_read_from_log() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path(), "echo 'Trace ETA 2 [min] % 10 20'");
        let mut process = RunningProcess::start(&job).unwrap();
        wait_for(&mut process);
        process.update_progress();
        assert_eq!(process.progress.percent, 20);
        assert_eq!(process.progress.eta, Some(Duration::from_secs(120)));
    }
}

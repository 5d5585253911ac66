//! Printing run status on the command line.

use std::io::{self, Write};

use colored::*;

use multirun::{JobRecord, JobSpec, PoolObserver, PoolSnapshot, RunSummary};

use crate::util::{digits, format_hms};

/// Keeps messages and the in-place status line from overwriting each other.
///
/// The status line is printed without a line break so that the next status
/// can replace it. A regular message printed after it first moves on to a
/// fresh line.
#[derive(Default)]
pub struct Console {
    /// Whether the last thing printed was a status line
    status_shown: bool,
}

impl Console {
    pub fn newline(&mut self) {
        if self.status_shown {
            self.status_shown = false;
            println!();
        }
    }

    pub fn print(&mut self, msg: &str) {
        self.newline();
        println!("{}", msg);
    }

    pub fn status(&mut self, msg: &str) {
        self.status_shown = true;
        print!("{}\r", msg);
        let _ = io::stdout().flush();
    }
}

/// Field widths used for zero-padding status line counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Widths {
    pub total: usize,
    pub running: usize,
}

impl Widths {
    pub fn new(total: usize, concurrency_limit: usize) -> Self {
        Widths {
            total: digits(total),
            running: digits(concurrency_limit),
        }
    }
}

/// Formats the single line overview of the pool.
pub fn status_line(s: &PoolSnapshot, w: Widths) -> String {
    format!(
        "  {:0tw$} waiting, {:0rw$} running {:02}% ({}), {:0tw$} finished ({}), {:0tw$} errors",
        s.waiting,
        s.running,
        s.avg_percent.round() as u32,
        format_hms(s.avg_eta.unwrap_or_default()),
        s.succeeded,
        format_hms(s.avg_finish_time.unwrap_or_default()),
        s.failed,
        tw = w.total,
        rw = w.running,
    )
}

/// Reports pool events on the console.
pub struct Reporter {
    pub console: Console,
    verbose: bool,
    widths: Widths,
}

impl Reporter {
    pub fn new(verbose: bool, widths: Widths) -> Self {
        Reporter {
            console: Console::default(),
            verbose,
            widths,
        }
    }

    /// Prints the final overview of the run.
    pub fn print_summary(&mut self, summary: &RunSummary) {
        self.console.newline();
        println!();
        println!(
            "{} jobs: {} succeeded, {} failed{}",
            summary.total,
            summary.succeeded().to_string().green(),
            summary.failed().to_string().red(),
            if summary.not_started.is_empty() {
                String::new()
            } else {
                format!(", {} not started", summary.not_started.len())
            }
        );
        for failure in summary.failures() {
            let code = match failure.exit_code {
                Some(code) => format!(" (exit code {})", code),
                None => String::new(),
            };
            println!(
                "  {} {}: {}: {}{}",
                "ERROR".red(),
                failure.name,
                failure.kind.class(),
                failure.kind,
                code
            );
        }
        if let Some(path) = &summary.combined_output {
            println!("Combined output written to {}", path.to_string_lossy());
        }
        if let Some(dir) = &summary.relocated_to {
            println!("Output files moved to {}", dir.to_string_lossy());
        }
        if summary.interrupted {
            println!("{}", "Run was interrupted".yellow());
        }
        println!(
            "Total time elapsed since {}: {} hours:minutes:seconds",
            summary.started_at.format("%Y-%m-%d %H:%M:%S"),
            format_hms(summary.elapsed)
        );
    }
}

impl PoolObserver for Reporter {
    fn job_started(&mut self, job: &JobSpec) {
        if self.verbose {
            self.console.print(&format!("{} {}", "start".cyan(), job.argv.join(" ")));
        }
    }

    fn job_finished(&mut self, job: &JobSpec, record: &JobRecord) {
        match record.failure() {
            None => {
                if self.verbose {
                    self.console.print(&format!(
                        "{} {} in {}",
                        "done".green(),
                        job.name,
                        format_hms(record.duration)
                    ));
                }
            }
            Some(kind) => self.console.print(&format!(
                "{} {}: {} (see {})",
                "ERROR".red(),
                job.name,
                kind,
                job.log_path.to_string_lossy()
            )),
        }
    }

    fn tick(&mut self, snapshot: &PoolSnapshot) {
        let line = status_line(snapshot, self.widths);
        self.console.status(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_line_is_zero_padded() {
        let snapshot = PoolSnapshot {
            total: 120,
            waiting: 100,
            running: 4,
            succeeded: 15,
            failed: 1,
            avg_percent: 7.4,
            avg_eta: Some(Duration::from_secs(432)),
            avg_finish_time: Some(Duration::from_secs(3725)),
        };
        assert_eq!(
            status_line(&snapshot, Widths::new(120, 16)),
            "  100 waiting, 04 running 07% (0:07:12), 015 finished (1:02:05), 001 errors"
        );
    }

    #[test]
    fn status_line_without_estimates() {
        let snapshot = PoolSnapshot {
            total: 3,
            waiting: 3,
            running: 0,
            succeeded: 0,
            failed: 0,
            avg_percent: 0.,
            avg_eta: None,
            avg_finish_time: None,
        };
        assert_eq!(
            status_line(&snapshot, Widths::new(3, 3)),
            "  3 waiting, 0 running 00% (0:00:00), 0 finished (0:00:00), 0 errors"
        );
    }
}

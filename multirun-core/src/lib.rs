//! This library implements a process pool for running many invocations of an
//! external simulation executable side by side.
//!
//! Programming interface is centered around three steps. First a list of
//! [`JobSpec`]s is built using [`job::build`], either by replicating the same
//! invocation N times (*identical mode*) or by deriving one invocation per
//! row of a [`ParameterTable`] (*table mode*). The jobs are then handed to a
//! [`Pool`], which keeps a bounded number of child processes running at any
//! given time and produces a [`RunSummary`]. Finally [`aggregate::aggregate`]
//! collects the output files of the successful jobs, optionally combining
//! them into a single file or moving them into a single directory.
//!
//!
//! # Supervision model
//!
//! A single thread supervises all the children. It never blocks on any one
//! process, instead it sleeps for the configured poll interval and then
//! checks each running child without waiting. Child exit is only observed
//! at these polls, so a job's recorded duration can be late by up to one
//! poll interval.
//!
//! # Failures
//!
//! Only configuration problems are fatal, and those are all detected before
//! the first process is spawned. Anything that goes wrong with a single job
//! (spawning, exit code, missing output) is recorded for that job and the
//! rest of the run carries on.
//!
//! ## Example
//!
//! ```ignore
//! extern crate multirun_core as multirun;
//! use multirun::{job, Pool, PoolConfig};
//!
//! pub fn main() {
//!     let base = vec!["./sim.out".to_string(), "-n".to_string(), "1e6".to_string()];
//!     let source = job::JobSource::identical(8);
//!     let jobs = job::build(&base, &source, &job::NamingConfig::default()).unwrap();
//!     let summary = Pool::new(PoolConfig::default()).run(&jobs);
//!     println!("{} succeeded", summary.succeeded());
//! }
//! ```
//!
//! [`JobSpec`]: job/struct.JobSpec.html
//! [`job::build`]: job/fn.build.html
//! [`ParameterTable`]: table/struct.ParameterTable.html
//! [`Pool`]: pool/struct.Pool.html
//! [`RunSummary`]: summary/struct.RunSummary.html
//! [`aggregate::aggregate`]: aggregate/fn.aggregate.html

#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

// reexports
pub use aggregate::{AggregateOptions, HeaderMode};
pub use config::{CompileConfig, RunConfig};
pub use error::{Error, Result};
pub use job::{JobId, JobSource, JobSpec, NamingConfig};
pub use pool::{Pool, PoolConfig, PoolObserver, PoolSnapshot};
pub use summary::{FailureKind, JobOutcome, JobRecord, RunSummary};
pub use table::{ParamValue, ParameterRow, ParameterTable};

pub mod aggregate;
pub mod config;
pub mod error;
pub mod job;
pub mod pool;
pub mod process;
pub mod progress;
pub mod summary;
pub mod table;

mod util;

#[cfg(test)]
mod testing;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

/// Name of the table column holding each job's output file name.
pub const FILENAME_KEY: &str = "filename";

/// Job name prefix used in identical mode.
pub const DEFAULT_PREFIX: &str = "sim_data_";
/// Output file suffix used in identical mode.
pub const DEFAULT_OUTPUT_SUFFIX: &str = ".dat";
/// Number of events passed to each simulation if not specified otherwise.
pub const DEFAULT_EVENTS: &str = "100000000";

/// Seconds between consecutive polls of the running processes.
pub const DEFAULT_POLL_SECS: f64 = 1.0;
/// Seconds an interrupted child gets to exit before it's killed.
pub const DEFAULT_GRACE_SECS: f64 = 10.0;

/// Extension appended to the job name to form the captured output log.
pub const LOG_FILE_EXTENSION: &str = "log";

/// Configuration file picked up from the working directory if present.
pub const CONFIG_FILE: &str = "multirun.toml";

/// Number of processing units available to this process, never less than 1.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

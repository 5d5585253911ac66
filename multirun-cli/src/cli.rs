//! Application definition.

extern crate simplelog;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Error, Result};
use clap::{App, AppSettings, Arg, ArgMatches};

use multirun::job;
use multirun::{aggregate, HeaderMode, Pool, RunConfig};

use crate::compile;
use crate::report::{Reporter, Widths};
use crate::util;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("multirun")
        .setting(AppSettings::ArgRequiredElseHelp)
        .version(VERSION)
        .author(AUTHORS)
        .about("Run many simulation processes side by side.\n\n\
                Runs the same simulation a number of times for better statistics, \n\
                or a different set of parameters for each row of a CSV file.")
        .arg(Arg::with_name("sim_file")
            .required(true)
            .value_name("sim-file")
            .help("Simulation to run, either an instrument file (.instr) to compile \
                   or a ready executable"))
        .arg(Arg::with_name("n_events")
            .display_order(1)
            .long("n_events")
            .short("n")
            .takes_value(true)
            .value_name("count")
            .help("Number of events for each simulation [default: 100000000]"))
        .arg(Arg::with_name("n_process")
            .display_order(2)
            .long("n_process")
            .short("p")
            .takes_value(true)
            .value_name("count")
            .help("Maximum number of processes running at the same time \
                   [default: number of cores]"))
        .arg(Arg::with_name("t_process")
            .display_order(3)
            .long("t_process")
            .short("t")
            .takes_value(true)
            .value_name("count")
            .conflicts_with("csv_input")
            .help("Total number of processes to run [default: n_process]"))
        .arg(Arg::with_name("csv_input")
            .display_order(4)
            .long("csv_input")
            .short("c")
            .takes_value(true)
            .value_name("path")
            .help("CSV file with one row of parameters per simulation, \
                   the \"filename\" column names each run"))
        .arg(Arg::with_name("prefix")
            .display_order(5)
            .long("prefix")
            .short("e")
            .takes_value(true)
            .value_name("prefix")
            .help("Prefix of directory and output file names [default: sim_data_]"))
        .arg(Arg::with_name("suffix")
            .display_order(6)
            .long("suffix")
            .takes_value(true)
            .value_name("suffix")
            .help("Suffix of output file names [default: .dat]"))
        .arg(Arg::with_name("dir")
            .display_order(7)
            .long("dir")
            .short("d")
            .takes_value(true)
            .value_name("path")
            .conflicts_with("output")
            .help("Move all output files into this directory"))
        .arg(Arg::with_name("output")
            .display_order(8)
            .long("output")
            .short("o")
            .takes_value(true)
            .value_name("path")
            .help("Combine all output files into this file"))
        .arg(Arg::with_name("header")
            .display_order(9)
            .long("header")
            .takes_value(true)
            .possible_values(&["comment", "first-line", "none"])
            .help("Header of output files, kept only once when combining [default: comment]"))
        .arg(Arg::with_name("remove")
            .display_order(10)
            .long("remove")
            .short("r")
            .help("Remove simulation directories once their output is collected"))
        .arg(Arg::with_name("clean")
            .display_order(11)
            .long("clean")
            .help("Remove simulation directories left over from a previous run"))
        .arg(Arg::with_name("sleep_sec")
            .display_order(12)
            .long("sleep_sec")
            .short("s")
            .takes_value(true)
            .value_name("seconds")
            .help("Time between process status checks [default: 1]"))
        .arg(Arg::with_name("grace_sec")
            .display_order(13)
            .long("grace_sec")
            .takes_value(true)
            .value_name("seconds")
            .help("Time interrupted processes get to exit before they're killed [default: 10]"))
        .arg(Arg::with_name("additional")
            .display_order(14)
            .long("additional")
            .short("a")
            .takes_value(true)
            .allow_hyphen_values(true)
            .value_name("args")
            .help("Additional arguments passed to every simulation"))
        .arg(Arg::with_name("no-compile")
            .display_order(15)
            .long("no-compile")
            .help("Don't compile instrument files, run the simulation file as it is"))
        .arg(Arg::with_name("config")
            .display_order(16)
            .long("config")
            .takes_value(true)
            .value_name("path")
            .help("Configuration file, command line options take precedence \
                   [default: multirun.toml if present]"))
        .arg(Arg::with_name("verbose")
            .long("verbose")
            .short("v")
            .help("Print start and finish of every process"))
        .arg(Arg::with_name("log-level")
            .long("log-level")
            .takes_value(true)
            .value_name("level")
            .help("Set the verbosity of the log output [default: warn, info with --verbose]"))
}

pub fn app_matches() -> ArgMatches<'static> {
    app().get_matches()
}

/// Runs the simulations, returns whether all of them succeeded.
pub fn start(matches: ArgMatches) -> Result<bool> {
    let mut config = load_config(&matches)?;
    apply_matches(&mut config, &matches)?;
    setup_log_verbosity(&matches, config.verbose);
    config.validate()?;

    let sim_file = match matches.value_of("sim_file") {
        Some(path) => util::existing_file(Path::new(path))?,
        None => return Err(Error::msg("simulation file is required")),
    };
    let compile_instr = compile::is_instrument(&sim_file) && !matches.is_present("no-compile");
    let executable = if compile_instr {
        compile::executable_for(&sim_file)
    } else {
        sim_file.clone()
    };

    // every job is checked before anything gets compiled or spawned
    let source = config.job_source()?;
    let jobs = job::build(&config.base_argv(&executable), &source, &config.naming())?;

    let limit = config.concurrency_limit();
    if jobs.len() < limit {
        println!(
            "Lowering number of concurrent processes from {} to {} to match the number of jobs",
            limit,
            jobs.len()
        );
    }

    let pool_config = config.pool_config()?;
    let aggregate_options = config.aggregate_options();
    aggregate_options.prepare_targets()?;

    if config.clean {
        let removed = job::clean_working_dirs(&jobs)?;
        if removed > 0 {
            println!("Removed {} directories from a previous run", removed);
        }
    }
    if compile_instr {
        compile::compile_instrument(&sim_file, &config.compile)?;
    }
    if !config.work_root.exists() {
        fs::create_dir_all(&config.work_root)?;
    }

    // run a loop allowing graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::msg(format!("failed setting interrupt handler: {}", e)))?;

    let pool = Pool::with_running_flag(pool_config, running);
    let mut reporter = Reporter::new(
        config.verbose,
        Widths::new(jobs.len(), limit.min(jobs.len())),
    );
    reporter.console.print(&format!(
        "Running {} simulations, at most {} at a time ...",
        jobs.len(),
        limit.min(jobs.len())
    ));
    let summary = pool.run_observed(&jobs, &mut reporter);
    reporter.console.newline();

    let summary = match aggregate::aggregate(summary.clone(), &jobs, &aggregate_options) {
        Ok(summary) => summary,
        Err(e) => {
            reporter.print_summary(&summary);
            return Err(e.into());
        }
    };
    reporter.print_summary(&summary);

    Ok(summary.is_success())
}

/// Reads the configuration file given on the command line, or the default
/// one from the current directory if it exists.
fn load_config(matches: &ArgMatches) -> Result<RunConfig> {
    let path = match matches.value_of("config") {
        Some(path) => PathBuf::from(path),
        None => {
            let default = env::current_dir()?.join(multirun::CONFIG_FILE);
            if !default.is_file() {
                return Ok(RunConfig::default());
            }
            default
        }
    };
    Ok(RunConfig::from_file(&path)?)
}

/// Overrides configuration values with the ones given on the command line.
fn apply_matches(config: &mut RunConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(n_events) = matches.value_of("n_events") {
        config.n_events = n_events.to_string();
    }
    if let Some(n) = parse_arg::<usize>(matches, "n_process")? {
        config.n_process = Some(n);
    }
    if let Some(t) = parse_arg::<i64>(matches, "t_process")? {
        config.t_process = Some(t);
        config.csv_input = None;
    }
    if let Some(csv) = matches.value_of("csv_input") {
        config.csv_input = Some(PathBuf::from(csv));
        config.t_process = None;
    }
    if let Some(prefix) = matches.value_of("prefix") {
        config.prefix = prefix.to_string();
    }
    if let Some(suffix) = matches.value_of("suffix") {
        config.output_suffix = suffix.to_string();
    }
    if let Some(dir) = matches.value_of("dir") {
        config.dir = Some(PathBuf::from(dir));
        config.output = None;
    }
    if let Some(output) = matches.value_of("output") {
        config.output = Some(PathBuf::from(output));
        config.dir = None;
    }
    if let Some(header) = matches.value_of("header") {
        config.header = HeaderMode::from_str(header)?;
    }
    if let Some(secs) = parse_arg::<f64>(matches, "sleep_sec")? {
        config.sleep_sec = secs;
    }
    if let Some(secs) = parse_arg::<f64>(matches, "grace_sec")? {
        config.grace_sec = secs;
    }
    if let Some(additional) = matches.value_of("additional") {
        config.additional = util::split_args(additional)?;
    }
    config.remove |= matches.is_present("remove");
    config.clean |= matches.is_present("clean");
    config.verbose |= matches.is_present("verbose");
    Ok(())
}

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match matches.value_of(name) {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::msg(format!("invalid value for {}: \"{}\" ({})", name, s, e))),
        None => Ok(None),
    }
}

fn setup_log_verbosity(matches: &ArgMatches, verbose: bool) {
    use self::simplelog::{LevelFilter, TermLogger};
    let level_filter = match matches.value_of("log-level") {
        Some(s) => match s {
            "0" | "none" | "off" => LevelFilter::Off,
            "1" | "err" | "error" | "min" => LevelFilter::Error,
            "2" | "warn" | "warning" | "default" => LevelFilter::Warn,
            "3" | "info" => LevelFilter::Info,
            "4" | "debug" => LevelFilter::Debug,
            "5" | "trace" | "max" | "all" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        },
        None if verbose => LevelFilter::Info,
        None => LevelFilter::Warn,
    };
    let mut config_builder = simplelog::ConfigBuilder::new();
    let logger_conf = config_builder
        .set_time_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Debug)
        .set_location_level(LevelFilter::Trace)
        .set_time_format_str("%H:%M:%S%.3f")
        .build();
    if TermLogger::init(level_filter, logger_conf, simplelog::TerminalMode::Mixed).is_err() {
        eprintln!("failed initializing logger");
    }
}

//! Fake simulation used by the tests.
//!
//! The simulation is a shell script that picks up the `--filename=<name>`
//! argument, runs an optional snippet of extra shell code (which can see
//! the file name as `$f`) and then writes a small data file with a single
//! comment header line.

use std::path::Path;

use crate::job::{build, JobSource, JobSpec, NamingConfig};

pub const HEADER: &str = "# sim header\n";

const PARSE_ARGS: &str =
    r#"for a in "$@"; do case "$a" in --filename=*) f="${a#--filename=}";; esac; done"#;
const WRITE_OUTPUT: &str = r#"printf '# sim header\n%s 1 2\n' "$f" > "$f""#;

/// Base command line running the fake simulation with the given extra code.
pub fn sim_argv(extra: &str) -> Vec<String> {
    let script = format!("{}\n{}\n{}\n", PARSE_ARGS, extra, WRITE_OUTPUT);
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        script,
        "sim".to_string(),
    ]
}

/// Identical mode jobs with working directories under `root`.
pub fn sim_jobs(root: &Path, total: i64, extra: &str) -> Vec<JobSpec> {
    let naming = NamingConfig {
        root: root.to_path_buf(),
        ..NamingConfig::default()
    };
    build(&sim_argv(extra), &JobSource::identical(total), &naming).unwrap()
}

/// Body line the fake simulation writes for the given output file.
pub fn body_line(file_name: &str) -> String {
    format!("{} 1 2\n", file_name)
}

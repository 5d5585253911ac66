use anyhow::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Splits a string into arguments the way a shell would.
pub(crate) fn split_args(s: &str) -> Result<Vec<String>> {
    shlex::split(s).ok_or_else(|| Error::msg(format!("failed splitting arguments: {}", s)))
}

/// Returns the absolute, canonical path to an existing file.
pub(crate) fn existing_file(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(Error::msg(format!(
            "simulation file not found: {}",
            path.to_string_lossy()
        )));
    }
    Ok(dunce::canonicalize(path)?)
}

/// Formats duration as `H:MM:SS`, rounded to whole seconds.
pub(crate) fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs_f64().round() as u64;
    format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

/// Number of decimal digits needed to print `n`.
pub(crate) fn digits(n: usize) -> usize {
    n.to_string().len()
}

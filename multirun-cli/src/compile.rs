//! Turning instrument descriptions into simulation executables.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Error, Result};

use multirun::CompileConfig;

pub const INSTRUMENT_EXTENSION: &str = "instr";

pub fn is_instrument(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == INSTRUMENT_EXTENSION)
}

/// Path of the executable that will be run for the given simulation file.
///
/// Instruments are compiled into `<stem>.out` next to the instrument file,
/// anything else is expected to be executable already.
pub fn executable_for(sim_file: &Path) -> PathBuf {
    if is_instrument(sim_file) {
        sim_file.with_extension("out")
    } else {
        sim_file.to_path_buf()
    }
}

/// Translates the instrument into C and compiles it, returns the path to
/// the resulting executable.
///
/// Generated files from a previous compilation are removed first, so that
/// a failed step never leaves a stale executable behind.
pub fn compile_instrument(instr: &Path, config: &CompileConfig) -> Result<PathBuf> {
    let c_file = instr.with_extension("c");
    let out_file = executable_for(instr);
    for stale in &[&c_file, &out_file] {
        if stale.exists() {
            debug!("removing {}", stale.to_string_lossy());
            fs::remove_file(stale)?;
        }
    }

    let dir = instr.parent().unwrap_or_else(|| Path::new("."));
    let file_name = instr
        .file_name()
        .ok_or_else(|| Error::msg(format!("invalid instrument path: {}", instr.to_string_lossy())))?;

    println!("Translating {} ...", instr.to_string_lossy());
    let output = Command::new(&config.translator)
        .arg(file_name)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::msg(format!("failed running {}: {}", config.translator, e)))?;
    check_output(&config.translator, instr, &output)?;
    if !c_file.is_file() {
        return Err(Error::msg(format!(
            "{} didn't produce {}",
            config.translator,
            c_file.to_string_lossy()
        )));
    }

    println!("Compiling {} ...", c_file.to_string_lossy());
    let output = Command::new(&config.compiler)
        .arg("-o")
        .arg(&out_file)
        .arg(&c_file)
        .args(&config.cflags)
        .output()
        .map_err(|e| Error::msg(format!("failed running {}: {}", config.compiler, e)))?;
    check_output(&config.compiler, &c_file, &output)?;
    if !out_file.is_file() {
        return Err(Error::msg(format!(
            "{} didn't produce {}",
            config.compiler,
            out_file.to_string_lossy()
        )));
    }

    info!("compiled {}", out_file.to_string_lossy());
    Ok(out_file)
}

fn check_output(tool: &str, input: &Path, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(Error::msg(format!(
        "{} failed on {} ({}):\n{}",
        tool,
        input.to_string_lossy(),
        output.status,
        stderr.trim_end()
    )))
}

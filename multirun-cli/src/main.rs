//! Command line program for running many simulation processes side by side.

#[macro_use]
extern crate log;

extern crate anyhow;
extern crate clap;
extern crate colored;

extern crate multirun_core as multirun;

pub mod cli;
mod compile;
mod report;
mod util;

use colored::*;

fn main() {
    // Run the program based on user input
    let success = match cli::start(cli::app_matches()) {
        Ok(success) => success,
        Err(e) => {
            println!("{}{}", "error: ".red(), e);
            if e.root_cause().to_string() != e.to_string() {
                println!("Caused by:\n{}", e.root_cause())
            }
            false
        }
    };
    if !success {
        std::process::exit(1);
    }
}

//! Loffice - Lazy Office Analyzer
//!
//! Entry point: parses the command line and runs one monitored session.

use clap::Parser;
use loffice::app::{run, Args, Config};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_args(args);
    run(&config)
}

//! Top-level run: launch, monitor, summarize

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use super::config::Config;
use crate::analysis::loader::ImageInfo;
use crate::debug::{self, DebugEngine, DebugError};
use crate::intercept::functions::CATALOG;
use crate::intercept::{Session, SessionOutcome};
use crate::{decoy, logging, report};

/// Directory the per-run log files go to
pub const LOG_DIR: &str = "logs";

/// Drive `engine` with `session` until the session ends.
///
/// The session is always finished, even when the engine fails, so the caller
/// can still print a summary.
pub fn monitor(
    engine: &mut dyn DebugEngine,
    session: &mut Session,
) -> (SessionOutcome, Option<DebugError>) {
    match engine.run(&CATALOG, session) {
        Ok(end) => (session.finish(end), None),
        Err(e) => {
            log::error!("Session aborted: {}", e);
            (session.finish(debug::types::SessionEnd::Stopped), Some(e))
        }
    }
}

/// Run one analysis as configured
pub fn run(config: &Config) -> Result<()> {
    let log_path = logging::init(Path::new(LOG_DIR), &config.document, logging::filter_for(config.verbose))?;

    println!("\n\t\t{}\n", "Lazy Office Analyzer".bold().cyan());
    log::info!("Using office path: \"{}\"", config.executable);
    log::info!("Invocation command: \"{} {}\"", config.executable, config.document);
    log::info!("Exit mode: {}", config.exit_mode);

    match ImageInfo::from_file(&config.executable) {
        Ok(image) => log::info!("Host image: {}", image.summary().replace('\n', ", ")),
        Err(e) => log::debug!("Host image not inspected: {}", e),
    }

    // Registry changes must land before the host reads its MRU lists
    if config.decoy_docs {
        match decoy::inject(&config.office_dir) {
            Ok(0) => println!("[*] Recent documents look fine, no decoys added"),
            Ok(n) => println!("[*] Added {} decoy recent documents", n),
            Err(e) => {
                println!("{} Decoy documents not added: {}", "[!]".red(), e);
                log::warn!("Decoy documents not added: {}", e);
            }
        }
    }

    let arguments = vec![config.document.clone()];
    let mut engine = match debug::spawn(&config.executable, &arguments) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("{}", e);
            if Path::new(&config.executable).exists() {
                println!("{} Error launching: {}", "[!]".red(), e);
            } else {
                println!(
                    "{} Error launching application ({:?}), correct Office path?",
                    "[!]".red(),
                    config.app
                );
            }
            return Err(e).context("launch failed");
        }
    };

    log::info!("Launching...");
    println!("[*] Running, press Ctrl+C to stop");

    let mut session = Session::new(config.exit_mode, config.writes_only).with_progress(report::print_stats);
    let (outcome, failure) = monitor(engine.as_mut(), &mut session);
    report::print_summary(&outcome, session.state());

    println!("Remember to check the runtime log: {}", log_path.display());
    println!("Goodbye...\n");

    exit_status(failure)
}

/// Mid-session engine failures are reported but do not fail the run
fn exit_status(failure: Option<DebugError>) -> Result<()> {
    match failure {
        Some(e) if e.is_fatal() => Err(e).context("session aborted"),
        Some(e) => {
            log::warn!("Session ended early: {}", e);
            Ok(())
        }
        None => Ok(()),
    }
}

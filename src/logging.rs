//! Logging - per-run log file behind the `log` facade
//!
//! Every run gets `logs/<document>_<timestamp>.log`; records are written as
//! `<time> - <tag><message>` where informational records carry no tag.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Log file path for `document` under `dir`, stamped with `now`
pub fn log_file_path(dir: &Path, document: &str, now: DateTime<Utc>) -> PathBuf {
    let name = document.rsplit(['\\', '/']).next().unwrap_or(document);
    dir.join(format!("{}_{}.log", name, now.format("%Y%d%m%H%M%S")))
}

/// Tag printed in front of a record of `level`
pub fn level_tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Info => "",
        log::Level::Error => "[ERROR] ",
        log::Level::Warn => "[WARNING] ",
        log::Level::Debug => "[DEBUG] ",
        log::Level::Trace => "[TRACE] ",
    }
}

/// Route `log` records at `filter` or above into a fresh file under `dir`
pub fn init(dir: &Path, document: &str, filter: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = log_file_path(dir, document, Utc::now());
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {}{}",
                buf.timestamp_millis(),
                level_tag(record.level()),
                record.args()
            )
        })
        .try_init()
        .context("logger already initialized")?;

    Ok(path)
}

/// Filter for `-v` repetitions
pub fn filter_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

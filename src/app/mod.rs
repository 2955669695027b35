//! App module - configuration and the top-level run
//!
//! Turns command line arguments into a monitored session and reports on it.

mod config;
mod run;

pub use config::*;
pub use run::*;

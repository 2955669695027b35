//! Loffice - Lazy Office Analyzer
//!
//! Runs a document's host application under a debugger, intercepts a fixed
//! set of Win32 APIs and stops the target once its behavior is interesting
//! enough (first URL, first spawned process, or never).

pub mod analysis;
pub mod app;
pub mod core;
pub mod debug;
pub mod decoy;
pub mod intercept;
pub mod logging;
pub mod report;

//! Intercept module - decoding, aggregation and exit policy.
//!
//! Everything between "a breakpoint fired" and "keep going or stop":
//! - [`functions`]: the whitelist of monitored entry points
//! - [`decoder`]: calling-convention aware argument extraction
//! - [`aggregate`]: the session's observations and counters
//! - [`policy`]: exit mode evaluation
//! - [`dispatcher`]: the session object tying them together

pub mod aggregate;
pub mod decoder;
pub mod dispatcher;
pub mod functions;
pub mod policy;

pub use aggregate::{AggregateState, Observation, ProcessRecord, Stats};
pub use dispatcher::{Phase, Session, SessionOutcome};
pub use policy::{ExitDecision, ExitMode, ExitReason};

use thiserror::Error;

/// Errors that abort a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterceptError {
    #[error("Unsupported target bitness: {0}")]
    UnsupportedBitness(u32),
}

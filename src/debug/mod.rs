//! Debug module - the debugging engine the interception layer runs on.
//!
//! Provides:
//! - Process launch under the debugger
//! - Breakpoint arming on monitored exports
//! - The event loop that hands traps to a [`TrapHandler`]

pub mod types;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "windows")]
pub use windows::WindowsDebugger as PlatformDebugger;

use thiserror::Error;

use crate::core::memory::{MemoryError, RemoteMemory};
use crate::intercept::functions::MonitoredFunction;
use crate::intercept::InterceptError;
use types::{Control, Register, SessionEnd};

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Failed to launch {path}: {reason}")]
    LaunchFailed { path: String, reason: String },

    #[error("Debugging is not supported on this platform")]
    Unsupported,

    #[error("{call} failed: {reason}")]
    Api { call: &'static str, reason: String },

    #[error(transparent)]
    Intercept(#[from] InterceptError),
}

impl DebugError {
    /// Whether the error happened before any instrumentation was armed
    pub fn is_launch_error(&self) -> bool {
        matches!(self, DebugError::LaunchFailed { .. } | DebugError::Unsupported)
    }

    /// Whether the error concerns one debug event only, so the loop can go on
    pub fn is_event_local(&self) -> bool {
        matches!(self, DebugError::Api { .. })
    }

    /// Whether the run should end with a failure status once the summary is out
    pub fn is_fatal(&self) -> bool {
        self.is_launch_error()
            || matches!(self, DebugError::Intercept(InterceptError::UnsupportedBitness(_)))
    }
}

/// The stopped thread and process at a monitored function's entry
pub trait Trap {
    /// Pointer width of the target process (32 or 64)
    fn bitness(&self) -> u32;

    /// Value of a general-purpose register of the trapped thread
    fn register(&self, register: Register) -> u64;

    /// `count` words starting at the stack pointer; word 0 is the return address
    fn stack_words(&self, count: usize) -> Result<Vec<u64>, MemoryError>;

    /// Address space of the target process
    fn memory(&self) -> &dyn RemoteMemory;
}

/// Receives every hit on an armed breakpoint, synchronously
pub trait TrapHandler {
    fn on_hit(
        &mut self,
        function: &MonitoredFunction,
        trap: &dyn Trap,
    ) -> Result<Control, InterceptError>;
}

/// A debugging engine that has launched a target and can run it to completion
pub trait DebugEngine {
    /// Arm `catalog`, then deliver traps to `handler` until the session ends.
    fn run(
        &mut self,
        catalog: &'static [MonitoredFunction],
        handler: &mut dyn TrapHandler,
    ) -> Result<SessionEnd, DebugError>;
}

/// Launch `executable` with `arguments` under the platform debugger
#[cfg(target_os = "windows")]
pub fn spawn(executable: &str, arguments: &[String]) -> Result<Box<dyn DebugEngine>, DebugError> {
    Ok(Box::new(PlatformDebugger::spawn(executable, arguments)?))
}

#[cfg(not(target_os = "windows"))]
pub fn spawn(
    _executable: &str,
    _arguments: &[String],
) -> Result<Box<dyn DebugEngine>, DebugError> {
    Err(DebugError::Unsupported)
}

/// Read `count` stack words of `bitness` starting at `rsp`
pub fn read_stack_words(
    memory: &dyn RemoteMemory,
    rsp: u64,
    bitness: types::Bitness,
    count: usize,
) -> Result<Vec<u64>, MemoryError> {
    let size = bitness.word_size();
    let mut raw = vec![0u8; size * count];
    let mut filled = 0;

    // The stack may straddle a page end; keep reading past short reads
    while filled < raw.len() {
        let cursor = rsp.wrapping_add(filled as u64);
        let got = memory.read_into(cursor, &mut raw[filled..])?;
        if got == 0 {
            return Err(MemoryError::ReadFailed {
                address: cursor,
                reason: format!("short stack read ({} of {} bytes)", filled, raw.len()),
            });
        }
        filled += got.min(raw.len() - filled);
    }

    Ok(raw
        .chunks_exact(size)
        .map(|word| match bitness {
            types::Bitness::Bit32 => u32::from_le_bytes([word[0], word[1], word[2], word[3]]) as u64,
            types::Bitness::Bit64 => u64::from_le_bytes([
                word[0], word[1], word[2], word[3], word[4], word[5], word[6], word[7],
            ]),
        })
        .collect())
}

//! Common types for debugging functionality.

use std::fmt;

/// Pointer width of the debugged process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitness {
    /// 32-bit process, stdcall-style stack arguments
    Bit32,
    /// 64-bit process, Microsoft x64 register arguments
    Bit64,
}

impl Bitness {
    /// Size of one stack word in bytes
    pub fn word_size(self) -> usize {
        match self {
            Bitness::Bit32 => 4,
            Bitness::Bit64 => 8,
        }
    }

    /// Mask applied to a raw word read from the stack
    pub fn word_mask(self) -> u64 {
        match self {
            Bitness::Bit32 => 0xFFFF_FFFF,
            Bitness::Bit64 => u64::MAX,
        }
    }
}

impl TryFrom<u32> for Bitness {
    type Error = u32;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            32 => Ok(Bitness::Bit32),
            64 => Ok(Bitness::Bit64),
            other => Err(other),
        }
    }
}

impl From<Bitness> for u32 {
    fn from(bitness: Bitness) -> u32 {
        match bitness {
            Bitness::Bit32 => 32,
            Bitness::Bit64 => 64,
        }
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", u32::from(*self))
    }
}

/// General-purpose registers the argument decoder may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Rcx,
    Rdx,
    R8,
    R9,
    Rsp,
    Rip,
}

/// CPU register state (x64); 32-bit contexts are zero-extended into it
#[derive(Debug, Clone, Default)]
pub struct RegisterState {
    pub rcx: u64,
    pub rdx: u64,
    pub r8: u64,
    pub r9: u64,
    pub rsp: u64,
    pub rip: u64,
}

impl RegisterState {
    pub fn get(&self, register: Register) -> u64 {
        match register {
            Register::Rcx => self.rcx,
            Register::Rdx => self.rdx,
            Register::R8 => self.r8,
            Register::R9 => self.r9,
            Register::Rsp => self.rsp,
            Register::Rip => self.rip,
        }
    }
}

/// What the engine should do after a trap has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Resume the target
    Continue,
    /// Kill the target and end the event loop
    Stop,
}

/// How a debugging session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The target exited on its own
    Exited { exit_code: u32 },
    /// A handler asked the engine to stop
    Stopped,
    /// The operator interrupted the session (Ctrl+C)
    Interrupted,
}

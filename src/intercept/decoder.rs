//! Argument Decoder
//!
//! Reconstructs the declared arguments of a trapped call. One routine serves
//! every function: the catalog says which positions matter, the calling
//! convention says where each position lives.

use chrono::{DateTime, Utc};

use super::functions::{ArgKind, FunctionId, MonitoredFunction};
use super::InterceptError;
use crate::core::memory::{read_remote_string_or_empty, StringEncoding};
use crate::debug::types::{Bitness, Register};
use crate::debug::Trap;

/// Microsoft x64 integer argument registers, in order
const X64_ARG_REGISTERS: [Register; 4] = [Register::Rcx, Register::Rdx, Register::R8, Register::R9];

/// Known `dwDesiredAccess` bits and their letters
const ACCESS_BITS: [(u32, char); 2] = [(0x8000_0000, 'R'), (0x4000_0000, 'W')];

/// Where an argument lives at function entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
    /// Word offset from the stack pointer; offset 0 is the return address
    Stack(usize),
    Register(Register),
}

/// Location of zero-based argument `position` for a process of `bitness`
pub fn locate(bitness: Bitness, position: usize) -> ArgLocation {
    match bitness {
        Bitness::Bit32 => ArgLocation::Stack(position + 1),
        Bitness::Bit64 => match X64_ARG_REGISTERS.get(position) {
            Some(register) => ArgLocation::Register(*register),
            // Return address plus the four-slot home area precede argument 5
            None => ArgLocation::Stack(position + 1),
        },
    }
}

/// A decoded argument value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Str(String),
    Int(u64),
    Flags(u32),
}

/// One realized invocation of a monitored function
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub function: FunctionId,
    pub bitness: Bitness,
    /// Raw words as found in registers or on the stack, per declared argument
    pub raw: Vec<u64>,
    /// Typed values, per declared argument
    pub args: Vec<ArgValue>,
    pub timestamp: DateTime<Utc>,
}

impl CallEvent {
    pub fn new(function: FunctionId, bitness: Bitness, args: Vec<ArgValue>) -> Self {
        Self {
            function,
            bitness,
            raw: Vec::new(),
            args,
            timestamp: Utc::now(),
        }
    }

    /// String value of declared argument `index`, empty when absent
    pub fn string(&self, index: usize) -> &str {
        match self.args.get(index) {
            Some(ArgValue::Str(s)) => s,
            _ => "",
        }
    }

    /// Integer value of declared argument `index`, zero when absent
    pub fn int(&self, index: usize) -> u64 {
        match self.args.get(index) {
            Some(ArgValue::Int(v)) => *v,
            Some(ArgValue::Flags(v)) => *v as u64,
            _ => 0,
        }
    }

    pub fn flags(&self, index: usize) -> u32 {
        self.int(index) as u32
    }
}

/// Decode the declared arguments of `function` from `trap`.
///
/// Only an unsupported bitness is an error. Unreadable stack or string memory
/// degrades to zero and empty values.
pub fn decode(function: &MonitoredFunction, trap: &dyn Trap) -> Result<CallEvent, InterceptError> {
    let bits = trap.bitness();
    let bitness = Bitness::try_from(bits).map_err(InterceptError::UnsupportedBitness)?;

    let locations: Vec<ArgLocation> = function
        .args
        .iter()
        .map(|spec| locate(bitness, spec.position))
        .collect();

    let depth = locations
        .iter()
        .filter_map(|loc| match loc {
            ArgLocation::Stack(offset) => Some(offset + 1),
            ArgLocation::Register(_) => None,
        })
        .max()
        .unwrap_or(0);

    let stack = if depth > 0 {
        trap.stack_words(depth).unwrap_or_else(|e| {
            log::debug!("{}: stack unreadable, using zeroed arguments: {}", function, e);
            vec![0; depth]
        })
    } else {
        Vec::new()
    };

    let mut raw = Vec::with_capacity(function.args.len());
    let mut args = Vec::with_capacity(function.args.len());

    for (spec, location) in function.args.iter().zip(&locations) {
        let word = match *location {
            ArgLocation::Register(register) => trap.register(register),
            ArgLocation::Stack(offset) => stack.get(offset).copied().unwrap_or(0),
        } & bitness.word_mask();

        let value = match spec.kind {
            ArgKind::WideString => {
                ArgValue::Str(read_remote_string_or_empty(trap.memory(), word, StringEncoding::Wide))
            }
            ArgKind::NarrowString => {
                ArgValue::Str(read_remote_string_or_empty(trap.memory(), word, StringEncoding::Narrow))
            }
            ArgKind::Integer => ArgValue::Int(word),
            // DWORDs only own the low half of a 64-bit slot
            ArgKind::Flags => ArgValue::Flags(word as u32),
        };

        raw.push(word);
        args.push(value);
    }

    Ok(CallEvent {
        function: function.id,
        bitness,
        raw,
        args,
        timestamp: Utc::now(),
    })
}

/// Access letters for a `dwDesiredAccess` mask, `None` when no known bit is set.
///
/// Unknown bits are ignored.
pub fn decode_access(mask: u32) -> Option<String> {
    let access: String = ACCESS_BITS
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, letter)| *letter)
        .collect();

    if access.is_empty() {
        None
    } else {
        Some(access)
    }
}

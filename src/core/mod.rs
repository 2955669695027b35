//! Core module - low-level access to the debugged process
//!
//! Contains the remote memory contract and string materialization helpers.

pub mod memory;

pub use memory::{MemoryError, RemoteMemory, StringEncoding};

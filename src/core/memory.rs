//! Memory - Remote process memory reads
//!
//! Target memory is untrusted: every read may fail or return garbage, so the
//! helpers here always bound what they read and never assume well-formed data.

use thiserror::Error;

/// Upper bound on characters materialized from a single remote string
pub const MAX_STRING_CHARS: usize = 4096;

/// Bytes requested per `read_into` call while scanning for a terminator
const CHUNK_SIZE: usize = 256;

/// Memory operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Failed to read memory at {address:#x}: {reason}")]
    ReadFailed { address: u64, reason: String },

    #[error("Null pointer")]
    NullPointer,
}

/// Character encoding of a remote null-terminated string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    /// One byte per character (ANSI)
    Narrow,
    /// UTF-16LE
    Wide,
}

impl StringEncoding {
    fn unit_size(self) -> usize {
        match self {
            StringEncoding::Narrow => 1,
            StringEncoding::Wide => 2,
        }
    }
}

/// Read access to the address space of the debugged process
pub trait RemoteMemory {
    /// Read up to `buffer.len()` bytes at `address`, returning how many were read.
    ///
    /// A short read is not an error and reading continues after it; an
    /// unmapped address is reported as `Err`.
    fn read_into(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError>;
}

/// Read a null-terminated string of `encoding` at `address`.
///
/// Stops at the terminator, after `max_chars` characters, or at the end of
/// readable memory, whichever comes first.
pub fn read_remote_string(
    memory: &dyn RemoteMemory,
    address: u64,
    encoding: StringEncoding,
    max_chars: usize,
) -> Result<String, MemoryError> {
    if address == 0 {
        return Err(MemoryError::NullPointer);
    }

    let unit = encoding.unit_size();
    let limit = max_chars * unit;
    let mut raw: Vec<u8> = Vec::new();
    let mut cursor = address;

    'scan: while raw.len() < limit {
        let want = CHUNK_SIZE.min(limit - raw.len());
        let mut chunk = vec![0u8; want];

        let got = match memory.read_into(cursor, &mut chunk) {
            Ok(n) => n.min(want),
            // Whatever was read before the fault is still usable
            Err(_) if !raw.is_empty() => break,
            Err(e) => return Err(e),
        };
        if got == 0 {
            break;
        }

        // Only whole code units are considered
        let usable = got - got % unit;
        if usable == 0 {
            break;
        }
        for unit_bytes in chunk[..usable].chunks_exact(unit) {
            if unit_bytes.iter().all(|&b| b == 0) {
                break 'scan;
            }
            raw.extend_from_slice(unit_bytes);
        }

        // Short reads (page boundaries) just move the cursor
        cursor = cursor.wrapping_add(usable as u64);
    }

    Ok(decode(&raw, encoding))
}

/// Like [`read_remote_string`], but degrades every failure to an empty string.
pub fn read_remote_string_or_empty(
    memory: &dyn RemoteMemory,
    address: u64,
    encoding: StringEncoding,
) -> String {
    match read_remote_string(memory, address, encoding, MAX_STRING_CHARS) {
        Ok(s) => s,
        Err(MemoryError::NullPointer) => String::new(),
        Err(e) => {
            log::debug!("Remote string unavailable: {}", e);
            String::new()
        }
    }
}

fn decode(raw: &[u8], encoding: StringEncoding) -> String {
    match encoding {
        StringEncoding::Narrow => String::from_utf8_lossy(raw).into_owned(),
        StringEncoding::Wide => {
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
    }
}

/// A flat snapshot of remote memory, for driving the decoder without a live process
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    regions: Vec<(u64, Vec<u8>)>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `bytes` at `base`
    pub fn map(&mut self, base: u64, bytes: Vec<u8>) -> &mut Self {
        self.regions.push((base, bytes));
        self
    }

    /// Map a null-terminated UTF-16LE string at `base`
    pub fn map_wide(&mut self, base: u64, s: &str) -> &mut Self {
        let mut bytes: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
        bytes.extend_from_slice(&[0, 0]);
        self.map(base, bytes)
    }

    /// Map a null-terminated narrow string at `base`
    pub fn map_narrow(&mut self, base: u64, s: &str) -> &mut Self {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.map(base, bytes)
    }
}

impl RemoteMemory for MemoryImage {
    fn read_into(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        for (base, bytes) in &self.regions {
            let end = base + bytes.len() as u64;
            if address >= *base && address < end {
                let offset = (address - base) as usize;
                let n = buffer.len().min(bytes.len() - offset);
                buffer[..n].copy_from_slice(&bytes[offset..offset + n]);
                return Ok(n);
            }
        }
        Err(MemoryError::ReadFailed {
            address,
            reason: "unmapped".into(),
        })
    }
}

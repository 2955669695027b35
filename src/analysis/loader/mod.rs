//! Image Loader Module
//!
//! Parses PE images using goblin and extracts what the interceptor needs:
//! - Bitness of the image
//! - Named exports (used to place breakpoints in freshly loaded DLLs)

use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

use crate::debug::types::Bitness;
use crate::intercept::functions::MonitoredFunction;

/// A named export of a PE image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInfo {
    /// Export name (possibly C++ decorated)
    pub name: String,
    /// Relative virtual address
    pub rva: u64,
}

/// Parsed PE image information
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Original file path
    pub path: String,
    /// Image bitness from the optional header
    pub bitness: Bitness,
    /// Preferred image base
    pub image_base: u64,
    /// Named exports; forwarders are skipped
    pub exports: Vec<ExportInfo>,
}

impl ImageInfo {
    /// Load and parse an image file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let data = fs::read(&path)?;
        Self::from_bytes(&data, path_str)
    }

    /// Parse an image from bytes
    pub fn from_bytes(data: &[u8], path: String) -> Result<Self> {
        if data.len() < 64 {
            return Err(anyhow!("{}: file too small", path));
        }
        // MZ header
        if data[0] != 0x4D || data[1] != 0x5A {
            return Err(anyhow!("{}: not a PE image", path));
        }

        let pe = goblin::pe::PE::parse(data).map_err(|e| anyhow!("{}: {}", path, e))?;
        let bitness = if pe.is_64 { Bitness::Bit64 } else { Bitness::Bit32 };

        let exports = pe
            .exports
            .iter()
            .filter(|export| export.reexport.is_none())
            .filter_map(|export| {
                export.name.map(|name| ExportInfo {
                    name: name.to_string(),
                    rva: export.rva as u64,
                })
            })
            .collect();

        Ok(Self {
            path,
            bitness,
            image_base: pe.image_base as u64,
            exports,
        })
    }

    /// RVA of each catalog function this image exports, when its file name matches
    pub fn resolve<'a>(
        &self,
        catalog: &'a [MonitoredFunction],
    ) -> Vec<(&'a MonitoredFunction, u64)> {
        catalog
            .iter()
            .filter(|function| function.matches_module(&self.path))
            .filter_map(|function| {
                self.exports
                    .iter()
                    .find(|export| function.matches_symbol(&export.name))
                    .map(|export| (function, export.rva))
            })
            .collect()
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        format!(
            "{} PE image\n\
             Image Base: 0x{:x}\n\
             Exports: {}",
            self.bitness,
            self.image_base,
            self.exports.len()
        )
    }
}

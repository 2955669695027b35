//! Analysis Module - static inspection of PE images
//!
//! Export tables decide where breakpoints go.

pub mod loader;

pub use loader::{ExportInfo, ImageInfo};

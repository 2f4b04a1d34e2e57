//! Utility functions.

use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Aligns an address or size up to the next multiple of `align`.
///
/// An alignment of 0 means "unaligned" and leaves the value alone, matching
/// what ELF uses for `sh_addralign`. Returns `None` on overflow or when
/// `align` is not a power of two.
pub fn align_up(addr: u64, align: u64) -> Option<u64> {
    if align <= 1 {
        return Some(addr);
    }
    if !align.is_power_of_two() {
        return None;
    }
    Some(addr.checked_add(align - 1)? & !(align - 1))
}

/// Parses an integer given on the command line, either decimal or `0x` hex.
pub fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid integer '{s}': {e}"))
}

/// Parses a single byte value (`0xff`, `255`).
pub fn parse_u8(s: &str) -> Result<u8, String> {
    let v = parse_u64(s)?;
    u8::try_from(v).map_err(|_| format!("value {s} does not fit in a byte"))
}

/// Maps an input file read-only.
pub fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    // Inputs are build artifacts that nothing rewrites while we run.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", path.display()))?;
    Ok(mmap)
}

/// Writes a generated artifact, creating parent directories as needed.
pub fn write_output(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

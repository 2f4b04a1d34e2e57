//! In-place ELF patching.
//!
//! Passes that rewrite an ELF file never re-serialize it. They copy the original
//! bytes and overwrite individual header fields or placeholder regions, so the file
//! length and every byte they do not name stay identical.

use anyhow::{anyhow, bail, Context, Result};
use object::{Endian, Endianness};
use std::path::Path;

use crate::image::{Image, Section, Segment};

// Field offsets within a section header.
const SH_ADDR_32: u64 = 12;
const SH_ADDR_64: u64 = 16;

// Field offsets within a program header.
const P_VADDR_32: u64 = 8;
const P_PADDR_32: u64 = 12;
const P_VADDR_64: u64 = 16;
const P_PADDR_64: u64 = 24;

/// A mutable copy of an ELF file.
pub struct ElfPatcher {
    data: Vec<u8>,
    is_64: bool,
    endian: Endianness,
}

impl ElfPatcher {
    pub fn new(image: &Image) -> Self {
        Self {
            data: image.data().to_vec(),
            is_64: image.is_64,
            endian: image.endian,
        }
    }

    /// Rewrites `sh_addr` of a section header.
    pub fn set_section_address(&mut self, section: &Section, address: u64) -> Result<()> {
        let field = if self.is_64 { SH_ADDR_64 } else { SH_ADDR_32 };
        self.write_word(section.header_offset + field, address)
            .with_context(|| format!("failed to patch address of section {}", section.name))
    }

    /// Rewrites `p_vaddr` and `p_paddr` of a program header.
    pub fn set_segment_addresses(
        &mut self,
        segment: &Segment,
        virtual_address: u64,
        physical_address: u64,
    ) -> Result<()> {
        let (vaddr, paddr) = if self.is_64 {
            (P_VADDR_64, P_PADDR_64)
        } else {
            (P_VADDR_32, P_PADDR_32)
        };
        self.write_word(segment.header_offset + vaddr, virtual_address)?;
        self.write_word(segment.header_offset + paddr, physical_address)?;
        Ok(())
    }

    /// Overwrites `bytes.len()` bytes at a file offset.
    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let start = usize::try_from(offset)?;
        let end = start
            .checked_add(bytes.len())
            .ok_or_else(|| anyhow!("patch range overflow"))?;
        let Some(target) = self.data.get_mut(start..end) else {
            bail!("patch at 0x{:x}..0x{:x} is outside the file", start, end);
        };
        target.copy_from_slice(bytes);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn write_word(&mut self, offset: u64, value: u64) -> Result<()> {
        if self.is_64 {
            let bytes = self.endian.write_u64_bytes(value);
            self.write_bytes(offset, &bytes)
        } else {
            let value = u32::try_from(value)
                .map_err(|_| anyhow!("address 0x{:x} does not fit in ELF32", value))?;
            let bytes = self.endian.write_u32_bytes(value);
            self.write_bytes(offset, &bytes)
        }
    }
}

/// Writes a patched ELF, keeping the permissions of the file it came from.
pub fn write_elf(input: &Path, output: &Path, bytes: &[u8]) -> Result<()> {
    crate::utils::write_output(output, bytes)?;
    if input != output {
        let perms = std::fs::metadata(input)
            .with_context(|| format!("failed to stat {}", input.display()))?
            .permissions();
        std::fs::set_permissions(output, perms)
            .with_context(|| format!("failed to set permissions on {}", output.display()))?;
    }
    Ok(())
}

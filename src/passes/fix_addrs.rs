//! Uncached to cached address fix-up.
//!
//! Some DSP SoCs map their RAM twice: once bypassing the L1 cache and once through
//! it. The linker script places part of the image at uncached aliases, but the
//! signing and loading tools downstream only understand the cached view. This pass
//! rewrites the addresses of allocated sections and program headers that fall in
//! the uncached window to their cached alias. Section contents are not touched.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::image::Image;
use crate::passes::Pass;
use crate::patch::{write_elf, ElfPatcher};
use crate::utils::parse_u64;

#[derive(Debug, Args)]
pub struct FixAddrsArgs {
    /// Linked ELF to fix up
    pub elf: PathBuf,

    /// Output file (defaults to in-place)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Start of the uncached alias window
    #[arg(long, value_parser = parse_u64)]
    pub uncached_base: u64,

    /// Start of the cached alias window
    #[arg(long, value_parser = parse_u64)]
    pub cached_base: u64,

    /// Size of each window
    #[arg(long, value_parser = parse_u64)]
    pub window_size: u64,
}

impl Pass for FixAddrsArgs {
    fn name(&self) -> &'static str {
        "fix-addrs"
    }

    fn execute(&self) -> Result<()> {
        let window = Window::new(self.uncached_base, self.cached_base, self.window_size)?;
        let data = std::fs::read(&self.elf)
            .with_context(|| format!("failed to read {}", self.elf.display()))?;
        let image = Image::parse(&data)
            .with_context(|| format!("failed to parse {}", self.elf.display()))?;
        let fixed = fix_addresses(&image, &window)?;
        let output = self.output.as_ref().unwrap_or(&self.elf);
        write_elf(&self.elf, output, &fixed)
    }
}

/// The two aliases of the same memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub uncached: u64,
    pub cached: u64,
    pub size: u64,
}

impl Window {
    pub fn new(uncached: u64, cached: u64, size: u64) -> Result<Self> {
        if size == 0 {
            bail!("window size must not be zero");
        }
        let uncached_end = uncached
            .checked_add(size)
            .context("uncached window wraps the address space")?;
        let cached_end = cached
            .checked_add(size)
            .context("cached window wraps the address space")?;
        if uncached < cached_end && cached < uncached_end {
            bail!(
                "windows 0x{:x}..0x{:x} and 0x{:x}..0x{:x} overlap",
                uncached,
                uncached_end,
                cached,
                cached_end
            );
        }
        Ok(Self { uncached, cached, size })
    }

    pub fn is_uncached(&self, address: u64) -> bool {
        address >= self.uncached && address - self.uncached < self.size
    }

    pub fn is_cached(&self, address: u64) -> bool {
        address >= self.cached && address - self.cached < self.size
    }

    /// Translates an address to the cached window if it is in the uncached one.
    pub fn to_cached(&self, address: u64) -> u64 {
        if self.is_uncached(address) {
            address - self.uncached + self.cached
        } else {
            address
        }
    }
}

/// Returns a copy of the file with uncached addresses moved to the cached window.
pub fn fix_addresses(image: &Image, window: &Window) -> Result<Vec<u8>> {
    let mut patcher = ElfPatcher::new(image);
    let mut moved = 0;

    for section in &image.sections {
        if !section.is_alloc() || section.size == 0 || !window.is_uncached(section.address) {
            continue;
        }
        let address = window.to_cached(section.address);
        tracing::info!("{}: 0x{:x} -> 0x{:x}", section.name, section.address, address);
        patcher.set_section_address(section, address)?;
        moved += 1;
    }

    for segment in &image.segments {
        let vaddr = window.to_cached(segment.virtual_address);
        let paddr = window.to_cached(segment.physical_address);
        if vaddr == segment.virtual_address && paddr == segment.physical_address {
            continue;
        }
        tracing::debug!(
            "segment at 0x{:x}/0x{:x} -> 0x{:x}/0x{:x}",
            segment.virtual_address,
            segment.physical_address,
            vaddr,
            paddr
        );
        patcher.set_segment_addresses(segment, vaddr, paddr)?;
    }

    if moved == 0 {
        tracing::info!("no sections in the uncached window");
    }
    Ok(patcher.into_bytes())
}

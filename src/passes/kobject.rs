//! Kernel object placeholders.
//!
//! The kernel object tables are generated from the first link and inserted into
//! the second one. To keep every other symbol at the same address across links,
//! the first link reserves placeholder regions whose sizes come from this pass.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::header::HeaderWriter;
use crate::image::Image;
use crate::passes::Pass;
use crate::utils::{align_up, map_file, write_output};

pub const GUARD: &str = "LINKER_KOBJECT_PREBUILT_DATA_H";

/// How a region's measured size is grown before alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    None,
    Percent,
    Bytes,
}

/// A placeholder region reserved by the linker script.
struct Region {
    /// Macro infix, as in `KOBJECT_<tag>_SZ`.
    tag: &'static str,
    section: &'static str,
    padding: Padding,
}

const REGIONS: &[Region] = &[
    Region { tag: "DATA", section: ".kobject_data.data", padding: Padding::Percent },
    Region { tag: "RODATA", section: ".kobject_data.rodata", padding: Padding::Bytes },
    Region { tag: "NOINIT", section: ".kobject_data.noinit", padding: Padding::None },
];

#[derive(Debug, Args)]
pub struct KobjectArgs {
    /// ELF produced by the first link
    #[arg(short, long)]
    pub input: PathBuf,

    /// Header to generate
    #[arg(short, long)]
    pub output: PathBuf,

    /// Extra space reserved in the data region, as a percentage of its size
    #[arg(long, default_value_t = 0)]
    pub data_pct: u64,

    /// Extra bytes reserved in the read-only data region
    #[arg(long, default_value_t = 0, value_parser = crate::utils::parse_u64)]
    pub rodata_extra: u64,
}

impl Pass for KobjectArgs {
    fn name(&self) -> &'static str {
        "kobject-placeholders"
    }

    fn execute(&self) -> Result<()> {
        let mmap = map_file(&self.input)?;
        let image = Image::parse(&mmap)
            .with_context(|| format!("failed to parse {}", self.input.display()))?;
        let header = generate(&image, self.data_pct, self.rodata_extra)?;
        write_output(&self.output, header.as_bytes())
    }
}

/// A placeholder size computed for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    pub tag: &'static str,
    pub align: u64,
    pub size: u64,
}

/// Measures every region present in the image.
pub fn measure(image: &Image, data_pct: u64, rodata_extra: u64) -> Result<Vec<Placeholder>> {
    let mut placeholders = Vec::new();
    for region in REGIONS {
        let Some(section) = image.section_by_name(region.section) else {
            tracing::debug!("no {} section, skipping KOBJECT_{}", region.section, region.tag);
            continue;
        };
        let align = section.align.max(1);
        if !align.is_power_of_two() {
            bail!("section {} has invalid alignment {}", section.name, section.align);
        }
        let padded = match region.padding {
            Padding::None => Some(section.size),
            Padding::Percent => section
                .size
                .checked_mul(data_pct)
                .map(|extra| extra / 100)
                .and_then(|extra| section.size.checked_add(extra)),
            Padding::Bytes => section.size.checked_add(rodata_extra),
        };
        let size = padded
            .and_then(|size| align_up(size, align))
            .with_context(|| format!("placeholder size for {} overflows", section.name))?;
        placeholders.push(Placeholder { tag: region.tag, align, size });
    }
    Ok(placeholders)
}

/// Renders the placeholder header.
pub fn generate(image: &Image, data_pct: u64, rodata_extra: u64) -> Result<String> {
    let mut header = HeaderWriter::new(GUARD)
        .describe("Sizes of the kernel object regions reserved in the prebuilt link.");
    for placeholder in measure(image, data_pct, rodata_extra)? {
        header.define(&format!("KOBJECT_{}_ALIGN", placeholder.tag), placeholder.align);
        header.define(&format!("KOBJECT_{}_SZ", placeholder.tag), placeholder.size);
    }
    Ok(header.finish())
}

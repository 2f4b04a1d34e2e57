//! Structure offset header.
//!
//! The kernel compiles a translation unit that defines one absolute global symbol per
//! structure member offset and structure size. This pass turns those symbols into a
//! header that assembly sources can include.

use anyhow::{Context, Result};
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::header::HeaderWriter;
use crate::image::Image;
use crate::passes::Pass;
use crate::utils::{map_file, write_output};

pub const DEFAULT_GUARD: &str = "__GEN_OFFSETS_H__";

const DESCRIPTION: &str = "This header file provides macros for the offsets of various structure\n\
members.  These offset macros are primarily intended to be used in\n\
assembly code.";

#[derive(Debug, Args)]
pub struct OffsetsArgs {
    /// Object file defining the offset symbols
    #[arg(short, long)]
    pub input: PathBuf,

    /// Header to generate
    #[arg(short, long)]
    pub output: PathBuf,

    /// Include guard macro
    #[arg(long, default_value = DEFAULT_GUARD)]
    pub guard: String,
}

impl Pass for OffsetsArgs {
    fn name(&self) -> &'static str {
        "offsets"
    }

    fn execute(&self) -> Result<()> {
        let mmap = map_file(&self.input)?;
        let image = Image::parse(&mmap)
            .with_context(|| format!("failed to parse {}", self.input.display()))?;
        let header = generate(&image, &self.guard);
        write_output(&self.output, header.as_bytes())
    }
}

/// Returns true for symbols that name a member offset or a structure size.
fn is_offset_symbol(name: &str) -> bool {
    name.ends_with("_OFFSET") || name.ends_with("_SIZEOF")
}

/// Collects the offset symbols of an object, keyed and sorted by name.
pub fn collect(image: &Image) -> BTreeMap<String, u64> {
    let mut offsets = BTreeMap::new();
    for sym in &image.symbols {
        if !sym.is_global() || !sym.is_absolute() || !is_offset_symbol(&sym.name) {
            continue;
        }
        if offsets.contains_key(&sym.name) {
            tracing::warn!("duplicate offset symbol {}, keeping the first", sym.name);
            continue;
        }
        offsets.insert(sym.name.clone(), sym.value);
    }
    offsets
}

/// Renders the offset header.
pub fn generate(image: &Image, guard: &str) -> String {
    let mut header = HeaderWriter::new(guard).describe(DESCRIPTION);
    for (name, value) in collect(image) {
        header.define_hex(&name, value);
    }
    tracing::debug!("{} offset symbols", header.len());
    header.finish()
}

//! Image checksum patching.
//!
//! The linker script reserves zero-filled placeholders, each named by a symbol, that
//! must end up holding a digest of the image. The digest covers the file bytes of
//! every allocated section in address order, skipping the bytes of every placeholder,
//! so writing the digest does not change what it covers.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use sha2::{Digest, Sha256, Sha512};
use std::ops::Range;
use std::path::PathBuf;

use crate::image::{Image, Section};
use crate::passes::Pass;
use crate::patch::{write_elf, ElfPatcher};

pub const DEFAULT_PREFIX: &str = "z_image_checksum_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn digest_len(self) -> u64 {
        match self {
            Algorithm::Sha256 => 32,
            Algorithm::Sha512 => 64,
        }
    }

    fn digest<'a>(self, chunks: impl Iterator<Item = &'a [u8]>) -> Vec<u8> {
        match self {
            Algorithm::Sha256 => hash::<Sha256>(chunks),
            Algorithm::Sha512 => hash::<Sha512>(chunks),
        }
    }
}

fn hash<'a, D: Digest>(chunks: impl Iterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut hasher = D::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize().to_vec()
}

#[derive(Debug, Args)]
pub struct ChecksumArgs {
    /// Linked ELF containing the placeholders
    pub elf: PathBuf,

    /// Output file (defaults to in-place)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Placeholder symbol; may be repeated. Overrides --prefix
    #[arg(long = "symbol")]
    pub symbols: Vec<String>,

    /// Treat every symbol starting with this prefix as a placeholder
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    #[arg(long, value_enum, default_value_t = Algorithm::Sha256)]
    pub algorithm: Algorithm,

    /// Check the placeholders instead of writing them
    #[arg(long)]
    pub verify: bool,
}

impl ChecksumArgs {
    fn selector(&self) -> Selector<'_> {
        if self.symbols.is_empty() {
            Selector::Prefix(&self.prefix)
        } else {
            Selector::Names(&self.symbols)
        }
    }
}

impl Pass for ChecksumArgs {
    fn name(&self) -> &'static str {
        "checksum"
    }

    fn execute(&self) -> Result<()> {
        let data = std::fs::read(&self.elf)
            .with_context(|| format!("failed to read {}", self.elf.display()))?;
        let image = Image::parse(&data)
            .with_context(|| format!("failed to parse {}", self.elf.display()))?;

        if self.verify {
            verify(&image, &self.selector(), self.algorithm)
                .with_context(|| format!("checksum verification failed for {}", self.elf.display()))?;
            tracing::info!("{}: checksums match", self.elf.display());
            return Ok(());
        }

        let patched = patch(&image, &self.selector(), self.algorithm)?;
        let output = self.output.as_ref().unwrap_or(&self.elf);
        write_elf(&self.elf, output, &patched)
    }
}

/// Which symbols name placeholders.
#[derive(Debug, Clone)]
pub enum Selector<'a> {
    Names(&'a [String]),
    Prefix(&'a str),
}

/// A placeholder resolved to a range of file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub symbol: String,
    pub file_range: Range<u64>,
}

/// Resolves the selected placeholder symbols to file ranges, sorted by offset.
pub fn find_placeholders(
    image: &Image,
    selector: &Selector,
    algorithm: Algorithm,
) -> Result<Vec<Placeholder>> {
    let symbols: Vec<_> = match selector {
        Selector::Names(names) => names
            .iter()
            .map(|name| {
                image
                    .symbol_by_name(name)
                    .with_context(|| format!("placeholder symbol {name} not found"))
            })
            .collect::<Result<_>>()?,
        Selector::Prefix(prefix) => {
            let found: Vec<_> = image
                .symbols
                .iter()
                .filter(|s| s.name.starts_with(prefix) && !s.is_undefined())
                .collect();
            if found.is_empty() {
                bail!("no placeholder symbols with prefix {prefix}");
            }
            found
        }
    };

    let len = algorithm.digest_len();
    let mut placeholders: Vec<Placeholder> = Vec::new();
    for sym in symbols {
        if sym.size != 0 && sym.size != len {
            bail!(
                "placeholder {} is {} bytes, {:?} needs {}",
                sym.name,
                sym.size,
                algorithm,
                len
            );
        }
        let section = image
            .section(usize::from(sym.section_index))
            .filter(|s| s.index != 0 && s.is_alloc() && s.has_file_data())
            .with_context(|| format!("placeholder {} is not in an allocated section", sym.name))?;
        let start = sym
            .value
            .checked_sub(section.address)
            .filter(|off| off.checked_add(len).is_some_and(|end| end <= section.size))
            .with_context(|| {
                format!("placeholder {} does not fit in section {}", sym.name, section.name)
            })?;
        image.section_data(section)?;
        let file_start = section
            .offset
            .checked_add(start)
            .with_context(|| format!("placeholder {} file offset overflows", sym.name))?;
        let placeholder = Placeholder {
            symbol: sym.name.clone(),
            file_range: file_start..file_start + len,
        };
        if placeholders.iter().any(|p| p.file_range == placeholder.file_range) {
            tracing::debug!("{} aliases another placeholder", sym.name);
            continue;
        }
        if let Some(other) = placeholders.iter().find(|p| overlaps(&p.file_range, &placeholder.file_range)) {
            bail!("placeholders {} and {} overlap", other.symbol, sym.name);
        }
        placeholders.push(placeholder);
    }
    placeholders.sort_by_key(|p| p.file_range.start);
    Ok(placeholders)
}

fn overlaps(a: &Range<u64>, b: &Range<u64>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Allocated sections with file content, in address order.
fn covered_sections<'i>(image: &'i Image) -> Vec<&'i Section> {
    let mut sections: Vec<_> = image
        .sections
        .iter()
        .filter(|s| s.is_alloc() && s.has_file_data())
        .collect();
    sections.sort_by_key(|s| (s.address, s.index));
    sections
}

/// Splits a section's file range around the placeholders.
fn covered_ranges(section: &Section, placeholders: &[Placeholder]) -> Vec<Range<u64>> {
    let mut ranges = Vec::new();
    let mut cursor = section.offset;
    let end = section.offset + section.size;
    for p in placeholders {
        if p.file_range.end <= cursor || p.file_range.start >= end {
            continue;
        }
        if p.file_range.start > cursor {
            ranges.push(cursor..p.file_range.start);
        }
        cursor = cursor.max(p.file_range.end);
    }
    if cursor < end {
        ranges.push(cursor..end);
    }
    ranges
}

/// Computes the digest of the image with the placeholders excluded.
pub fn compute(image: &Image, placeholders: &[Placeholder], algorithm: Algorithm) -> Result<Vec<u8>> {
    let mut chunks = Vec::new();
    for section in covered_sections(image) {
        let data = image.section_data(section)?;
        for range in covered_ranges(section, placeholders) {
            let start = (range.start - section.offset) as usize;
            let end = (range.end - section.offset) as usize;
            chunks.push(&data[start..end]);
        }
    }
    tracing::debug!("hashing {} bytes", chunks.iter().map(|c| c.len()).sum::<usize>());
    Ok(algorithm.digest(chunks.into_iter()))
}

/// Returns a copy of the file with every placeholder holding the digest.
pub fn patch(image: &Image, selector: &Selector, algorithm: Algorithm) -> Result<Vec<u8>> {
    let placeholders = find_placeholders(image, selector, algorithm)?;
    let digest = compute(image, &placeholders, algorithm)?;
    let mut patcher = ElfPatcher::new(image);
    for p in &placeholders {
        patcher.write_bytes(p.file_range.start, &digest)?;
        tracing::info!("{} <- {}", p.symbol, to_hex(&digest));
    }
    Ok(patcher.into_bytes())
}

/// Checks that every placeholder holds the digest of the image.
pub fn verify(image: &Image, selector: &Selector, algorithm: Algorithm) -> Result<()> {
    let placeholders = find_placeholders(image, selector, algorithm)?;
    let digest = compute(image, &placeholders, algorithm)?;
    for p in &placeholders {
        let stored = &image.data()[p.file_range.start as usize..p.file_range.end as usize];
        if stored != digest.as_slice() {
            bail!(
                "{} holds {}, expected {}",
                p.symbol,
                to_hex(stored),
                to_hex(&digest)
            );
        }
    }
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

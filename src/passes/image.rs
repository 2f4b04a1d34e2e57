//! Flat image emission.
//!
//! Flashing tools want the loadable content of the link output, placed at its load
//! (physical) addresses, either as a raw binary or as Intel HEX records.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, ValueEnum};
use ihex::Record;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::image::Image;
use crate::passes::Pass;
use crate::utils::{map_file, parse_u64, parse_u8, write_output};

const IHEX_RECORD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Bin,
    Ihex,
}

#[derive(Debug, Args)]
pub struct ImageArgs {
    /// Linked ELF
    #[arg(short, long)]
    pub input: PathBuf,

    /// Image to write
    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = Format::Bin)]
    pub format: Format,

    /// Byte used between segments and for padding (binary only)
    #[arg(long, default_value = "0xff", value_parser = parse_u8)]
    pub gap_fill: u8,

    /// Extend the binary up to this address
    #[arg(long, value_parser = parse_u64)]
    pub pad_to: Option<u64>,
}

impl Pass for ImageArgs {
    fn name(&self) -> &'static str {
        "image"
    }

    fn execute(&self) -> Result<()> {
        let mmap = map_file(&self.input)?;
        let image = Image::parse(&mmap)
            .with_context(|| format!("failed to parse {}", self.input.display()))?;
        let load = LoadMap::from_image(&image)?;
        let bytes = match self.format {
            Format::Bin => load.to_binary(self.gap_fill, self.pad_to)?,
            Format::Ihex => load.to_ihex(image.entry)?.into_bytes(),
        };
        write_output(&self.output, &bytes)
    }
}

/// Loadable content keyed by load address.
pub struct LoadMap<'data> {
    chunks: BTreeMap<u64, &'data [u8]>,
}

impl<'data> LoadMap<'data> {
    /// Collects the `PT_LOAD` segments of an image, rejecting overlaps.
    pub fn from_image(image: &Image<'data>) -> Result<Self> {
        let mut chunks: BTreeMap<u64, &'data [u8]> = BTreeMap::new();
        for segment in image.load_segments() {
            let data = image.segment_data(segment)?;
            let start = segment.physical_address;
            let end = start
                .checked_add(segment.file_size)
                .context("segment wraps the address space")?;
            let before = chunks.range(..end).next_back();
            if let Some((&other, other_data)) = before {
                if other + other_data.len() as u64 > start {
                    bail!(
                        "segment at 0x{:x}..0x{:x} overlaps segment at 0x{:x}",
                        start,
                        end,
                        other
                    );
                }
            }
            chunks.insert(start, data);
        }
        if chunks.is_empty() {
            bail!("no loadable segments");
        }
        Ok(Self { chunks })
    }

    /// Lowest load address.
    pub fn base(&self) -> u64 {
        self.chunks.keys().next().copied().unwrap_or(0)
    }

    /// One past the highest loaded byte.
    pub fn end(&self) -> u64 {
        self.chunks
            .iter()
            .map(|(addr, data)| addr + data.len() as u64)
            .max()
            .unwrap_or(0)
    }

    /// Flattens the content into a binary starting at the lowest load address.
    pub fn to_binary(&self, gap_fill: u8, pad_to: Option<u64>) -> Result<Vec<u8>> {
        let base = self.base();
        let mut end = self.end();
        if let Some(pad_to) = pad_to {
            if pad_to < end {
                bail!("--pad-to 0x{:x} is below the image end 0x{:x}", pad_to, end);
            }
            end = pad_to;
        }
        let len = usize::try_from(end - base).context("image too large")?;
        let mut out = vec![gap_fill; len];
        for (&addr, data) in &self.chunks {
            let start = (addr - base) as usize;
            out[start..start + data.len()].copy_from_slice(data);
        }
        Ok(out)
    }

    /// Encodes the content as Intel HEX with 32-bit linear addressing.
    pub fn to_ihex(&self, entry: u64) -> Result<String> {
        let mut out = String::new();
        for record in self.ihex_records(entry)? {
            let line = record
                .to_record_string()
                .map_err(|e| anyhow!("failed to encode {:?}: {:?}", record, e))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    fn ihex_records(&self, entry: u64) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut upper = 0u16;
        for (&addr, data) in &self.chunks {
            if addr + data.len() as u64 > 1 << 32 {
                bail!("segment at 0x{:x} is beyond the 32-bit Intel HEX range", addr);
            }
            let mut offset = 0usize;
            while offset < data.len() {
                let current = addr + offset as u64;
                let high = (current >> 16) as u16;
                if high != upper {
                    records.push(Record::ExtendedLinearAddress(high));
                    upper = high;
                }
                // Records never cross a 64 KiB boundary.
                let to_boundary = 0x1_0000 - (current & 0xffff) as usize;
                let len = IHEX_RECORD_LEN.min(data.len() - offset).min(to_boundary);
                records.push(Record::Data {
                    offset: current as u16,
                    value: data[offset..offset + len].to_vec(),
                });
                offset += len;
            }
        }
        if entry != 0 {
            let entry = u32::try_from(entry).context("entry point beyond 32 bits")?;
            records.push(Record::StartLinearAddress(entry));
        }
        records.push(Record::EndOfFile);
        Ok(records)
    }
}

//! Application memory partitions.
//!
//! User-mode code places its globals in sections named `data_smem_<partition>_data`
//! and `data_smem_<partition>_bss`. This pass scans the objects and archives of a
//! build for those sections and emits the linker script fragment that gathers each
//! partition into one contiguous, MPU-aligned region.

use anyhow::{bail, Context, Result};
use clap::Args;
use object::read::archive::ArchiveFile;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::image::Image;
use crate::passes::Pass;
use crate::utils::{map_file, write_output};

const SECTION_PREFIX: &str = "data_smem_";
const ARCHIVE_MAGIC: &[u8] = b"!<arch>\n";

#[derive(Debug, Args)]
pub struct AppPartitionsArgs {
    /// Object files or static libraries to scan
    pub inputs: Vec<PathBuf>,

    /// Directory scanned recursively for object files
    #[arg(short, long)]
    pub directory: Vec<PathBuf>,

    /// Place a library's whole data and bss in a partition (LIB PARTITION)
    #[arg(short, long, num_args = 2, value_names = ["LIB", "PARTITION"])]
    pub library: Vec<String>,

    /// Linker script fragment to generate
    #[arg(short, long)]
    pub output: PathBuf,
}

impl Pass for AppPartitionsArgs {
    fn name(&self) -> &'static str {
        "app-partitions"
    }

    fn execute(&self) -> Result<()> {
        let mut table = PartitionTable::default();

        let mut inputs = self.inputs.clone();
        for dir in &self.directory {
            find_objects(dir, &mut inputs)?;
        }
        if inputs.is_empty() && self.library.is_empty() {
            bail!("no input files");
        }

        for path in &inputs {
            let mmap = map_file(path)?;
            table
                .scan(&path.display().to_string(), &mmap)
                .with_context(|| format!("failed to scan {}", path.display()))?;
        }
        for pair in self.library.chunks(2) {
            if let [lib, partition] = pair {
                table.add_library(lib, partition);
            }
        }

        write_output(&self.output, table.render().as_bytes())
    }
}

/// Recursively collects `*.o` and `*.obj` files under `dir`, in sorted order.
fn find_objects(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to read directory {}", dir.display()))?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            find_objects(&path, out)?;
        } else if matches!(path.extension().and_then(|e| e.to_str()), Some("o" | "obj")) {
            out.push(path);
        }
    }
    Ok(())
}

/// Extracts the partition name from an input section name.
///
/// Accepts `data_smem_<name>_data` and `data_smem_<name>_bss`, optionally followed
/// by a `.suffix`.
pub fn partition_of(section: &str) -> Option<&str> {
    let rest = section.strip_prefix(SECTION_PREFIX)?;
    let base = rest.split('.').next()?;
    let name = base
        .strip_suffix("_data")
        .or_else(|| base.strip_suffix("_bss"))?;
    (!name.is_empty()).then_some(name)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Total size of the partition's input sections.
    pub size: u64,
    /// Libraries whose data and bss land in this partition.
    pub libraries: Vec<String>,
}

/// Partitions discovered across all inputs.
#[derive(Debug, Default)]
pub struct PartitionTable {
    partitions: BTreeMap<String, Partition>,
}

impl PartitionTable {
    /// Scans an object file or an archive of object files.
    pub fn scan(&mut self, origin: &str, data: &[u8]) -> Result<()> {
        if data.starts_with(ARCHIVE_MAGIC) {
            let archive = ArchiveFile::parse(data).context("failed to parse archive")?;
            for member in archive.members() {
                let member = member?;
                let name = String::from_utf8_lossy(member.name()).to_string();
                let member_data = member.data(data)?;
                match Image::parse(member_data) {
                    Ok(image) => self.scan_image(&format!("{origin}({name})"), &image),
                    Err(err) => tracing::debug!("skipping {origin}({name}): {err:#}"),
                }
            }
            Ok(())
        } else {
            let image = Image::parse(data).context("failed to parse object file")?;
            self.scan_image(origin, &image);
            Ok(())
        }
    }

    fn scan_image(&mut self, origin: &str, image: &Image) {
        for section in &image.sections {
            let Some(name) = partition_of(&section.name) else {
                continue;
            };
            tracing::debug!("{origin}: {} ({} bytes) -> {name}", section.name, section.size);
            let partition = self.partitions.entry(name.to_string()).or_default();
            partition.size = partition.size.saturating_add(section.size);
        }
    }

    /// Maps a whole library into a partition, creating the partition if needed.
    pub fn add_library(&mut self, library: &str, partition: &str) {
        let entry = self.partitions.entry(partition.to_string()).or_default();
        if !entry.libraries.iter().any(|l| l == library) {
            entry.libraries.push(library.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&Partition> {
        self.partitions.get(name)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Partitions largest first, ties broken by name.
    pub fn ordered(&self) -> Vec<(&str, &Partition)> {
        let mut ordered: Vec<_> = self
            .partitions
            .iter()
            .map(|(name, p)| (name.as_str(), p))
            .collect();
        ordered.sort_by(|a, b| b.1.size.cmp(&a.1.size).then_with(|| a.0.cmp(b.0)));
        ordered
    }

    /// Renders the linker script fragment.
    pub fn render(&self) -> String {
        let mut out = String::from("/* Auto generated code do not modify */\n");
        let ordered = self.ordered();
        for (name, partition) in &ordered {
            let z = format!("z_data_smem_{name}");
            let _ = writeln!(out, "\t\tSMEM_PARTITION_ALIGN({z}_bss_end - {z}_part_start);");
            let _ = writeln!(out, "\t\t{z}_part_start = .;");
            let _ = writeln!(out, "\t\tKEEP(*(data_smem_{name}_data*))");
            for lib in &partition.libraries {
                let _ = writeln!(out, "\t\tKEEP(*{lib}:*(.data .data.* .sdata .sdata.*))");
            }
            let _ = writeln!(out, "\t\t{z}_bss_start = .;");
            let _ = writeln!(out, "\t\tKEEP(*(data_smem_{name}_bss*))");
            for lib in &partition.libraries {
                let _ = writeln!(
                    out,
                    "\t\tKEEP(*{lib}:*(.bss .bss.* .sbss .sbss.* COMMON COMMON.*))"
                );
            }
            let _ = writeln!(out, "\t\t{z}_bss_end = .;");
            let _ = writeln!(out, "\t\tSMEM_PARTITION_ALIGN({z}_bss_end - {z}_part_start);");
            let _ = writeln!(out, "\t\t{z}_part_end = .;");
            out.push('\n');
        }
        for (name, _) in &ordered {
            let z = format!("z_data_smem_{name}");
            let _ = writeln!(out, "\t{z}_part_size = {z}_part_end - {z}_part_start;");
            let _ = writeln!(out, "\t{z}_bss_size = {z}_bss_end - {z}_bss_start;");
        }
        out
    }
}

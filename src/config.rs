//! Configuration module.
//!
//! This module defines the command-line interface (CLI) using `clap`.
//! Every post-processing pass is a subcommand with its own argument struct,
//! defined next to the pass in `crate::passes`.

use clap::{Parser, Subcommand};

use crate::passes::{
    app_partitions::AppPartitionsArgs, checksum::ChecksumArgs, fix_addrs::FixAddrsArgs,
    image::ImageArgs, kobject::KobjectArgs, offsets::OffsetsArgs, Pass,
};

/// Post-link processing for RTOS images.
///
/// Each subcommand reads an object file or linked image and deterministically
/// produces a header, a linker fragment, a patched ELF or a flat image. Any
/// malformed input is an error and exits non-zero.
#[derive(Parser, Debug)]
#[command(name = "postlink", author, version, about, long_about = None)]
pub struct Config {
    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn", help = "Set the logging level")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate the structure offset header from an object file
    Offsets(OffsetsArgs),
    /// Generate kernel object placeholder sizes for the final link
    KobjectPlaceholders(KobjectArgs),
    /// Generate the application memory partition linker fragment
    AppPartitions(AppPartitionsArgs),
    /// Patch or verify image checksum placeholders
    Checksum(ChecksumArgs),
    /// Move sections from the uncached to the cached address window
    FixAddrs(FixAddrsArgs),
    /// Write the loadable content as a flat binary or Intel HEX
    Image(ImageArgs),
}

impl Command {
    pub fn pass(&self) -> &dyn Pass {
        match self {
            Command::Offsets(args) => args,
            Command::KobjectPlaceholders(args) => args,
            Command::AppPartitions(args) => args,
            Command::Checksum(args) => args,
            Command::FixAddrs(args) => args,
            Command::Image(args) => args,
        }
    }
}

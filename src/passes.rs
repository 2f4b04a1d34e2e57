//! Post-link passes.
//!
//! This module defines the `Pass` trait implemented by every subcommand's
//! arguments. A pass reads its inputs, computes its artifact with a pure function
//! that the tests drive directly, and writes the artifact out.

use anyhow::Result;

pub mod app_partitions;
pub mod checksum;
pub mod fix_addrs;
pub mod image;
pub mod kobject;
pub mod offsets;

/// A one-shot transform invoked by the build.
pub trait Pass {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Runs the pass to completion. Any error aborts without partial output.
    fn execute(&self) -> Result<()>;
}

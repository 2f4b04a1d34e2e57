//! Post-link processing library.
//!
//! This library provides the passes behind the `postlink` tool.
//! It is organized into several modules:
//! - `config`: CLI configuration.
//! - `image`: Read-only ELF model shared by every pass.
//! - `patch`: In-place rewriting of header fields and placeholders.
//! - `header`: Generated C header text.
//! - `passes`: The post-link transforms themselves.

pub mod config;
pub mod header;
pub mod image;
pub mod passes;
pub mod patch;
pub mod utils;

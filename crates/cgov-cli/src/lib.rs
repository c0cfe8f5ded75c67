//! # cgov-cli — Offline Tooling for Policy Rule Sets
//!
//! Provides the `cgov` command-line interface. Every subcommand works on
//! files only; nothing talks to a policy runtime.
//!
//! ## Subcommands
//!
//! - `cgov normalize` — Convert one rule file to canonical form.
//! - `cgov compile` — Compile a directory of rule files into a bundle and manifest.
//! - `cgov conflicts` — Report conflicts in a directory of rule files.
//! - `cgov diff` — Compare two manifests.
//! - `cgov verify` — Check a bundle against its manifest.
//! - `cgov facts` — Answer a goal against a fact program.
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |---|---|
//! | 0 | success |
//! | 1 | check failed: blocking conflicts, verification failure, unproven goal |
//! | 2 | operational error: unreadable file, malformed rule, cycle |

pub mod compile;
pub mod conflicts;
pub mod diff;
pub mod facts;
pub mod normalize;
pub mod source;
pub mod verify;

/// The command did what was asked.
pub const EXIT_OK: u8 = 0;
/// The command ran but the check it performs did not pass.
pub const EXIT_CHECK_FAILED: u8 = 1;
/// The command could not run.
pub const EXIT_ERROR: u8 = 2;

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}

/// Serialize `value` as pretty JSON into `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

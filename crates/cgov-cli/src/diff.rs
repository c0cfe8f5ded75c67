//! # Diff Subcommand
//!
//! Lists rules added, removed and modified between two manifests.

use std::path::PathBuf;

use anyhow::{bail, Result};
use cgov_core::ChangeSet;
use cgov_manifest::{diff, CompilationManifest};
use clap::Args;

use crate::{read_json, EXIT_OK};

/// Arguments for the diff subcommand.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// The older manifest.
    pub old: PathBuf,

    /// The newer manifest.
    pub new: PathBuf,

    /// Print the change set as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the diff subcommand.
pub fn run_diff(args: &DiffArgs) -> Result<u8> {
    let old: CompilationManifest = read_json(&args.old)?;
    let new: CompilationManifest = read_json(&args.new)?;
    if old.namespace != new.namespace {
        bail!("manifests belong to different namespaces: {} and {}", old.namespace, new.namespace);
    }
    let changes = diff(&old, &new);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
    } else {
        print!("{}", render(&changes));
    }
    Ok(EXIT_OK)
}

/// One `+`, `-` or `~` line per changed rule.
pub fn render(changes: &ChangeSet) -> String {
    if changes.is_empty() {
        return "no changes\n".to_string();
    }
    let mut out = String::new();
    for id in &changes.added {
        out.push_str(&format!("+ {id}\n"));
    }
    for id in &changes.removed {
        out.push_str(&format!("- {id}\n"));
    }
    for id in &changes.modified {
        out.push_str(&format!("~ {id}\n"));
    }
    out
}

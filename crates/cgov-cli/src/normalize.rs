//! # Normalize Subcommand
//!
//! Converts one rule file to canonical policy text.
//!
//! ```bash
//! cgov normalize rules/contractors.yaml
//! cgov normalize rules/s3.json --format access_policy --json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use cgov_core::lang::render_rule;
use cgov_core::SourceFormat;
use cgov_router::{FormatRouter, NormalizedRule};
use clap::Args;

use crate::source::normalize_file;
use crate::EXIT_OK;

/// Arguments for the normalize subcommand.
#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// Rule file to convert.
    pub file: PathBuf,

    /// Source format; detected from the content when absent.
    #[arg(long)]
    pub format: Option<SourceFormat>,

    /// Print the normalized rules as JSON instead of policy text.
    #[arg(long)]
    pub json: bool,
}

/// Execute the normalize subcommand.
pub fn run_normalize(args: &NormalizeArgs) -> Result<u8> {
    let rules = normalize_file(&FormatRouter::default(), &args.file, args.format)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
    } else {
        print!("{}", render(&rules));
    }
    Ok(EXIT_OK)
}

/// Policy text for `rules`, each preceded by a comment naming it.
pub fn render(rules: &[NormalizedRule]) -> String {
    let mut out = String::new();
    for rule in rules {
        out.push_str(&format!("# {} ({})\n", rule.id, rule.format));
        out.push_str(&render_rule(&rule.canonical));
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

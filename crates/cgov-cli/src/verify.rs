//! # Verify Subcommand
//!
//! Checks that a compiled bundle is exactly the artifact its manifest was
//! bound to and that its text is the assembly of its fragments. Exits 1 on
//! any mismatch.

use std::path::PathBuf;

use anyhow::Result;
use cgov_compiler::CompiledBundle;
use cgov_manifest::{verify_integrity, CompilationManifest};
use clap::Args;

use crate::{read_json, EXIT_CHECK_FAILED, EXIT_OK};

/// Arguments for the verify subcommand.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Compiled bundle (bundle.json).
    pub bundle: PathBuf,

    /// Manifest the bundle claims to be built from.
    pub manifest: PathBuf,
}

/// Execute the verify subcommand.
pub fn run_verify(args: &VerifyArgs) -> Result<u8> {
    let bundle: CompiledBundle = read_json(&args.bundle)?;
    let manifest: CompilationManifest = read_json(&args.manifest)?;
    match check(&bundle, &manifest) {
        Ok(()) => {
            println!("OK: bundle {}/{} matches {}", bundle.namespace, bundle.version, manifest.aggregate_digest);
            Ok(EXIT_OK)
        }
        Err(reason) => {
            eprintln!("FAILED: {reason}");
            Ok(EXIT_CHECK_FAILED)
        }
    }
}

/// Both integrity checks; the first failure is reported.
pub fn check(bundle: &CompiledBundle, manifest: &CompilationManifest) -> Result<(), String> {
    bundle.verify_assembly().map_err(|e| e.to_string())?;
    verify_integrity(manifest, bundle).map_err(|e| e.to_string())
}

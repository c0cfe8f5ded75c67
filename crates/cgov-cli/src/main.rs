//! # cgov CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.
//! Handler errors are logged and mapped to exit code 2.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cgov_cli::compile::{run_compile, CompileArgs};
use cgov_cli::conflicts::{run_conflicts, ConflictsArgs};
use cgov_cli::diff::{run_diff, DiffArgs};
use cgov_cli::facts::{run_facts, FactsArgs};
use cgov_cli::normalize::{run_normalize, NormalizeArgs};
use cgov_cli::verify::{run_verify, VerifyArgs};
use cgov_cli::EXIT_ERROR;

/// Offline tooling for policy rule sets.
///
/// Normalizes rule files from any supported format, compiles rule
/// directories into verifiable bundles, reports conflicts and answers
/// fact queries, without a policy runtime.
#[derive(Parser, Debug)]
#[command(name = "cgov", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert one rule file to canonical policy text.
    Normalize(NormalizeArgs),

    /// Compile a directory of rule files into a bundle and manifest.
    Compile(CompileArgs),

    /// Report conflicts in a directory of rule files.
    Conflicts(ConflictsArgs),

    /// Compare two manifests.
    Diff(DiffArgs),

    /// Check a bundle against its manifest.
    Verify(VerifyArgs),

    /// Answer a goal against a fact program.
    Facts(FactsArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v.
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let json = std::env::var("CGOV_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    let result = match cli.command {
        Commands::Normalize(args) => run_normalize(&args),
        Commands::Compile(args) => run_compile(&args),
        Commands::Conflicts(args) => run_conflicts(&args),
        Commands::Diff(args) => run_diff(&args),
        Commands::Verify(args) => run_verify(&args),
        Commands::Facts(args) => run_facts(&args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compile_with_previous() {
        let cli = Cli::try_parse_from([
            "cgov",
            "compile",
            "rules",
            "--namespace",
            "ops",
            "--out",
            "dist/ops",
            "--previous",
            "dist/old/manifest.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Compile(args) => {
                assert_eq!(args.namespace, "ops");
                assert_eq!(args.out.to_str(), Some("dist/ops"));
                assert!(args.previous.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_normalize_with_format() {
        let cli = Cli::try_parse_from(["cgov", "normalize", "s3.json", "--format", "access_policy"]).unwrap();
        match cli.command {
            Commands::Normalize(args) => {
                assert_eq!(args.format, Some(cgov_core::SourceFormat::AccessPolicy));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_format_fails() {
        assert!(Cli::try_parse_from(["cgov", "normalize", "a.json", "--format", "xml"]).is_err());
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["cgov", "-vv", "diff", "a.json", "b.json"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn facts_requires_goal() {
        assert!(Cli::try_parse_from(["cgov", "facts", "context.facts"]).is_err());
    }
}

//! # Conflicts Subcommand
//!
//! Reports conflicts in a directory of rule files. Exits 1 when any
//! conflict is blocking, so the command can gate a CI pipeline.

use std::path::PathBuf;

use anyhow::Result;
use cgov_conflict::{Conflict, ConflictConfig, ConflictDetector};
use cgov_router::FormatRouter;
use clap::Args;

use crate::source::load_rules;
use crate::{EXIT_CHECK_FAILED, EXIT_OK};

/// Arguments for the conflicts subcommand.
#[derive(Args, Debug)]
pub struct ConflictsArgs {
    /// Directory of rule files.
    pub dir: PathBuf,

    /// Print conflicts as JSON.
    #[arg(long)]
    pub json: bool,

    /// Skip the near-duplicate check.
    #[arg(long)]
    pub no_similarity: bool,
}

/// Execute the conflicts subcommand.
pub fn run_conflicts(args: &ConflictsArgs) -> Result<u8> {
    let rules = load_rules(&FormatRouter::default(), &args.dir)?;
    let config = ConflictConfig {
        similarity_enabled: !args.no_similarity,
        ..ConflictConfig::default()
    };
    let conflicts = ConflictDetector::new(config).detect(rules.values());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
    } else {
        print_table(&conflicts);
        println!("{} rules, {} conflicts", rules.len(), conflicts.len());
    }
    Ok(exit_code(&conflicts))
}

/// 1 when any conflict blocks activation.
pub fn exit_code(conflicts: &[Conflict]) -> u8 {
    if conflicts.iter().any(Conflict::is_blocking) {
        EXIT_CHECK_FAILED
    } else {
        EXIT_OK
    }
}

fn print_table(conflicts: &[Conflict]) {
    for conflict in conflicts {
        let rules: Vec<&str> = conflict.rules.iter().map(|r| r.as_str()).collect();
        println!(
            "  {:<9} {:<16} {}  {}",
            conflict.severity.as_str(),
            conflict.kind.as_str(),
            rules.join(", "),
            conflict.description
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &std::path::Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn clean_rule_set_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "allow-admins.rego", "allow {\n    input.user.role == \"admin\"\n}\n");
        let args = ConflictsArgs {
            dir: dir.path().to_path_buf(),
            json: true,
            no_similarity: false,
        };
        assert_eq!(run_conflicts(&args).unwrap(), EXIT_OK);
    }

    #[test]
    fn contradiction_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "allow-contractors.rego",
            "allow {\n    input.requester.category == \"contractor\"\n}\n",
        );
        write(
            dir.path(),
            "deny-contractors.rego",
            "deny {\n    input.requester.category == \"contractor\"\n    input.request.hour >= 22\n}\n",
        );
        let args = ConflictsArgs {
            dir: dir.path().to_path_buf(),
            json: false,
            no_similarity: true,
        };
        assert_eq!(run_conflicts(&args).unwrap(), EXIT_CHECK_FAILED);
    }
}

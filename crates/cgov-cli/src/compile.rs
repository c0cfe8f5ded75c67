//! # Compile Subcommand
//!
//! Compiles a directory of rule files into a bundle for one namespace.
//! Deterministic conflict patches are applied; blocking conflicts stop the
//! build with exit code 1. With `--previous`, the build is incremental
//! against the bundle stored next to that manifest.
//!
//! ```bash
//! cgov compile rules/ --namespace payments --out dist/payments
//! cgov compile rules/ --namespace payments --out dist/next --previous dist/payments/manifest.json
//! ```
//!
//! Output directory layout:
//!
//! ```text
//! manifest.json   compilation manifest, bound to the bundle
//! bundle.json     compiled bundle with fragments and dependency graph
//! policy.rego     deployable bundle text
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use cgov_compiler::{CompileOutput, CompileRequest, CompiledBundle, CompilerConfig, IncrementalCompiler};
use cgov_conflict::{Conflict, ConflictConfig, ConflictDetector, ConflictResolver, EscalationQueue};
use cgov_core::{BundleVersion, ChangeSet, Namespace, Rule, RuleId};
use cgov_manifest::{compute_manifest, diff, verify_integrity, CompilationManifest};
use cgov_router::FormatRouter;
use clap::Args;

use crate::source::load_rules;
use crate::{read_json, write_json, EXIT_CHECK_FAILED, EXIT_OK};

/// Patch-and-recheck rounds before giving up on further patches.
const MAX_RESOLUTION_ROUNDS: usize = 4;

/// Manifest file name in an output directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Bundle file name in an output directory.
pub const BUNDLE_FILE: &str = "bundle.json";
/// Bundle text file name in an output directory.
pub const POLICY_FILE: &str = "policy.rego";

/// Arguments for the compile subcommand.
#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Directory of rule files.
    pub dir: PathBuf,

    /// Namespace to compile for.
    #[arg(long)]
    pub namespace: String,

    /// Output directory.
    #[arg(long, default_value = "dist")]
    pub out: PathBuf,

    /// Manifest of the previous build. Its sibling bundle.json, when present
    /// and intact, is the base for an incremental build.
    #[arg(long)]
    pub previous: Option<PathBuf>,

    /// Full-rebuild threshold as a fraction of rules affected.
    #[arg(long)]
    pub full_rebuild_ratio: Option<f64>,
}

/// The base an incremental build starts from.
#[derive(Debug)]
pub struct Previous {
    /// Manifest of the previous build.
    pub manifest: CompilationManifest,
    /// Its bundle, when present and intact.
    pub bundle: Option<CompiledBundle>,
}

/// Execute the compile subcommand.
pub fn run_compile(args: &CompileArgs) -> Result<u8> {
    let namespace = Namespace::new(args.namespace.as_str()).context("invalid --namespace")?;
    let mut rules = load_rules(&FormatRouter::default(), &args.dir)?;

    let conflicts = resolve_conflicts(&namespace, &mut rules)?;
    let blocking: Vec<&Conflict> = conflicts.iter().filter(|c| c.is_blocking()).collect();
    if !blocking.is_empty() {
        eprintln!("compilation blocked by {} conflict(s):", blocking.len());
        for conflict in blocking {
            eprintln!("  {}  {}", conflict.id, conflict.description);
        }
        return Ok(EXIT_CHECK_FAILED);
    }

    let previous = args.previous.as_deref().map(load_previous).transpose()?;
    let mut config = CompilerConfig::default();
    if let Some(ratio) = args.full_rebuild_ratio {
        config.full_rebuild_ratio = ratio;
    }
    let compiler = IncrementalCompiler::new(config)?;
    let output = compile(&compiler, &namespace, &rules, previous.as_ref())?;

    write_output(&args.out, &output)?;
    println!("  namespace:  {namespace}");
    println!("  version:    {}", output.bundle.version);
    println!("  mode:       {}", output.bundle.mode.as_str());
    println!("  rules:      {} ({} rendered)", output.bundle.rule_count(), output.affected.len());
    println!("  manifest:   {}", output.manifest.aggregate_digest);
    println!("  conflicts:  {} (patched or accepted)", conflicts.len());
    println!("  written:    {}", args.out.display());
    Ok(EXIT_OK)
}

/// Detect conflicts and apply deterministic patches until the set settles.
/// Returns every conflict seen; blocking ones remain open.
pub fn resolve_conflicts(namespace: &Namespace, rules: &mut BTreeMap<RuleId, Rule>) -> Result<Vec<Conflict>> {
    let config = ConflictConfig::default();
    let detector = ConflictDetector::new(config.clone());
    let resolver = ConflictResolver::new(config, Arc::new(EscalationQueue::new()));
    let mut last = Vec::new();
    for round in 1..=MAX_RESOLUTION_ROUNDS {
        let mut conflicts = detector.detect(rules.values());
        let report = resolver.resolve_all(namespace, &mut conflicts, rules)?;
        last = conflicts;
        if !report.changed_rules() {
            break;
        }
        tracing::debug!(namespace = %namespace, round, "patches applied, re-checking conflicts");
    }
    Ok(last)
}

/// Compile `rules`, incrementally when `previous` carries a usable bundle.
pub fn compile(
    compiler: &IncrementalCompiler,
    namespace: &Namespace,
    rules: &BTreeMap<RuleId, Rule>,
    previous: Option<&Previous>,
) -> Result<CompileOutput> {
    let version = previous
        .and_then(|p| p.manifest.version())
        .map_or(BundleVersion::INITIAL, BundleVersion::next);
    let existing = previous.and_then(|p| p.bundle.as_ref());
    let changes = match previous {
        Some(p) if existing.is_some() => {
            let current = compute_manifest(namespace.clone(), rules.values())?;
            diff(&p.manifest, &current)
        }
        _ => ChangeSet::all_added(rules.keys().cloned()),
    };
    Ok(compiler.compile(CompileRequest {
        namespace,
        rules,
        changes: &changes,
        existing,
        version,
    })?)
}

/// Read a previous build's manifest and, when it verifies, its bundle.
pub fn load_previous(manifest_path: &Path) -> Result<Previous> {
    let manifest: CompilationManifest = read_json(manifest_path)?;
    let bundle_path = manifest_path.with_file_name(BUNDLE_FILE);
    let bundle = if bundle_path.is_file() {
        let bundle: CompiledBundle = read_json(&bundle_path)?;
        match verify_integrity(&manifest, &bundle) {
            Ok(()) => Some(bundle),
            Err(e) => {
                tracing::warn!(error = %e, "previous bundle does not match its manifest, rebuilding fully");
                None
            }
        }
    } else {
        None
    };
    Ok(Previous { manifest, bundle })
}

fn write_output(out: &Path, output: &CompileOutput) -> Result<()> {
    std::fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    write_json(&out.join(MANIFEST_FILE), &output.manifest)?;
    write_json(&out.join(BUNDLE_FILE), &output.bundle)?;
    let policy = out.join(POLICY_FILE);
    std::fs::write(&policy, &output.bundle.text).with_context(|| format!("failed to write {}", policy.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_dir(rules: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in rules {
            std::fs::write(dir.path().join(format!("{name}.rego")), body).unwrap();
        }
        dir
    }

    fn args(dir: &Path, out: &Path, previous: Option<PathBuf>) -> CompileArgs {
        CompileArgs {
            dir: dir.to_path_buf(),
            namespace: "ops".into(),
            out: out.to_path_buf(),
            previous,
            full_rebuild_ratio: None,
        }
    }

    const ALLOW_ADMINS: &str = "allow {\n    input.user.role == \"admin\"\n}\n";
    const ALLOW_OPS: &str = "allow {\n    input.user.team == \"ops\"\n}\n";

    #[test]
    fn writes_manifest_bundle_and_text() {
        let rules = rule_dir(&[("allow-admins", ALLOW_ADMINS)]);
        let out = tempfile::tempdir().unwrap();
        assert_eq!(run_compile(&args(rules.path(), out.path(), None)).unwrap(), EXIT_OK);

        let manifest: CompilationManifest = read_json(&out.path().join(MANIFEST_FILE)).unwrap();
        let bundle: CompiledBundle = read_json(&out.path().join(BUNDLE_FILE)).unwrap();
        assert_eq!(manifest.rule_count, 1);
        assert_eq!(bundle.version, BundleVersion::INITIAL);
        verify_integrity(&manifest, &bundle).unwrap();
        let text = std::fs::read_to_string(out.path().join(POLICY_FILE)).unwrap();
        assert!(text.contains("package cgov.ops"));
    }

    #[test]
    fn previous_build_bumps_version() {
        let rules = rule_dir(&[("allow-admins", ALLOW_ADMINS)]);
        let first = tempfile::tempdir().unwrap();
        run_compile(&args(rules.path(), first.path(), None)).unwrap();

        std::fs::write(rules.path().join("allow-ops.rego"), ALLOW_OPS).unwrap();
        let second = tempfile::tempdir().unwrap();
        let previous = Some(first.path().join(MANIFEST_FILE));
        assert_eq!(run_compile(&args(rules.path(), second.path(), previous)).unwrap(), EXIT_OK);

        let bundle: CompiledBundle = read_json(&second.path().join(BUNDLE_FILE)).unwrap();
        assert_eq!(bundle.version, BundleVersion::INITIAL.next());
        assert_eq!(bundle.rule_count(), 2);
    }

    #[test]
    fn blocking_conflict_stops_the_build() {
        let rules = rule_dir(&[
            ("allow-contractors", "allow {\n    input.requester.category == \"contractor\"\n}\n"),
            (
                "deny-contractors",
                "deny {\n    input.requester.category == \"contractor\"\n    input.request.hour >= 22\n}\n",
            ),
        ]);
        let out = tempfile::tempdir().unwrap();
        let out_dir = out.path().join("dist");
        assert_eq!(run_compile(&args(rules.path(), &out_dir, None)).unwrap(), EXIT_CHECK_FAILED);
        assert!(!out_dir.exists());
    }

    #[test]
    fn invalid_namespace_is_an_error() {
        let rules = rule_dir(&[("allow-admins", ALLOW_ADMINS)]);
        let out = tempfile::tempdir().unwrap();
        let mut bad = args(rules.path(), out.path(), None);
        bad.namespace = "Not Valid".into();
        assert!(run_compile(&bad).is_err());
    }
}

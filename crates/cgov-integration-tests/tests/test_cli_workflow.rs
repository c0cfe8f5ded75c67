//! Offline CLI workflow over a mixed-format rule directory: compile,
//! verify, recompile against the previous build, diff and conflict check.

use std::path::Path;

use cgov_cli::compile::{run_compile, CompileArgs, BUNDLE_FILE, MANIFEST_FILE, POLICY_FILE};
use cgov_cli::conflicts::{run_conflicts, ConflictsArgs};
use cgov_cli::diff::{run_diff, DiffArgs};
use cgov_cli::verify::{run_verify, VerifyArgs};
use cgov_cli::{read_json, write_json, EXIT_CHECK_FAILED, EXIT_OK};
use cgov_compiler::CompiledBundle;
use cgov_core::{BundleVersion, RuleId, SourceFormat};
use cgov_manifest::{diff, CompilationManifest};

const EXPORTS_JSON: &str = r#"{
    "Version": "2012-10-17",
    "Statement": {
        "Effect": "Deny",
        "Action": "records:Export",
        "Resource": "*",
        "Condition": {
            "StringEquals": {"requester.category": "contractor"},
            "NumericGreaterThanEquals": {"request.hour": "22"}
        }
    }
}"#;

const ON_CALL_YAML: &str = "rules:\n  - when:\n      user.team: ops\n    then: allow\n";

fn write_rules(dir: &Path, admin_rule: &str) {
    std::fs::write(dir.join("exports.json"), EXPORTS_JSON).unwrap();
    std::fs::write(dir.join("on-call.yaml"), ON_CALL_YAML).unwrap();
    std::fs::write(dir.join("allow-admins.rego"), admin_rule).unwrap();
}

fn compile_args(rules: &Path, out: &Path, previous: Option<&Path>) -> CompileArgs {
    CompileArgs {
        dir: rules.to_path_buf(),
        namespace: "records".into(),
        out: out.to_path_buf(),
        previous: previous.map(|p| p.join(MANIFEST_FILE)),
        full_rebuild_ratio: None,
    }
}

fn verify_args(out: &Path) -> VerifyArgs {
    VerifyArgs {
        bundle: out.join(BUNDLE_FILE),
        manifest: out.join(MANIFEST_FILE),
    }
}

#[test]
fn compile_verify_recompile_and_diff() {
    let rules = tempfile::tempdir().unwrap();
    let builds = tempfile::tempdir().unwrap();
    let first = builds.path().join("v1");
    let second = builds.path().join("v2");
    write_rules(rules.path(), "allow {\n    input.user.role == \"admin\"\n}\n");

    assert_eq!(run_compile(&compile_args(rules.path(), &first, None)).unwrap(), EXIT_OK);
    assert_eq!(run_verify(&verify_args(&first)).unwrap(), EXIT_OK);

    let m1: CompilationManifest = read_json(&first.join(MANIFEST_FILE)).unwrap();
    assert_eq!(m1.rule_count, 3);
    assert_eq!(m1.format_distribution[SourceFormat::AccessPolicy.as_str()], 1);
    assert_eq!(m1.format_distribution[SourceFormat::RuleList.as_str()], 1);
    assert_eq!(m1.format_distribution[SourceFormat::Canonical.as_str()], 1);
    let text = std::fs::read_to_string(first.join(POLICY_FILE)).unwrap();
    assert!(text.starts_with("package cgov.records"));

    write_rules(rules.path(), "allow {\n    input.user.role == \"owner\"\n}\n");
    let previous = Some(first.as_path());
    assert_eq!(run_compile(&compile_args(rules.path(), &second, previous)).unwrap(), EXIT_OK);
    assert_eq!(run_verify(&verify_args(&second)).unwrap(), EXIT_OK);

    let b1: CompiledBundle = read_json(&first.join(BUNDLE_FILE)).unwrap();
    let b2: CompiledBundle = read_json(&second.join(BUNDLE_FILE)).unwrap();
    assert_eq!(b2.version, BundleVersion(2));
    let exports = RuleId::new("exports").unwrap();
    assert_eq!(b1.fragments[&exports], b2.fragments[&exports]);

    let m2: CompilationManifest = read_json(&second.join(MANIFEST_FILE)).unwrap();
    let changes = diff(&m1, &m2);
    assert!(changes.added.is_empty() && changes.removed.is_empty());
    assert_eq!(changes.modified.into_iter().collect::<Vec<_>>(), vec![RuleId::new("allow-admins").unwrap()]);
    let diff_args = DiffArgs {
        old: first.join(MANIFEST_FILE),
        new: second.join(MANIFEST_FILE),
        json: true,
    };
    assert_eq!(run_diff(&diff_args).unwrap(), EXIT_OK);

    let conflicts = ConflictsArgs {
        dir: rules.path().to_path_buf(),
        json: true,
        no_similarity: false,
    };
    assert_eq!(run_conflicts(&conflicts).unwrap(), EXIT_OK);
}

#[test]
fn bundle_from_another_build_fails_verification() {
    let rules = tempfile::tempdir().unwrap();
    let builds = tempfile::tempdir().unwrap();
    let a = builds.path().join("a");
    let b = builds.path().join("b");
    write_rules(rules.path(), "allow {\n    input.user.role == \"admin\"\n}\n");
    run_compile(&compile_args(rules.path(), &a, None)).unwrap();
    write_rules(rules.path(), "allow {\n    input.user.role == \"auditor\"\n}\n");
    run_compile(&compile_args(rules.path(), &b, None)).unwrap();

    let mixed = VerifyArgs {
        bundle: b.join(BUNDLE_FILE),
        manifest: a.join(MANIFEST_FILE),
    };
    assert_eq!(run_verify(&mixed).unwrap(), EXIT_CHECK_FAILED);
}

#[test]
fn tampered_previous_bundle_is_rebuilt_fully() {
    let rules = tempfile::tempdir().unwrap();
    let builds = tempfile::tempdir().unwrap();
    let first = builds.path().join("v1");
    let second = builds.path().join("v2");
    write_rules(rules.path(), "allow {\n    input.user.role == \"admin\"\n}\n");
    run_compile(&compile_args(rules.path(), &first, None)).unwrap();

    let path = first.join(BUNDLE_FILE);
    let mut bundle: CompiledBundle = read_json(&path).unwrap();
    bundle.text.push_str("\n# injected\n");
    write_json(&path, &bundle).unwrap();

    assert_eq!(run_compile(&compile_args(rules.path(), &second, Some(&first))).unwrap(), EXIT_OK);
    let rebuilt: CompiledBundle = read_json(&second.join(BUNDLE_FILE)).unwrap();
    assert_eq!(rebuilt.mode.as_str(), "full");
    assert_eq!(rebuilt.version, BundleVersion(2));
    assert_eq!(run_verify(&verify_args(&second)).unwrap(), EXIT_OK);
}

//! Loading rule files from disk.
//!
//! A rule directory holds one payload per file. The file stem is the rule
//! identifier; payloads that expand into several rules get `<stem>.<suffix>`
//! identifiers. Hidden files and files with other extensions are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cgov_core::{Rule, RuleId, SourceFormat};
use cgov_router::{FormatRouter, NormalizedRule, RawRule};

/// Extensions read from a rule directory.
pub const RULE_EXTENSIONS: [&str; 5] = ["json", "yaml", "yml", "rego", "policy"];

/// The format a file extension pins, if any. JSON and YAML carry several
/// formats and are left to detection.
pub fn format_for_extension(path: &Path) -> Option<SourceFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rego") | Some("policy") => Some(SourceFormat::Canonical),
        _ => None,
    }
}

/// Rule identifier derived from a file name.
pub fn rule_id_for(path: &Path) -> Result<RuleId> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("file name is not valid UTF-8: {}", path.display()))?;
    RuleId::new(stem).with_context(|| format!("cannot derive a rule id from {}", path.display()))
}

/// Rule files in `dir`, sorted by name.
pub fn rule_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        let known = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| RULE_EXTENSIONS.contains(&e));
        if path.is_file() && !hidden && known {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Normalize one file into every rule it describes.
pub fn normalize_file(
    router: &FormatRouter,
    path: &Path,
    declared: Option<SourceFormat>,
) -> Result<Vec<NormalizedRule>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let raw = RawRule::new(rule_id_for(path)?, text.as_str());
    let declared = declared.or_else(|| format_for_extension(path));
    router
        .normalize_all(&raw, declared)
        .with_context(|| format!("rule file {} rejected", path.display()))
}

/// Build a rule from router output, carrying the metadata its payload declared.
pub fn to_rule(normalized: NormalizedRule) -> Result<Rule> {
    let id = normalized.id.clone();
    let mut builder = Rule::builder(normalized.id, normalized.format, normalized.canonical)
        .priority(normalized.priority.unwrap_or(0));
    if let Some(category) = normalized.category {
        builder = builder.category(category);
    }
    for winner in normalized.overrides {
        builder = builder.overrides(winner);
    }
    builder.build().with_context(|| format!("rule {id} could not be canonicalized"))
}

/// Load every rule in `dir`. Two files producing the same identifier is an error.
pub fn load_rules(router: &FormatRouter, dir: &Path) -> Result<BTreeMap<RuleId, Rule>> {
    let mut rules = BTreeMap::new();
    for path in rule_files(dir)? {
        for normalized in normalize_file(router, &path, None)? {
            let rule = to_rule(normalized)?;
            if rules.contains_key(&rule.id) {
                bail!("duplicate rule id {} (from {})", rule.id, path.display());
            }
            rules.insert(rule.id.clone(), rule);
        }
    }
    tracing::debug!(dir = %dir.display(), rules = rules.len(), "rule directory loaded");
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOW_ADMINS: &str = "allow {\n    input.user.role == \"admin\"\n}\n";

    #[test]
    fn extension_pins_canonical_format() {
        assert_eq!(format_for_extension(Path::new("a.rego")), Some(SourceFormat::Canonical));
        assert_eq!(format_for_extension(Path::new("a.json")), None);
    }

    #[test]
    fn rule_id_comes_from_stem() {
        assert_eq!(rule_id_for(Path::new("/tmp/allow-admins.rego")).unwrap().as_str(), "allow-admins");
    }

    #[test]
    fn skips_hidden_and_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.rego"), ALLOW_ADMINS).unwrap();
        std::fs::write(dir.path().join("a.rego"), ALLOW_ADMINS).unwrap();
        std::fs::write(dir.path().join(".hidden.rego"), ALLOW_ADMINS).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a rule").unwrap();
        let files = rule_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, ["a.rego", "b.rego"]);
    }

    #[test]
    fn loads_rules_keyed_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("allow-admins.rego"), ALLOW_ADMINS).unwrap();
        let rules = load_rules(&FormatRouter::default(), dir.path()).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = rules.values().next().unwrap();
        assert_eq!(rule.id.as_str(), "allow-admins");
        assert_eq!(rule.source_format, SourceFormat::Canonical);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let err = load_rules(&FormatRouter::default(), Path::new("/nonexistent/cgov-rules")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read directory"));
    }
}

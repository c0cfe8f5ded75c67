//! The [`FormatRouter`]: detection, conversion, validation.

use cgov_core::lang::{is_compiler_reserved, parse_rule, render_rule, CanonicalRule};
use cgov_core::{FormatError, RuleId, SourceFormat};
use serde::{Deserialize, Serialize};

use crate::detect::{detect, Detection};
use crate::formats::converter_for;
use crate::payload::{NormalizedRule, RawRule};

/// Router configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Format assumed when detection finds no marker. `None` rejects such payloads.
    pub default_format: Option<SourceFormat>,
}

/// Normalizes raw rules into validated canonical rules. Stateless apart
/// from its configuration; safe to share.
#[derive(Debug, Clone, Default)]
pub struct FormatRouter {
    config: RouterConfig,
}

impl FormatRouter {
    /// Create a router.
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Resolve the format to use for `raw`: the declared one if given,
    /// otherwise detection, otherwise the configured default.
    pub fn resolve_format(
        &self,
        raw: &RawRule,
        declared: Option<SourceFormat>,
    ) -> Result<SourceFormat, FormatError> {
        if let Some(format) = declared {
            return Ok(format);
        }
        match detect(&raw.payload) {
            Detection::Detected(format) => Ok(format),
            Detection::Unknown(reason) => match self.config.default_format {
                Some(format) => {
                    tracing::debug!(rule = %raw.id, %format, %reason, "format not detected, using default");
                    Ok(format)
                }
                None => Err(FormatError::Undetectable(format!("rule {}: {reason}", raw.id))),
            },
        }
    }

    /// Normalize a payload that must yield exactly one rule.
    pub fn normalize(
        &self,
        raw: &RawRule,
        declared: Option<SourceFormat>,
    ) -> Result<NormalizedRule, FormatError> {
        let mut rules = self.normalize_all(raw, declared)?;
        if rules.len() != 1 {
            return Err(FormatError::RuleCount(rules.len()));
        }
        Ok(rules.remove(0))
    }

    /// Normalize a payload into every rule it describes. Rule lists and
    /// multi-statement access policies produce `<id>.<suffix>` identifiers.
    pub fn normalize_all(
        &self,
        raw: &RawRule,
        declared: Option<SourceFormat>,
    ) -> Result<Vec<NormalizedRule>, FormatError> {
        let format = self.resolve_format(raw, declared)?;
        let converter = converter_for(format);
        let converted = converter.convert(&raw.payload).map_err(|e| {
            tracing::warn!(rule = %raw.id, %format, error = %e, "rule rejected by format router");
            e
        })?;

        let mut out = Vec::with_capacity(converted.len());
        for rule in converted {
            let id = match &rule.suffix {
                None => raw.id.clone(),
                Some(suffix) => RuleId::new(format!("{}.{suffix}", raw.id)).map_err(|e| {
                    FormatError::Malformed {
                        format,
                        message: e.to_string(),
                    }
                })?,
            };
            validate(&rule.canonical, format)?;
            out.push(NormalizedRule {
                id,
                format,
                canonical: rule.canonical,
                priority: rule.priority,
                category: rule.category,
                overrides: rule.overrides,
            });
        }
        tracing::debug!(rule = %raw.id, %format, produced = out.len(), "normalized rule payload");
        Ok(out)
    }
}

/// Syntax-validate a converted rule: heads owned by the bundle compiler are
/// rejected, keyed decision heads are rejected, and the rendered text must
/// re-parse to the same tree.
pub fn validate(rule: &CanonicalRule, format: SourceFormat) -> Result<(), FormatError> {
    if is_compiler_reserved(&rule.head.name) {
        return Err(FormatError::Unsupported {
            format,
            construct: format!("reserved rule head '{}'", rule.head.name),
        });
    }
    if rule.is_decision() && (rule.head.key.is_some() || rule.head.value.is_some()) {
        return Err(FormatError::Unsupported {
            format,
            construct: format!("keyed or valued decision head '{}'", rule.head.name),
        });
    }
    let rendered = render_rule(rule);
    let reparsed = parse_rule(&rendered)?;
    if reparsed != *rule {
        return Err(FormatError::Malformed {
            format,
            message: format!("canonical output does not round-trip:\n{rendered}"),
        });
    }
    Ok(())
}

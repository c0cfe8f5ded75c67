//! Canonical policy text, passed through after validation.

use cgov_core::lang::parse_rules;
use cgov_core::{FormatError, SourceFormat};

use super::{malformed, unsupported, ConvertedRule, FormatConverter};
use crate::payload::RulePayload;

const FORMAT: SourceFormat = SourceFormat::Canonical;

/// Converter for [`SourceFormat::Canonical`]. A `package` line and imports
/// are accepted and dropped; the payload must hold exactly one rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalConverter;

impl FormatConverter for CanonicalConverter {
    fn format(&self) -> SourceFormat {
        FORMAT
    }

    fn convert(&self, payload: &RulePayload) -> Result<Vec<ConvertedRule>, FormatError> {
        let RulePayload::Text(text) = payload else {
            return Err(malformed(FORMAT, "canonical rules must be submitted as text"));
        };
        let mut rules = parse_rules(text)?;
        if rules.len() != 1 {
            return Err(FormatError::RuleCount(rules.len()));
        }
        let rule = rules.remove(0);
        if rule.is_default {
            return Err(unsupported(FORMAT, "default rules (the bundle preamble owns defaults)"));
        }
        Ok(vec![ConvertedRule::bare(rule)])
    }
}

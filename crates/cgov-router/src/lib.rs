//! # cgov-router — Format Router
//!
//! Normalizes candidate rules arriving in heterogeneous source formats into
//! the one canonical policy language the runtime accepts.
//!
//! ## Source Formats
//!
//! | Format | Shape | Converter |
//! |--------|-------|-----------|
//! | `structured_policy` | `{effect, conditions: [{attribute, operator, value}]}` | [`formats::structured`] |
//! | `rule_list` | `{rules: [{when: {...}, then}]}` | [`formats::rule_list`] |
//! | `access_policy` | `{Statement: [{Effect, Action, Resource, Condition}]}` | [`formats::access_policy`] |
//! | `canonical` | policy text | [`formats::canonical`] |
//!
//! Each [`cgov_core::SourceFormat`] variant has exactly one converter,
//! chosen by explicit detection ([`detect`]) or by the caller's declared
//! format, never by inspecting runtime types.
//!
//! ## Fail Closed
//!
//! A construct with no canonical equivalent (negated action sets, wildcard
//! patterns, disjunctive condition groups, unknown operators) is rejected
//! with [`cgov_core::FormatError::Unsupported`]. Logic is never silently
//! dropped. Every converter output is rendered and re-parsed before it is
//! returned.

pub mod detect;
pub mod formats;
pub mod payload;
pub mod router;

pub use detect::{detect, Detection};
pub use payload::{NormalizedRule, RawRule, RulePayload};
pub use router::{validate, FormatRouter, RouterConfig};

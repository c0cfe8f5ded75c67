//! Route modules.

pub mod escalations;
pub mod namespaces;

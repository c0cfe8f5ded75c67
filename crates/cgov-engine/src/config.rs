//! # Engine Configuration
//!
//! One YAML document aggregates every component's settings. Missing
//! sections take their defaults. A few deployment settings can be
//! overridden from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `CGOV_RUNTIME_URL` | `runtime.base_url` |
//! | `CGOV_RUNTIME_TOKEN` | runtime bearer token (never read from YAML) |
//! | `CGOV_FULL_REBUILD_RATIO` | `compiler.full_rebuild_ratio` |
//! | `CGOV_STORE_DIR` | `store.dir` |
//! | `CGOV_FAIL_MODE_NONCRITICAL` | `runtime.retry.failure.non_critical` |
//! | `PORT` | `server.port` |

use std::path::{Path, PathBuf};

use cgov_cache::CacheConfig;
use cgov_compiler::CompilerConfig;
use cgov_conflict::ConflictConfig;
use cgov_core::ValidationError;
use cgov_enforcement::EnforcementConfig;
use cgov_facts::FactsConfig;
use cgov_manifest::MIN_RETAINED_VERSIONS;
use cgov_router::RouterConfig;
use cgov_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Where compiled versions are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Filesystem store root. In-memory when absent.
    pub dir: Option<PathBuf>,
    /// Activated versions kept per namespace; at least the current and the
    /// previous one.
    pub retained_versions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            retained_versions: 5,
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Context fact program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Evaluator limits.
    pub limits: FactsConfig,
    /// File holding facts and rules for context derivation.
    pub program: Option<PathBuf>,
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Format router.
    pub router: RouterConfig,
    /// Incremental compiler.
    pub compiler: CompilerConfig,
    /// Multi-tier cache.
    pub cache: CacheConfig,
    /// Conflict detection and resolution.
    pub conflict: ConflictConfig,
    /// Enforcement optimizer.
    pub enforcement: EnforcementConfig,
    /// Runtime client.
    pub runtime: RuntimeConfig,
    /// Version store.
    pub store: StoreConfig,
    /// Context facts.
    pub context: ContextConfig,
    /// HTTP listener.
    pub server: ServerConfig,
}

impl EngineConfig {
    /// Parse YAML. An empty document yields the defaults.
    pub fn from_yaml(text: &str) -> Result<Self, EngineError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read YAML from `path`, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut config = match path {
            Some(p) => Self::from_yaml(&std::fs::read_to_string(p)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, usually the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ValidationError> {
        if let Some(url) = lookup("CGOV_RUNTIME_URL") {
            self.runtime.base_url = url;
        }
        if let Some(token) = lookup("CGOV_RUNTIME_TOKEN") {
            self.runtime = std::mem::take(&mut self.runtime).with_token(token);
        }
        if let Some(ratio) = lookup("CGOV_FULL_REBUILD_RATIO") {
            self.compiler.full_rebuild_ratio = parse_var("CGOV_FULL_REBUILD_RATIO", &ratio)?;
        }
        if let Some(dir) = lookup("CGOV_STORE_DIR") {
            self.store.dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = lookup("CGOV_FAIL_MODE_NONCRITICAL") {
            self.runtime.retry.failure.non_critical = mode.parse()?;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_var("PORT", &port)?;
        }
        Ok(())
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.compiler.validate()?;
        self.cache.validate()?;
        self.conflict.validate()?;
        self.enforcement.validate()?;
        self.runtime.validate()?;
        self.context.limits.validate()?;
        if self.store.retained_versions < MIN_RETAINED_VERSIONS {
            return Err(ValidationError::InvalidConfig {
                field: "store.retained_versions".into(),
                reason: format!("must be at least {MIN_RETAINED_VERSIONS}"),
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ValidationError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ValidationError::InvalidConfig {
        field: name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgov_runtime::FailureMode;
    use std::collections::HashMap;

    #[test]
    fn empty_yaml_is_default() {
        let c = EngineConfig::from_yaml("").unwrap();
        c.validate().unwrap();
        assert_eq!(c.server.port, 8080);
        assert_eq!(c.store.retained_versions, 5);
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let c = EngineConfig::from_yaml(
            "compiler:\n  full_rebuild_ratio: 0.5\nenforcement:\n  adaptive:\n    p95_target_ms: 20\n",
        )
        .unwrap();
        assert_eq!(c.compiler.full_rebuild_ratio, 0.5);
        assert_eq!(c.enforcement.adaptive.p95_target_ms, 20.0);
        assert_eq!(c.enforcement.adaptive.window_size, 200);
    }

    #[test]
    fn environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("CGOV_RUNTIME_URL", "http://opa:8181"),
            ("CGOV_RUNTIME_TOKEN", "t0ken"),
            ("CGOV_FULL_REBUILD_RATIO", "0.4"),
            ("CGOV_STORE_DIR", "/var/lib/cgov"),
            ("CGOV_FAIL_MODE_NONCRITICAL", "fail_closed"),
            ("PORT", "9090"),
        ]
        .into_iter()
        .collect();
        let mut c = EngineConfig::default();
        c.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.runtime.base_url, "http://opa:8181");
        assert!(c.runtime.token.is_some());
        assert!(!format!("{c:?}").contains("t0ken"));
        assert_eq!(c.compiler.full_rebuild_ratio, 0.4);
        assert_eq!(c.store.dir, Some(PathBuf::from("/var/lib/cgov")));
        assert_eq!(c.runtime.retry.failure.non_critical, FailureMode::FailClosed);
        assert_eq!(c.server.port, 9090);
    }

    #[test]
    fn bad_override_names_the_variable() {
        let mut c = EngineConfig::default();
        let err = c.apply_overrides(|k| (k == "PORT").then(|| "http".to_string())).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn retention_below_minimum_is_rejected() {
        let mut c = EngineConfig::default();
        c.store.retained_versions = 1;
        assert!(c.validate().is_err());
    }
}

//! Sweep configuration.
//!
//! A `SweepConfig` is resolved once at startup from layered sources and then
//! passed by value into every engine component. Nothing in the engine reads
//! the process environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};

/// Default minimum manifest age before deletion is considered.
pub const DEFAULT_THRESHOLD_DAYS: u32 = 30;

/// Default directory for audit records.
pub const DEFAULT_AUDIT_DIR: &str = "audits";

/// Default per-call timeout for control-plane commands (seconds).
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Suffix appended to a registry name to form its login server.
const LOGIN_SERVER_SUFFIX: &str = "azurecr.io";

/// Immutable configuration for one sweep run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Subscription scoping both the registry and the hosts
    pub subscription_id: String,

    /// Registry name (without the login server suffix)
    pub registry_name: String,

    /// Resource group containing the registry
    pub resource_group: String,

    /// Minimum manifest age in days (inclusive)
    pub threshold_days: u32,

    /// Directory receiving audit records
    pub audit_dir: PathBuf,

    /// Worker limits for remote calls
    pub concurrency: ConcurrencyConfig,

    /// Per-call timeout for control-plane commands in seconds
    pub command_timeout_secs: u64,
}

impl SweepConfig {
    /// Resolve a configuration from a merged layer, applying defaults and
    /// validating required values.
    pub fn resolve(layer: ConfigLayer) -> Result<Self> {
        let mut missing = Vec::new();
        let subscription_id = required(layer.subscription_id, "subscription_id", &mut missing);
        let registry_name = required(layer.registry_name, "registry_name", &mut missing);
        let resource_group = required(layer.resource_group, "resource_group", &mut missing);
        if !missing.is_empty() {
            return Err(SweepError::ConfigError(format!(
                "missing required value(s): {}",
                missing.join(", ")
            )));
        }

        let defaults = ConcurrencyConfig::default();
        let config = Self {
            subscription_id,
            registry_name,
            resource_group,
            threshold_days: layer.threshold_days.unwrap_or(DEFAULT_THRESHOLD_DAYS),
            audit_dir: layer
                .audit_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_DIR)),
            concurrency: ConcurrencyConfig {
                repositories: layer.repository_concurrency.unwrap_or(defaults.repositories),
                hosts: layer.host_concurrency.unwrap_or(defaults.hosts),
                deletions: layer.deletion_concurrency.unwrap_or(defaults.deletions),
            },
            command_timeout_secs: layer
                .command_timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self
            .registry_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(SweepError::ConfigError(format!(
                "registry name '{}' must be alphanumeric",
                self.registry_name
            )));
        }
        if self.concurrency.repositories == 0
            || self.concurrency.hosts == 0
            || self.concurrency.deletions == 0
        {
            return Err(SweepError::ConfigError(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(SweepError::ConfigError(
                "command timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Registry login server, e.g. `myacr.azurecr.io`.
    pub fn login_server(&self) -> String {
        format!(
            "{}.{}",
            self.registry_name.to_ascii_lowercase(),
            LOGIN_SERVER_SUFFIX
        )
    }
}

fn required(value: Option<String>, name: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => {
            missing.push(name);
            String::new()
        }
    }
}

/// Bounded worker counts for the parallel phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Concurrent per-repository manifest listings
    pub repositories: usize,
    /// Concurrent per-host configuration probes
    pub hosts: usize,
    /// Concurrent delete calls in commit mode
    pub deletions: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            repositories: 4,
            hosts: 8,
            deletions: 4,
        }
    }
}

/// One partial configuration source (flags, environment, or a YAML file).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub subscription_id: Option<String>,
    pub registry_name: Option<String>,
    pub resource_group: Option<String>,
    pub threshold_days: Option<u32>,
    pub audit_dir: Option<PathBuf>,
    pub repository_concurrency: Option<usize>,
    pub host_concurrency: Option<usize>,
    pub deletion_concurrency: Option<usize>,
    pub command_timeout_secs: Option<u64>,
}

impl ConfigLayer {
    /// Load a layer from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            SweepError::ConfigError(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let layer: ConfigLayer = serde_yaml::from_str(&data)?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(layer)
    }

    /// Merge two layers, values in `self` taking precedence.
    pub fn or(self, fallback: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            subscription_id: self.subscription_id.or(fallback.subscription_id),
            registry_name: self.registry_name.or(fallback.registry_name),
            resource_group: self.resource_group.or(fallback.resource_group),
            threshold_days: self.threshold_days.or(fallback.threshold_days),
            audit_dir: self.audit_dir.or(fallback.audit_dir),
            repository_concurrency: self
                .repository_concurrency
                .or(fallback.repository_concurrency),
            host_concurrency: self.host_concurrency.or(fallback.host_concurrency),
            deletion_concurrency: self.deletion_concurrency.or(fallback.deletion_concurrency),
            command_timeout_secs: self.command_timeout_secs.or(fallback.command_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_layer() -> ConfigLayer {
        ConfigLayer {
            subscription_id: Some("sub-123".to_string()),
            registry_name: Some("MyAcr".to_string()),
            resource_group: Some("rg-images".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let config = SweepConfig::resolve(complete_layer()).unwrap();
        assert_eq!(config.threshold_days, DEFAULT_THRESHOLD_DAYS);
        assert_eq!(config.audit_dir, PathBuf::from("audits"));
        assert_eq!(config.concurrency, ConcurrencyConfig::default());
        assert_eq!(config.command_timeout_secs, 60);
    }

    #[test]
    fn test_resolve_reports_all_missing_values() {
        let err = SweepConfig::resolve(ConfigLayer::default()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("subscription_id"));
        assert!(msg.contains("registry_name"));
        assert!(msg.contains("resource_group"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_resolve_treats_blank_as_missing() {
        let mut layer = complete_layer();
        layer.resource_group = Some("   ".to_string());
        let err = SweepConfig::resolve(layer).unwrap_err();
        assert!(err.to_string().contains("resource_group"));
    }

    #[test]
    fn test_resolve_rejects_bad_registry_name() {
        let mut layer = complete_layer();
        layer.registry_name = Some("my-acr.azurecr.io".to_string());
        assert!(SweepConfig::resolve(layer).is_err());
    }

    #[test]
    fn test_resolve_rejects_zero_concurrency() {
        let mut layer = complete_layer();
        layer.deletion_concurrency = Some(0);
        assert!(SweepConfig::resolve(layer).is_err());
    }

    #[test]
    fn test_login_server_is_lowercase() {
        let config = SweepConfig::resolve(complete_layer()).unwrap();
        assert_eq!(config.login_server(), "myacr.azurecr.io");
    }

    #[test]
    fn test_layer_precedence() {
        let flags = ConfigLayer {
            threshold_days: Some(14),
            ..Default::default()
        };
        let file = ConfigLayer {
            threshold_days: Some(90),
            registry_name: Some("fromfile".to_string()),
            ..Default::default()
        };
        let merged = flags.or(file);
        assert_eq!(merged.threshold_days, Some(14));
        assert_eq!(merged.registry_name.as_deref(), Some("fromfile"));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.yaml");
        std::fs::write(
            &path,
            "subscription_id: sub-1\nregistry_name: acr1\nresource_group: rg\nthreshold_days: 45\nhost_concurrency: 2\n",
        )
        .unwrap();

        let layer = ConfigLayer::from_yaml_file(&path).unwrap();
        let config = SweepConfig::resolve(layer).unwrap();
        assert_eq!(config.threshold_days, 45);
        assert_eq!(config.concurrency.hosts, 2);
        assert_eq!(config.concurrency.repositories, 4);
    }

    #[test]
    fn test_from_yaml_file_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.yaml");
        std::fs::write(&path, "registry: acr1\n").unwrap();
        assert!(ConfigLayer::from_yaml_file(&path).is_err());
    }

    #[test]
    fn test_from_yaml_file_missing() {
        let err = ConfigLayer::from_yaml_file(Path::new("/nonexistent/sweep.yaml")).unwrap_err();
        assert!(matches!(err, SweepError::ConfigError(_)));
    }
}

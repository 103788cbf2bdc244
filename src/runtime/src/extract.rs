//! Image reference extraction from host configuration.
//!
//! Hosts express their container image in several ways depending on the
//! platform. Each way is a small pure strategy; the collector tries them in
//! order and keeps the first match.

use acr_sweep_core::ImageName;

use crate::client::ContainerConfig;

/// App setting holding a custom container image.
pub const CUSTOM_IMAGE_SETTING: &str = "DOCKER_CUSTOM_IMAGE_NAME";

/// Runtime string prefix marking a container deployment.
const DOCKER_PREFIX: &str = "DOCKER|";

/// One way of locating an image reference in a [`ContainerConfig`].
#[derive(Clone, Copy)]
pub struct ExtractionStrategy {
    pub name: &'static str,
    extract: fn(&ContainerConfig) -> Option<String>,
}

impl ExtractionStrategy {
    pub const fn new(name: &'static str, extract: fn(&ContainerConfig) -> Option<String>) -> Self {
        Self { name, extract }
    }

    /// Run the strategy. Unparseable values count as no match.
    pub fn apply(&self, config: &ContainerConfig) -> Option<ImageName> {
        let raw = (self.extract)(config)?;
        match ImageName::parse(&raw) {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::debug!(strategy = self.name, raw = %raw, error = %e, "Ignoring unparseable image");
                None
            }
        }
    }
}

impl std::fmt::Debug for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionStrategy")
            .field("name", &self.name)
            .finish()
    }
}

/// Linux runtime string, `DOCKER|<image>`.
pub fn linux_fx_version(config: &ContainerConfig) -> Option<String> {
    config.linux_fx_version.as_deref().and_then(strip_docker_prefix)
}

/// Windows runtime string, `DOCKER|<image>`.
pub fn windows_fx_version(config: &ContainerConfig) -> Option<String> {
    config
        .windows_fx_version
        .as_deref()
        .and_then(strip_docker_prefix)
}

/// `DOCKER_CUSTOM_IMAGE_NAME` app setting, with or without the `DOCKER|` prefix.
pub fn custom_image_setting(config: &ContainerConfig) -> Option<String> {
    let value = config.app_settings.get(CUSTOM_IMAGE_SETTING)?.trim();
    let value = strip_docker_prefix(value).unwrap_or_else(|| value.to_string());
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn strip_docker_prefix(value: &str) -> Option<String> {
    let value = value.trim();
    let head = value.get(..DOCKER_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(DOCKER_PREFIX) {
        return None;
    }
    let image = value[DOCKER_PREFIX.len()..].trim();
    if image.is_empty() {
        None
    } else {
        Some(image.to_string())
    }
}

/// Strategies in the order they are tried.
pub fn default_strategies() -> Vec<ExtractionStrategy> {
    vec![
        ExtractionStrategy::new("linux_fx_version", linux_fx_version),
        ExtractionStrategy::new("windows_fx_version", windows_fx_version),
        ExtractionStrategy::new("app_setting", custom_image_setting),
    ]
}

/// First image any strategy finds, with the strategy's name.
pub fn extract_image(
    strategies: &[ExtractionStrategy],
    config: &ContainerConfig,
) -> Option<(&'static str, ImageName)> {
    strategies
        .iter()
        .find_map(|s| s.apply(config).map(|image| (s.name, image)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use acr_sweep_core::ImageTarget;

    fn settings(pairs: &[(&str, &str)]) -> ContainerConfig {
        ContainerConfig {
            app_settings: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_linux_fx_version() {
        let config = ContainerConfig {
            linux_fx_version: Some("DOCKER|myacr.azurecr.io/api:v1".to_string()),
            ..Default::default()
        };
        let (name, image) = extract_image(&default_strategies(), &config).unwrap();
        assert_eq!(name, "linux_fx_version");
        assert_eq!(image.repository, "api");
        assert_eq!(image.target, ImageTarget::Tag("v1".to_string()));
    }

    #[test]
    fn test_non_docker_runtime_ignored() {
        let config = ContainerConfig {
            linux_fx_version: Some("NODE|18-lts".to_string()),
            ..Default::default()
        };
        assert!(extract_image(&default_strategies(), &config).is_none());
    }

    #[test]
    fn test_docker_prefix_case_insensitive() {
        let config = ContainerConfig {
            windows_fx_version: Some("docker|myacr.azurecr.io/win:2022".to_string()),
            ..Default::default()
        };
        let (name, image) = extract_image(&default_strategies(), &config).unwrap();
        assert_eq!(name, "windows_fx_version");
        assert_eq!(image.repository, "win");
    }

    #[test]
    fn test_app_setting_fallback() {
        let config = settings(&[(CUSTOM_IMAGE_SETTING, "myacr.azurecr.io/worker:3")]);
        let (name, image) = extract_image(&default_strategies(), &config).unwrap();
        assert_eq!(name, "app_setting");
        assert_eq!(image.repository, "worker");
    }

    #[test]
    fn test_app_setting_with_prefix() {
        let config = settings(&[(CUSTOM_IMAGE_SETTING, "DOCKER|myacr.azurecr.io/worker:3")]);
        let (_, image) = extract_image(&default_strategies(), &config).unwrap();
        assert_eq!(image.registry, "myacr.azurecr.io");
    }

    #[test]
    fn test_first_match_wins() {
        let mut config = settings(&[(CUSTOM_IMAGE_SETTING, "myacr.azurecr.io/old:1")]);
        config.linux_fx_version = Some("DOCKER|myacr.azurecr.io/new:2".to_string());
        let (name, image) = extract_image(&default_strategies(), &config).unwrap();
        assert_eq!(name, "linux_fx_version");
        assert_eq!(image.repository, "new");
    }

    #[test]
    fn test_unparseable_falls_through() {
        let mut config = settings(&[(CUSTOM_IMAGE_SETTING, "myacr.azurecr.io/fallback:1")]);
        config.linux_fx_version = Some("DOCKER|".to_string());
        let (name, _) = extract_image(&default_strategies(), &config).unwrap();
        assert_eq!(name, "app_setting");
    }

    #[test]
    fn test_empty_config_has_no_image() {
        assert!(extract_image(&default_strategies(), &ContainerConfig::default()).is_none());
        assert!(custom_image_setting(&settings(&[(CUSTOM_IMAGE_SETTING, "  ")])).is_none());
    }
}

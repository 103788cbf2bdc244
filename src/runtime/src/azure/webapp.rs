//! App Service discovery through `az webapp`.

use std::collections::BTreeMap;

use acr_sweep_core::error::{Result, SweepError};
use async_trait::async_trait;
use serde::Deserialize;

use super::cli::{args, AzCli};
use crate::client::{ContainerConfig, Host, HostClient};

/// Host client enumerating the App Services of one subscription.
pub struct AzureWebApps {
    cli: AzCli,
    subscription: String,
}

impl AzureWebApps {
    pub fn new(cli: AzCli, subscription: impl Into<String>) -> Self {
        Self {
            cli,
            subscription: subscription.into(),
        }
    }

    fn host_args(parts: &[&str], host: &Host, slot: Option<&str>) -> Vec<String> {
        let mut command = args(parts);
        command.extend(args(&["--name", &host.name, "--resource-group", &host.resource_group]));
        if let Some(slot) = slot {
            command.push("--slot".to_string());
            command.push(slot.to_string());
        }
        command
    }

    fn host_error(host: &Host, e: SweepError) -> SweepError {
        SweepError::Host {
            host: host.name.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl HostClient for AzureWebApps {
    fn scope(&self) -> &str {
        &self.subscription
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let stdout = self.cli.run(&args(&["webapp", "list"])).await?;
        parse_hosts(&stdout)
    }

    async fn list_slots(&self, host: &Host) -> Result<Vec<String>> {
        let command = Self::host_args(&["webapp", "deployment", "slot", "list"], host, None);
        let stdout = self
            .cli
            .run(&command)
            .await
            .map_err(|e| Self::host_error(host, e))?;
        parse_slot_names(&stdout).map_err(|e| Self::host_error(host, e))
    }

    async fn get_container_config(
        &self,
        host: &Host,
        slot: Option<&str>,
    ) -> Result<ContainerConfig> {
        let site = Self::host_args(&["webapp", "config", "show"], host, slot);
        let settings = Self::host_args(&["webapp", "config", "appsettings", "list"], host, slot);

        let (site, settings) = tokio::join!(self.cli.run(&site), self.cli.run(&settings));
        let site = site.map_err(|e| Self::host_error(host, e))?;
        let settings = settings.map_err(|e| Self::host_error(host, e))?;
        parse_container_config(&site, &settings).map_err(|e| Self::host_error(host, e))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSite {
    id: String,
    name: String,
    #[serde(default)]
    resource_group: Option<String>,
}

/// Decode `az webapp list` output.
///
/// The resource group falls back to the one embedded in the resource ID.
pub fn parse_hosts(json: &str) -> Result<Vec<Host>> {
    let sites: Vec<RawSite> = serde_json::from_str(json)?;
    Ok(sites
        .into_iter()
        .map(|site| {
            let resource_group = site
                .resource_group
                .filter(|rg| !rg.is_empty())
                .or_else(|| resource_group_from_id(&site.id))
                .unwrap_or_default();
            Host {
                id: site.id,
                name: site.name,
                resource_group,
            }
        })
        .collect())
}

/// `/subscriptions/{sub}/resourceGroups/{rg}/providers/...` -> `{rg}`
fn resource_group_from_id(id: &str) -> Option<String> {
    let mut parts = id.split('/');
    while let Some(part) = parts.next() {
        if part.eq_ignore_ascii_case("resourceGroups") {
            return parts.next().filter(|rg| !rg.is_empty()).map(String::from);
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct RawSlot {
    name: String,
}

/// Decode `az webapp deployment slot list` output. Slot names come back as
/// `app/slot`; only the slot part is kept.
pub fn parse_slot_names(json: &str) -> Result<Vec<String>> {
    let slots: Vec<RawSlot> = serde_json::from_str(json)?;
    Ok(slots
        .into_iter()
        .filter_map(|slot| {
            let name = slot.name.rsplit('/').next().unwrap_or_default().trim().to_string();
            (!name.is_empty()).then_some(name)
        })
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSiteConfig {
    #[serde(default)]
    linux_fx_version: Option<String>,
    #[serde(default)]
    windows_fx_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSetting {
    name: String,
    #[serde(default)]
    value: Option<String>,
}

/// Combine `az webapp config show` and `az webapp config appsettings list`
/// output into one [`ContainerConfig`].
pub fn parse_container_config(site_json: &str, settings_json: &str) -> Result<ContainerConfig> {
    let site: RawSiteConfig = serde_json::from_str(site_json)?;
    let settings: Vec<RawSetting> = serde_json::from_str(settings_json)?;
    let app_settings: BTreeMap<String, String> = settings
        .into_iter()
        .filter_map(|s| s.value.map(|v| (s.name, v)))
        .collect();
    Ok(ContainerConfig {
        linux_fx_version: site.linux_fx_version.filter(|v| !v.trim().is_empty()),
        windows_fx_version: site.windows_fx_version.filter(|v| !v.trim().is_empty()),
        app_settings,
    })
}

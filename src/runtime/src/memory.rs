//! In-memory collaborators.
//!
//! Deterministic stand-ins for the registry, host-management, clock and
//! operator interfaces. Used by the engine's unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use acr_sweep_core::error::{Result, SweepError};
use acr_sweep_core::{Digest, Manifest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::watch;

use crate::client::{Clock, ContainerConfig, Host, HostClient, Operator, Page, RegistryClient};

/// Fixed reference instant used by tests: 2024-06-01T00:00:00Z.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// `fixed_now()` minus `days`.
pub fn days_ago(days: i64) -> DateTime<Utc> {
    fixed_now() - Duration::days(days)
}

/// A container config whose Linux runtime string points at `image`.
pub fn docker_linux(image: &str) -> ContainerConfig {
    ContainerConfig {
        linux_fx_version: Some(format!("DOCKER|{}", image)),
        ..Default::default()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Registry backed by a manifest list.
pub struct InMemoryRegistry {
    name: String,
    manifests: Vec<Manifest>,
    page_size: Option<usize>,
    listing_failure: Option<String>,
    failing_repositories: HashMap<String, String>,
    delete_failures: HashMap<Digest, String>,
    delete_delays: HashMap<Digest, StdDuration>,
    interrupt_on_delete: Option<watch::Sender<bool>>,
    deleted: Mutex<Vec<(String, Digest)>>,
}

impl InMemoryRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manifests: Vec::new(),
            page_size: None,
            listing_failure: None,
            failing_repositories: HashMap::new(),
            delete_failures: HashMap::new(),
            delete_delays: HashMap::new(),
            interrupt_on_delete: None,
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifests.push(manifest);
        self
    }

    /// Split every listing into pages of `size` items.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    pub fn failing_repository_listing(mut self, message: impl Into<String>) -> Self {
        self.listing_failure = Some(message.into());
        self
    }

    pub fn failing_repository(mut self, repository: &str, message: impl Into<String>) -> Self {
        self.failing_repositories
            .insert(repository.to_string(), message.into());
        self
    }

    pub fn failing_delete(mut self, digest: &str, message: impl Into<String>) -> Self {
        if let Ok(digest) = Digest::parse(digest) {
            self.delete_failures.insert(digest, message.into());
        }
        self
    }

    /// Hold the deletion of `digest` for `delay` before it completes.
    pub fn slow_delete(mut self, digest: &str, delay: StdDuration) -> Self {
        if let Ok(digest) = Digest::parse(digest) {
            self.delete_delays.insert(digest, delay);
        }
        self
    }

    /// Set `cancel` from inside the first deletion call, as an operator
    /// pressing Ctrl-C mid-run would.
    pub fn interrupting_on_delete(mut self, cancel: watch::Sender<bool>) -> Self {
        self.interrupt_on_delete = Some(cancel);
        self
    }

    /// Successful deletions so far, in call order.
    pub fn deleted(&self) -> Vec<(String, Digest)> {
        self.deleted
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn repositories(&self) -> Vec<String> {
        let mut repositories: Vec<String> = Vec::new();
        for manifest in &self.manifests {
            if !repositories.contains(&manifest.repository) {
                repositories.push(manifest.repository.clone());
            }
        }
        repositories
    }

    fn error(&self, message: impl Into<String>) -> SweepError {
        SweepError::Registry {
            registry: self.name.clone(),
            message: message.into(),
        }
    }

    fn page<T: Clone>(&self, items: &[T], start: usize) -> (Vec<T>, Option<usize>) {
        let end = match self.page_size {
            Some(size) => (start + size).min(items.len()),
            None => items.len(),
        };
        let next = if end < items.len() { Some(end) } else { None };
        (items[start.min(items.len())..end].to_vec(), next)
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    fn registry_name(&self) -> &str {
        &self.name
    }

    fn login_server(&self) -> String {
        format!("{}.azurecr.io", self.name.to_ascii_lowercase())
    }

    async fn list_repositories_page(&self, after: Option<&str>) -> Result<Page<String>> {
        if let Some(ref message) = self.listing_failure {
            return Err(self.error(message.clone()));
        }
        let repositories = self.repositories();
        let start = match after {
            Some(after) => repositories
                .iter()
                .position(|r| r == after)
                .map(|pos| pos + 1)
                .unwrap_or(repositories.len()),
            None => 0,
        };
        let (items, next) = self.page(&repositories, start);
        let next = next.and_then(|_| items.last().cloned());
        Ok(Page { items, next })
    }

    async fn list_manifests_page(
        &self,
        repository: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Manifest>> {
        if let Some(message) = self.failing_repositories.get(repository) {
            return Err(self.error(message.clone()));
        }
        let manifests: Vec<Manifest> = self
            .manifests
            .iter()
            .filter(|m| m.repository == repository)
            .cloned()
            .collect();
        let start = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let (items, next) = self.page(&manifests, start);
        Ok(Page {
            items,
            next: next.map(|n| n.to_string()),
        })
    }

    async fn delete_manifest(&self, repository: &str, digest: &Digest) -> Result<()> {
        if let Some(ref cancel) = self.interrupt_on_delete {
            cancel.send_replace(true);
        }
        if let Some(delay) = self.delete_delays.get(digest) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = self.delete_failures.get(digest) {
            return Err(self.error(message.clone()));
        }
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push((repository.to_string(), digest.clone()));
        }
        Ok(())
    }

    fn describe_delete(&self, repository: &str, digest: &Digest) -> String {
        format!("delete {}/{}@{}", self.login_server(), repository, digest)
    }
}

struct HostEntry {
    host: Host,
    primary: ContainerConfig,
    slots: Vec<(String, ContainerConfig)>,
}

/// Host-management client backed by fixed configs.
pub struct InMemoryHosts {
    scope: String,
    hosts: Vec<HostEntry>,
    listing_failure: Option<String>,
    failing_hosts: HashMap<String, String>,
    failing_slot_listings: HashMap<String, String>,
    failing_slots: HashMap<(String, String), String>,
}

impl InMemoryHosts {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            hosts: Vec::new(),
            listing_failure: None,
            failing_hosts: HashMap::new(),
            failing_slot_listings: HashMap::new(),
            failing_slots: HashMap::new(),
        }
    }

    pub fn with_host(mut self, name: &str, primary: ContainerConfig) -> Self {
        self.hosts.push(HostEntry {
            host: Host {
                id: format!("/subscriptions/{}/resourceGroups/rg/providers/Microsoft.Web/sites/{}", self.scope, name),
                name: name.to_string(),
                resource_group: "rg".to_string(),
            },
            primary,
            slots: Vec::new(),
        });
        self
    }

    /// Adds a slot to an already registered host.
    pub fn with_slot(mut self, host: &str, slot: &str, config: ContainerConfig) -> Self {
        if let Some(entry) = self.hosts.iter_mut().find(|e| e.host.name == host) {
            entry.slots.push((slot.to_string(), config));
        }
        self
    }

    pub fn failing_host_listing(mut self, message: impl Into<String>) -> Self {
        self.listing_failure = Some(message.into());
        self
    }

    pub fn failing_host(mut self, host: &str, message: impl Into<String>) -> Self {
        self.failing_hosts.insert(host.to_string(), message.into());
        self
    }

    pub fn failing_slot_listing(mut self, host: &str, message: impl Into<String>) -> Self {
        self.failing_slot_listings
            .insert(host.to_string(), message.into());
        self
    }

    pub fn failing_slot(mut self, host: &str, slot: &str, message: impl Into<String>) -> Self {
        self.failing_slots
            .insert((host.to_string(), slot.to_string()), message.into());
        self
    }

    fn entry(&self, host: &Host) -> Result<&HostEntry> {
        self.hosts
            .iter()
            .find(|e| e.host.name == host.name)
            .ok_or_else(|| SweepError::Host {
                host: host.name.clone(),
                message: "not found".to_string(),
            })
    }
}

#[async_trait]
impl HostClient for InMemoryHosts {
    fn scope(&self) -> &str {
        &self.scope
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        if let Some(ref message) = self.listing_failure {
            return Err(SweepError::Host {
                host: self.scope.clone(),
                message: message.clone(),
            });
        }
        Ok(self.hosts.iter().map(|e| e.host.clone()).collect())
    }

    async fn list_slots(&self, host: &Host) -> Result<Vec<String>> {
        if let Some(message) = self.failing_slot_listings.get(&host.name) {
            return Err(SweepError::Host {
                host: host.name.clone(),
                message: message.clone(),
            });
        }
        Ok(self
            .entry(host)?
            .slots
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn get_container_config(
        &self,
        host: &Host,
        slot: Option<&str>,
    ) -> Result<ContainerConfig> {
        let failure = match slot {
            None => self.failing_hosts.get(&host.name),
            Some(slot) => self
                .failing_slots
                .get(&(host.name.clone(), slot.to_string())),
        };
        if let Some(message) = failure {
            return Err(SweepError::Host {
                host: host.name.clone(),
                message: message.clone(),
            });
        }

        let entry = self.entry(host)?;
        match slot {
            None => Ok(entry.primary.clone()),
            Some(slot) => entry
                .slots
                .iter()
                .find(|(name, _)| name == slot)
                .map(|(_, config)| config.clone())
                .ok_or_else(|| SweepError::Host {
                    host: host.name.clone(),
                    message: format!("slot '{}' not found", slot),
                }),
        }
    }
}

/// Operator that replays fixed answers and records every prompt.
pub struct ScriptedOperator {
    mode: String,
    confirm: bool,
    token: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new(mode: impl Into<String>, confirm: bool, token: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            confirm,
            token: token.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Operator that confirms a commit run with the correct token.
    pub fn approving() -> Self {
        Self::new("2", true, crate::executor::CONFIRMATION_TOKEN)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
    }
}

impl Operator for ScriptedOperator {
    fn choose_mode(&self) -> Result<String> {
        self.record("mode");
        Ok(self.mode.clone())
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        self.record(prompt);
        Ok(self.confirm)
    }

    fn read_token(&self, prompt: &str) -> Result<String> {
        self.record(prompt);
        Ok(self.token.clone())
    }
}

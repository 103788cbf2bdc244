//! Collaborator interfaces consumed by the engine.
//!
//! The engine never talks to a control plane directly. Registry listing and
//! deletion, host discovery, time, and operator input all come through the
//! traits below so every component can be driven by in-memory fakes.

use std::collections::BTreeMap;

use acr_sweep_core::error::Result;
use acr_sweep_core::{Digest, Manifest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sweep::Analysis;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page, `None` on the last page
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// A final page with no continuation.
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Container registry operations.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Registry name (e.g., "myacr").
    fn registry_name(&self) -> &str;

    /// Login server host name references must carry (e.g., "myacr.azurecr.io").
    fn login_server(&self) -> String;

    /// List repository names, starting after `after` when paging.
    async fn list_repositories_page(&self, after: Option<&str>) -> Result<Page<String>>;

    /// List manifests of one repository, continuing from `cursor` when paging.
    async fn list_manifests_page(
        &self,
        repository: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Manifest>>;

    /// Delete one manifest and every tag pointing at it.
    async fn delete_manifest(&self, repository: &str, digest: &Digest) -> Result<()>;

    /// Human-readable form of the call `delete_manifest` would make.
    fn describe_delete(&self, repository: &str, digest: &Digest) -> String;
}

/// An application host whose primary slot and deployment slots may run images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Control-plane resource ID
    pub id: String,
    /// Host name, used as the host identifier in references
    pub name: String,
    pub resource_group: String,
}

/// Raw container-related configuration of one host slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// e.g. `DOCKER|myacr.azurecr.io/api:v1`
    pub linux_fx_version: Option<String>,
    pub windows_fx_version: Option<String>,
    pub app_settings: BTreeMap<String, String>,
}

/// Host-management operations.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Scope the hosts are enumerated in (e.g., a subscription ID).
    fn scope(&self) -> &str;

    async fn list_hosts(&self) -> Result<Vec<Host>>;

    /// Deployment slot names of a host, excluding the primary slot.
    async fn list_slots(&self, host: &Host) -> Result<Vec<String>>;

    /// Configuration of the primary slot (`None`) or a named slot.
    async fn get_container_config(&self, host: &Host, slot: Option<&str>)
        -> Result<ContainerConfig>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Operator input. Rendering prompts is the implementor's concern.
///
/// Prompts may block. They are run on a blocking thread and abandoned if the
/// run is interrupted while they wait.
pub trait Operator: Send + Sync {
    /// Called once with the finished analysis, before any question is asked.
    fn review(&self, _analysis: &Analysis) {}

    /// Raw deletion mode choice.
    fn choose_mode(&self) -> Result<String>;

    /// Yes/no question.
    fn confirm(&self, prompt: &str) -> Result<bool>;

    /// Free-form answer, compared by the caller against an exact token.
    fn read_token(&self, prompt: &str) -> Result<String>;
}

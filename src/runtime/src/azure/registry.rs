//! Container registry access through `az acr`.

use acr_sweep_core::error::{Result, SweepError};
use acr_sweep_core::{Digest, Manifest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::cli::{args, AzCli};
use crate::client::{Page, RegistryClient};

/// Repositories requested per `az acr repository list` call.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Registry client backed by the Azure CLI.
pub struct AzureRegistry {
    cli: AzCli,
    name: String,
    page_size: usize,
}

impl AzureRegistry {
    pub fn new(cli: AzCli, name: impl Into<String>) -> Self {
        Self {
            cli,
            name: name.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn delete_args(&self, repository: &str, digest: &Digest) -> Vec<String> {
        let image = format!("{}@{}", repository, digest);
        args(&[
            "acr", "repository", "delete", "--name", &self.name, "--image", &image, "--yes",
        ])
    }
}

#[async_trait]
impl RegistryClient for AzureRegistry {
    fn registry_name(&self) -> &str {
        &self.name
    }

    fn login_server(&self) -> String {
        format!("{}.azurecr.io", self.name.to_ascii_lowercase())
    }

    async fn list_repositories_page(&self, after: Option<&str>) -> Result<Page<String>> {
        let top = self.page_size.to_string();
        let mut command = args(&["acr", "repository", "list", "--name", &self.name, "--top", &top]);
        if let Some(after) = after {
            command.push("--last".to_string());
            command.push(after.to_string());
        }

        let items: Vec<String> = self.cli.run_json(&command).await.map_err(|e| SweepError::Registry {
            registry: self.name.clone(),
            message: e.to_string(),
        })?;
        let next = if items.len() >= self.page_size {
            items.last().cloned()
        } else {
            None
        };
        Ok(Page { items, next })
    }

    async fn list_manifests_page(
        &self,
        repository: &str,
        _cursor: Option<&str>,
    ) -> Result<Page<Manifest>> {
        let command = args(&[
            "acr", "manifest", "list-metadata", "--registry", &self.name, "--name", repository,
        ]);
        let stdout = self.cli.run(&command).await.map_err(|e| SweepError::Registry {
            registry: self.name.clone(),
            message: e.to_string(),
        })?;
        let manifests = parse_manifests(repository, &stdout).map_err(|e| SweepError::Registry {
            registry: self.name.clone(),
            message: e.to_string(),
        })?;
        Ok(Page::last(manifests))
    }

    async fn delete_manifest(&self, repository: &str, digest: &Digest) -> Result<()> {
        self.cli
            .run(&self.delete_args(repository, digest))
            .await
            .map(|_| ())
            .map_err(|e| SweepError::Registry {
                registry: self.name.clone(),
                message: e.to_string(),
            })
    }

    fn describe_delete(&self, repository: &str, digest: &Digest) -> String {
        self.cli.render(&self.delete_args(repository, digest))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    digest: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default, alias = "createdOn")]
    created_time: Option<String>,
    #[serde(default)]
    image_size: Option<u64>,
}

/// Decode `az acr manifest list-metadata` output.
///
/// Entries with an invalid digest or without a parseable creation time are
/// dropped with a warning; they can never pass the age gate.
pub fn parse_manifests(repository: &str, json: &str) -> Result<Vec<Manifest>> {
    let raw: Vec<RawManifest> = serde_json::from_str(json)?;
    let mut manifests = Vec::with_capacity(raw.len());

    for entry in raw {
        let digest = match Digest::parse(&entry.digest) {
            Ok(digest) => digest,
            Err(e) => {
                tracing::warn!(repository, digest = %entry.digest, error = %e, "Ignoring manifest with invalid digest");
                continue;
            }
        };
        let created_at = match entry.created_time.as_deref().map(DateTime::parse_from_rfc3339) {
            Some(Ok(time)) => time.with_timezone(&Utc),
            Some(Err(e)) => {
                tracing::warn!(repository, digest = %digest.short(), error = %e, "Ignoring manifest with unparseable creation time");
                continue;
            }
            None => {
                tracing::warn!(repository, digest = %digest.short(), "Ignoring manifest without creation time");
                continue;
            }
        };
        manifests.push(
            Manifest::new(repository, digest, created_at, entry.image_size.unwrap_or(0))
                .with_tags(entry.tags.unwrap_or_default()),
        );
    }

    Ok(manifests)
}

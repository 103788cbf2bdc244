//! Registry inventory.
//!
//! Builds a complete snapshot of every manifest in the registry. Manifest
//! listings run per repository with bounded concurrency and are merged only
//! after all of them finish.

use std::sync::Arc;

use acr_sweep_core::error::{Result, SweepError};
use acr_sweep_core::{Digest, Manifest};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::client::RegistryClient;

/// Upper bound on pages fetched for a single listing.
const MAX_PAGES: usize = 10_000;

/// A repository left out of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRepository {
    pub repository: String,
    pub reason: String,
}

/// Counts describing an inventory snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStats {
    pub repositories: usize,
    pub manifests: usize,
    pub skipped_repositories: usize,
    pub total_size_bytes: u64,
}

/// Snapshot of the registry's manifests.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Login server the manifests belong to
    pub registry: String,
    /// Repositories successfully listed, in listing order
    pub repositories: Vec<String>,
    pub manifests: Vec<Manifest>,
    pub skipped_repositories: Vec<SkippedRepository>,
}

impl Inventory {
    pub fn new(registry: impl Into<String>, manifests: Vec<Manifest>) -> Self {
        let mut repositories: Vec<String> = Vec::new();
        for manifest in &manifests {
            if !repositories.contains(&manifest.repository) {
                repositories.push(manifest.repository.clone());
            }
        }
        Self {
            registry: registry.into(),
            repositories,
            manifests,
            skipped_repositories: Vec::new(),
        }
    }

    pub fn stats(&self) -> InventoryStats {
        InventoryStats {
            repositories: self.repositories.len(),
            manifests: self.manifests.len(),
            skipped_repositories: self.skipped_repositories.len(),
            total_size_bytes: self.manifests.iter().map(|m| m.size_bytes).sum(),
        }
    }

    /// Manifests of one repository (exact, case-sensitive name match).
    pub fn manifests_in<'a>(&'a self, repository: &'a str) -> impl Iterator<Item = &'a Manifest> + 'a {
        self.manifests
            .iter()
            .filter(move |m| m.repository == repository)
    }

    pub fn contains_digest(&self, digest: &Digest) -> bool {
        self.manifests.iter().any(|m| &m.digest == digest)
    }
}

/// Enumerates repositories and manifests through a [`RegistryClient`].
pub struct RegistryInventory {
    client: Arc<dyn RegistryClient>,
    concurrency: usize,
}

impl RegistryInventory {
    pub fn new(client: Arc<dyn RegistryClient>, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// All repository names, pages flattened.
    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        let mut repositories = Vec::new();
        let mut after: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.client.list_repositories_page(after.as_deref()).await?;
            repositories.extend(page.items);
            match page.next {
                Some(next) if after.as_deref() == Some(next.as_str()) => {
                    return Err(SweepError::Registry {
                        registry: self.client.registry_name().to_string(),
                        message: format!("repository listing repeated cursor '{}'", next),
                    });
                }
                Some(next) => after = Some(next),
                None => return Ok(repositories),
            }
        }

        Err(SweepError::Registry {
            registry: self.client.registry_name().to_string(),
            message: format!("repository listing exceeded {} pages", MAX_PAGES),
        })
    }

    /// All manifests of one repository, pages flattened.
    pub async fn list_manifests(&self, repository: &str) -> Result<Vec<Manifest>> {
        fetch_manifests(self.client.as_ref(), repository).await
    }

    /// Build the full snapshot.
    ///
    /// Fails only if the repository list itself cannot be read. A repository
    /// whose manifests cannot be listed is skipped and recorded.
    pub async fn snapshot(&self) -> Result<Inventory> {
        let registry = self.client.registry_name().to_string();
        tracing::info!(registry = %registry, "Listing repositories");

        let repositories = self.list_repositories().await.map_err(|e| {
            SweepError::RepositoryEnumeration {
                registry: registry.clone(),
                message: e.to_string(),
            }
        })?;
        tracing::info!(count = repositories.len(), "Found repositories");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(repositories.len());
        for repository in &repositories {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let repository = repository.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                fetch_manifests(client.as_ref(), &repository).await
            }));
        }

        let mut inventory = Inventory {
            registry: self.client.login_server(),
            ..Default::default()
        };
        for (repository, handle) in repositories.into_iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SweepError::Registry {
                    registry: registry.clone(),
                    message: format!("manifest listing task failed: {}", e),
                }),
            };
            match result {
                Ok(manifests) => {
                    tracing::debug!(
                        repository = %repository,
                        manifests = manifests.len(),
                        "Listed manifests"
                    );
                    inventory.manifests.extend(manifests);
                    inventory.repositories.push(repository);
                }
                Err(e) => {
                    tracing::warn!(
                        repository = %repository,
                        error = %e,
                        "Skipping repository, manifests could not be listed"
                    );
                    inventory.skipped_repositories.push(SkippedRepository {
                        repository,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            manifests = inventory.manifests.len(),
            skipped = inventory.skipped_repositories.len(),
            "Inventory complete"
        );
        Ok(inventory)
    }
}

async fn fetch_manifests(client: &dyn RegistryClient, repository: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let page = client
            .list_manifests_page(repository, cursor.as_deref())
            .await?;
        manifests.extend(page.items);
        match page.next {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                return Err(SweepError::Registry {
                    registry: client.registry_name().to_string(),
                    message: format!(
                        "manifest listing for '{}' repeated cursor '{}'",
                        repository, next
                    ),
                });
            }
            Some(next) => cursor = Some(next),
            None => return Ok(manifests),
        }
    }

    Err(SweepError::Registry {
        registry: client.registry_name().to_string(),
        message: format!(
            "manifest listing for '{}' exceeded {} pages",
            repository, MAX_PAGES
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{days_ago, InMemoryRegistry};

    fn manifest(repo: &str, digest: &str) -> Manifest {
        Manifest::new(repo, Digest::parse(digest).unwrap(), days_ago(40), 100)
    }

    #[tokio::test]
    async fn test_snapshot_flattens_pages() {
        let registry = InMemoryRegistry::new("myacr")
            .with_page_size(1)
            .with_manifest(manifest("a", "sha256:1"))
            .with_manifest(manifest("a", "sha256:2"))
            .with_manifest(manifest("b", "sha256:3"));
        let inventory = RegistryInventory::new(Arc::new(registry), 2);

        let repos = inventory.list_repositories().await.unwrap();
        assert_eq!(repos, vec!["a".to_string(), "b".to_string()]);

        let snapshot = inventory.snapshot().await.unwrap();
        assert_eq!(snapshot.registry, "myacr.azurecr.io");
        assert_eq!(snapshot.manifests.len(), 3);
        assert_eq!(snapshot.repositories, vec!["a".to_string(), "b".to_string()]);
        assert!(snapshot.skipped_repositories.is_empty());
        assert_eq!(snapshot.stats().total_size_bytes, 300);
    }

    #[tokio::test]
    async fn test_snapshot_skips_failed_repository() {
        let registry = InMemoryRegistry::new("myacr")
            .with_manifest(manifest("a", "sha256:1"))
            .with_manifest(manifest("b", "sha256:2"))
            .failing_repository("b", "throttled");
        let inventory = RegistryInventory::new(Arc::new(registry), 4);

        let snapshot = inventory.snapshot().await.unwrap();
        assert_eq!(snapshot.manifests.len(), 1);
        assert_eq!(snapshot.repositories, vec!["a".to_string()]);
        assert_eq!(snapshot.skipped_repositories.len(), 1);
        assert_eq!(snapshot.skipped_repositories[0].repository, "b");
        assert!(snapshot.skipped_repositories[0].reason.contains("throttled"));
    }

    #[tokio::test]
    async fn test_snapshot_fails_when_repositories_unlistable() {
        let registry = InMemoryRegistry::new("myacr")
            .with_manifest(manifest("a", "sha256:1"))
            .failing_repository_listing("forbidden");
        let inventory = RegistryInventory::new(Arc::new(registry), 4);

        let err = inventory.snapshot().await.unwrap_err();
        assert!(matches!(err, SweepError::RepositoryEnumeration { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_list_manifests_single_repository() {
        let registry = InMemoryRegistry::new("myacr")
            .with_page_size(2)
            .with_manifest(manifest("a", "sha256:1"))
            .with_manifest(manifest("a", "sha256:2"))
            .with_manifest(manifest("a", "sha256:3"))
            .with_manifest(manifest("b", "sha256:4"));
        let inventory = RegistryInventory::new(Arc::new(registry), 1);

        let manifests = inventory.list_manifests("a").await.unwrap();
        assert_eq!(manifests.len(), 3);
        assert!(manifests.iter().all(|m| m.repository == "a"));
    }

    #[test]
    fn test_manifests_in_is_case_sensitive() {
        let inventory = Inventory::new(
            "myacr.azurecr.io",
            vec![manifest("api", "sha256:1"), manifest("API", "sha256:2")],
        );
        assert_eq!(inventory.manifests_in("api").count(), 1);
        assert_eq!(inventory.repositories.len(), 2);
        assert!(inventory.contains_digest(&Digest::parse("SHA256:2").unwrap()));
    }
}

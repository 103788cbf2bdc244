//! Digest resolution.
//!
//! Tags are mutable aliases, so usage is compared by digest. Tag references
//! are resolved against the inventory snapshot, scoped to the reference's
//! own repository.

use std::collections::{BTreeMap, BTreeSet};

use acr_sweep_core::{Digest, ImageReference, ImageTarget, ResolvedReference};
use serde::{Deserialize, Serialize};

use crate::inventory::Inventory;

/// Counts describing a resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub references: usize,
    pub resolved: usize,
    pub in_use_digests: usize,
    /// References to a different registry
    pub out_of_scope: usize,
    /// In-scope references matching no manifest in the snapshot
    pub unmatched: usize,
}

/// In-use digests and where they are referenced from.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    in_use: BTreeSet<Digest>,
    pub resolved: Vec<ResolvedReference>,
    pub out_of_scope: Vec<ImageReference>,
    pub unmatched: Vec<ImageReference>,
}

impl Resolution {
    /// Set of digests in use. Every member exists in the inventory.
    pub fn in_use(&self) -> &BTreeSet<Digest> {
        &self.in_use
    }

    pub fn is_in_use(&self, digest: &Digest) -> bool {
        self.in_use.contains(digest)
    }

    /// Host labels referencing `digest`, sorted and deduplicated.
    pub fn users_of(&self, digest: &Digest) -> Vec<String> {
        let mut users: Vec<String> = self
            .resolved
            .iter()
            .filter(|r| &r.digest == digest)
            .map(|r| r.location())
            .collect();
        users.sort();
        users.dedup();
        users
    }

    /// Every in-use digest mapped to its users.
    pub fn usage_map(&self) -> BTreeMap<Digest, Vec<String>> {
        self.in_use
            .iter()
            .map(|d| (d.clone(), self.users_of(d)))
            .collect()
    }

    pub fn stats(&self) -> ResolutionStats {
        ResolutionStats {
            references: self.resolved.len() + self.out_of_scope.len() + self.unmatched.len(),
            resolved: self.resolved.len(),
            in_use_digests: self.in_use.len(),
            out_of_scope: self.out_of_scope.len(),
            unmatched: self.unmatched.len(),
        }
    }
}

/// Resolves image references to the digests they currently denote.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestResolver;

impl DigestResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, references: &[ImageReference], inventory: &Inventory) -> Resolution {
        let mut resolution = Resolution::default();

        for reference in references {
            if !reference.registry.eq_ignore_ascii_case(&inventory.registry) {
                tracing::debug!(image = %reference, location = %reference.location(), "Reference outside registry");
                resolution.out_of_scope.push(reference.clone());
                continue;
            }

            let digest = match &reference.target {
                // Usage is by digest alone, so a pinned digest protects every
                // repository holding the same content.
                ImageTarget::Digest(digest) => {
                    inventory.contains_digest(digest).then(|| digest.clone())
                }
                ImageTarget::Tag(tag) => inventory
                    .manifests_in(&reference.repository)
                    .find(|m| m.has_tag(tag))
                    .map(|m| m.digest.clone()),
            };

            match digest {
                Some(digest) => {
                    tracing::debug!(image = %reference, digest = %digest.short(), "Resolved reference");
                    resolution.in_use.insert(digest.clone());
                    resolution.resolved.push(ResolvedReference {
                        digest,
                        host_id: reference.host_id.clone(),
                        slot_name: reference.slot_name.clone(),
                    });
                }
                None => {
                    tracing::debug!(image = %reference, location = %reference.location(), "Reference matches no manifest");
                    resolution.unmatched.push(reference.clone());
                }
            }
        }

        tracing::info!(
            in_use = resolution.in_use.len(),
            unmatched = resolution.unmatched.len(),
            out_of_scope = resolution.out_of_scope.len(),
            "Resolved image references"
        );
        resolution
    }
}

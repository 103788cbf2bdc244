//! Unused manifest computation.
//!
//! Age gate first, usage subtraction second, then a stable oldest-first
//! ordering so operators review the longest-unused images first and repeated
//! runs over the same snapshot produce identical output.

use std::collections::BTreeSet;

use acr_sweep_core::{Digest, Manifest, ProtectedManifest, UnusedManifest};
use chrono::{DateTime, Duration, Utc};

use crate::resolver::Resolution;

/// Outcome of the unused-set computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnusedSet {
    /// Manifests at or past the age threshold
    pub older_than_threshold: usize,
    /// Old manifests nothing references, oldest first
    pub unused: Vec<UnusedManifest>,
    /// Old manifests still referenced by a host, oldest first
    pub protected: Vec<ProtectedManifest>,
}

impl UnusedSet {
    pub fn reclaimable_bytes(&self) -> u64 {
        self.unused.iter().map(|u| u.manifest.size_bytes).sum()
    }
}

/// Applies the age threshold and subtracts in-use digests.
#[derive(Debug, Clone, Copy)]
pub struct UnusedSetComputer {
    threshold_days: u32,
}

impl UnusedSetComputer {
    pub fn new(threshold_days: u32) -> Self {
        Self { threshold_days }
    }

    /// True when `now - created_at >= threshold` (inclusive boundary).
    pub fn is_old_enough(&self, manifest: &Manifest, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(manifest.created_at) >= Duration::days(i64::from(self.threshold_days))
    }

    /// Unused manifests for a plain in-use digest set.
    pub fn compute(
        &self,
        manifests: &[Manifest],
        in_use: &BTreeSet<Digest>,
        now: DateTime<Utc>,
    ) -> Vec<UnusedManifest> {
        let mut unused: Vec<UnusedManifest> = manifests
            .iter()
            .filter(|m| self.is_old_enough(m, now))
            .filter(|m| !in_use.contains(&m.digest))
            .map(|m| UnusedManifest {
                manifest: m.clone(),
                age_days: m.age_days(now),
            })
            .collect();
        unused.sort_by(|a, b| a.manifest.sort_key().cmp(&b.manifest.sort_key()));
        unused
    }

    /// Full computation including the protected (old but in use) list.
    pub fn compute_with_usage(
        &self,
        manifests: &[Manifest],
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> UnusedSet {
        let old: Vec<&Manifest> = manifests
            .iter()
            .filter(|m| self.is_old_enough(m, now))
            .collect();

        let unused = self.compute(manifests, resolution.in_use(), now);

        let mut protected: Vec<ProtectedManifest> = old
            .iter()
            .filter(|m| resolution.is_in_use(&m.digest))
            .map(|m| {
                let age_days = m.age_days(now);
                ProtectedManifest {
                    manifest: (*m).clone(),
                    age_days,
                    days_over_threshold: age_days - i64::from(self.threshold_days),
                    used_by: resolution.users_of(&m.digest),
                }
            })
            .collect();
        protected.sort_by(|a, b| a.manifest.sort_key().cmp(&b.manifest.sort_key()));

        tracing::info!(
            older_than_threshold = old.len(),
            unused = unused.len(),
            protected = protected.len(),
            threshold_days = self.threshold_days,
            "Computed unused manifests"
        );

        UnusedSet {
            older_than_threshold: old.len(),
            unused,
            protected,
        }
    }
}

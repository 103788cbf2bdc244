//! Registry manifests and the records derived from them.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// One immutable image version stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Repository path (e.g., "team/api")
    pub repository: String,
    /// Content digest, unique within the repository
    pub digest: Digest,
    /// Tags currently pointing at this manifest (may be empty)
    pub tags: BTreeSet<String>,
    /// When the registry created the manifest
    pub created_at: DateTime<Utc>,
    /// Image size in bytes
    pub size_bytes: u64,
}

impl Manifest {
    pub fn new(
        repository: impl Into<String>,
        digest: Digest,
        created_at: DateTime<Utc>,
        size_bytes: u64,
    ) -> Self {
        Self {
            repository: repository.into(),
            digest,
            tags: BTreeSet::new(),
            created_at,
            size_bytes,
        }
    }

    /// Builder-style tag attachment.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whole days elapsed since creation. Negative for clock-skewed future timestamps.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_days()
    }

    /// Ordering key: oldest first, then `(repository, digest)`.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str, &str) {
        (self.created_at, self.repository.as_str(), self.digest.as_str())
    }

    /// `repository@digest` form accepted by registry delete calls.
    pub fn image_ref(&self) -> String {
        format!("{}@{}", self.repository, self.digest)
    }

    /// Comma-joined tag list, `<untagged>` when there are none.
    pub fn tags_display(&self) -> String {
        if self.tags.is_empty() {
            "<untagged>".to_string()
        } else {
            self.tags.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    }
}

/// A manifest old enough to delete that nothing references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusedManifest {
    #[serde(flatten)]
    pub manifest: Manifest,
    pub age_days: i64,
}

/// A manifest past the age threshold that is still deployed somewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedManifest {
    #[serde(flatten)]
    pub manifest: Manifest,
    pub age_days: i64,
    pub days_over_threshold: i64,
    /// Host labels (`app` or `app/slot`) referencing the digest
    pub used_by: Vec<String>,
}

/// Result of one deletion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub repository: String,
    pub digest: Digest,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl DeletionOutcome {
    pub fn success(manifest: &Manifest, attempted_at: DateTime<Utc>) -> Self {
        Self {
            repository: manifest.repository.clone(),
            digest: manifest.digest.clone(),
            succeeded: true,
            error: None,
            attempted_at,
        }
    }

    pub fn failure(manifest: &Manifest, error: impl Into<String>, attempted_at: DateTime<Utc>) -> Self {
        Self {
            repository: manifest.repository.clone(),
            digest: manifest.digest.clone(),
            succeeded: false,
            error: Some(error.into()),
            attempted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(days_ago: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() - Duration::days(days_ago)
    }

    #[test]
    fn test_age_days() {
        let now = at(0);
        let m = Manifest::new("a", Digest::parse("sha256:1").unwrap(), at(45), 10);
        assert_eq!(m.age_days(now), 45);
    }

    #[test]
    fn test_age_days_future_is_negative() {
        let now = at(0);
        let m = Manifest::new("a", Digest::parse("sha256:1").unwrap(), now + Duration::days(2), 10);
        assert_eq!(m.age_days(now), -2);
    }

    #[test]
    fn test_tags_display() {
        let untagged = Manifest::new("a", Digest::parse("sha256:1").unwrap(), at(1), 0);
        assert_eq!(untagged.tags_display(), "<untagged>");

        let tagged = untagged.clone().with_tags(["v2", "latest"]);
        assert_eq!(tagged.tags_display(), "latest, v2");
        assert!(tagged.has_tag("v2"));
        assert!(!tagged.has_tag("v3"));
    }

    #[test]
    fn test_image_ref() {
        let m = Manifest::new("team/api", Digest::parse("sha256:ab").unwrap(), at(1), 0);
        assert_eq!(m.image_ref(), "team/api@sha256:ab");
    }

    #[test]
    fn test_sort_key_orders_oldest_first() {
        let old = Manifest::new("b", Digest::parse("sha256:2").unwrap(), at(10), 0);
        let new = Manifest::new("a", Digest::parse("sha256:1").unwrap(), at(5), 0);
        assert!(old.sort_key() < new.sort_key());
    }

    #[test]
    fn test_outcome_constructors() {
        let m = Manifest::new("a", Digest::parse("sha256:1").unwrap(), at(40), 0);
        let ok = DeletionOutcome::success(&m, at(0));
        assert!(ok.succeeded);
        assert!(ok.error.is_none());

        let failed = DeletionOutcome::failure(&m, "locked", at(0));
        assert!(!failed.succeeded);
        assert_eq!(failed.error.as_deref(), Some("locked"));
    }

    #[test]
    fn test_unused_manifest_serializes_flat() {
        let m = Manifest::new("a", Digest::parse("sha256:1").unwrap(), at(40), 7);
        let unused = UnusedManifest { manifest: m, age_days: 40 };
        let json = serde_json::to_value(&unused).unwrap();
        assert_eq!(json["repository"], "a");
        assert_eq!(json["digest"], "sha256:1");
        assert_eq!(json["age_days"], 40);
    }
}

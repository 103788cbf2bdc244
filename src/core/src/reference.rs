//! Image reference parsing.
//!
//! Parses references like `myacr.azurecr.io/team/api:v1.2` as found in host
//! container settings into structured components.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{Result, SweepError};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// What a reference points at inside its repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageTarget {
    Tag(String),
    Digest(Digest),
}

impl fmt::Display for ImageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageTarget::Tag(tag) => write!(f, ":{}", tag),
            ImageTarget::Digest(digest) => write!(f, "@{}", digest),
        }
    }
}

/// Parsed `registry/repository[:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageName {
    /// Registry hostname (e.g., "myacr.azurecr.io")
    pub registry: String,
    /// Repository path (e.g., "team/api")
    pub repository: String,
    pub target: ImageTarget,
}

impl ImageName {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `myacr.azurecr.io/team/api` → myacr.azurecr.io/team/api:latest
    /// - `myacr.azurecr.io/team/api:v1` → tag `v1`
    /// - `myacr.azurecr.io/team/api@sha256:abc...` → digest
    /// - `myacr.azurecr.io/team/api:v1@sha256:abc...` → digest (the tag is informational)
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SweepError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest = Digest::parse(&reference[at_pos + 1..]).map_err(|_| {
                    SweepError::InvalidReference(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    ))
                })?;
                (&reference[..at_pos], Some(digest))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if name.is_empty() {
            return Err(SweepError::InvalidReference(format!(
                "Empty repository in reference '{}'",
                reference
            )));
        }
        let (registry, repository) = split_registry_repository(name)?;

        let target = match (digest, tag) {
            (Some(digest), _) => ImageTarget::Digest(digest),
            (None, Some(tag)) if !tag.is_empty() => ImageTarget::Tag(tag.to_string()),
            (None, Some(_)) => {
                return Err(SweepError::InvalidReference(format!(
                    "Empty tag in reference '{}'",
                    reference
                )))
            }
            (None, None) => ImageTarget::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            target,
        })
    }

    /// Registry hostnames are DNS names and compare case-insensitively.
    pub fn is_from_registry(&self, login_server: &str) -> bool {
        self.registry.eq_ignore_ascii_case(login_server)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.registry, self.repository, self.target)
    }
}

/// Split a trailing `:tag` off a name, leaving `registry:port` intact.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    if let Some(slash_pos) = name_tag.rfind('/') {
        let after_slash = &name_tag[slash_pos + 1..];
        match after_slash.rfind(':') {
            Some(colon_pos) => (
                &name_tag[..slash_pos + 1 + colon_pos],
                Some(&after_slash[colon_pos + 1..]),
            ),
            None => (name_tag, None),
        }
    } else if let Some(colon_pos) = name_tag.rfind(':') {
        let after_colon = &name_tag[colon_pos + 1..];
        if !after_colon.is_empty() && after_colon.chars().all(|c| c.is_ascii_digit()) {
            // Looks like a port, treat whole thing as name
            (name_tag, None)
        } else {
            (&name_tag[..colon_pos], Some(after_colon))
        }
    } else {
        (name_tag, None)
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    // First component is a registry if it looks like a hostname
    if let Some(slash_pos) = name.find('/') {
        let first = &name[..slash_pos];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let repo = &name[slash_pos + 1..];
            if repo.is_empty() {
                return Err(SweepError::InvalidReference(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), repo.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

/// A host's configured image, together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub target: ImageTarget,
    pub host_id: String,
    /// Empty for the primary (production) slot
    pub slot_name: String,
}

impl ImageReference {
    pub fn new(image: ImageName, host_id: impl Into<String>, slot_name: impl Into<String>) -> Self {
        Self {
            registry: image.registry,
            repository: image.repository,
            target: image.target,
            host_id: host_id.into(),
            slot_name: slot_name.into(),
        }
    }

    /// Parse a raw reference string found on `host_id`/`slot_name`.
    pub fn parse(raw: &str, host_id: impl Into<String>, slot_name: impl Into<String>) -> Result<Self> {
        Ok(Self::new(ImageName::parse(raw)?, host_id, slot_name))
    }

    pub fn is_primary_slot(&self) -> bool {
        self.slot_name.is_empty()
    }

    /// `app` for the primary slot, `app/slot` otherwise.
    pub fn location(&self) -> String {
        host_label(&self.host_id, &self.slot_name)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.registry, self.repository, self.target)
    }
}

/// A reference after digest resolution. Provenance only; usage compares digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub digest: Digest,
    pub host_id: String,
    pub slot_name: String,
}

impl ResolvedReference {
    pub fn location(&self) -> String {
        host_label(&self.host_id, &self.slot_name)
    }
}

/// Display label for a host and slot pair.
pub fn host_label(host_id: &str, slot_name: &str) -> String {
    if slot_name.is_empty() {
        host_id.to_string()
    } else {
        format!("{}/{}", host_id, slot_name)
    }
}

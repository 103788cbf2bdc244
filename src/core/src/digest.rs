//! Content digests.
//!
//! Registries report digests in lower case, but references typed into host
//! configuration are not always normalized. A `Digest` is lower-cased at
//! construction so every comparison downstream is case-insensitive.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SweepError};

/// Normalized content digest (e.g., "sha256:abc123...").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Parse a digest of the form `algorithm:hex`.
    ///
    /// The algorithm is ASCII alphanumeric, optionally joined by `+ . _ -`,
    /// and the encoded part is ASCII hex. The stored form is all ASCII.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match raw.split_once(':') {
            Some((algorithm, hex)) if valid_algorithm(algorithm) && valid_hex(hex) => {
                Ok(Self(raw.to_ascii_lowercase()))
            }
            _ => Err(SweepError::InvalidReference(format!(
                "Invalid digest '{}': expected algorithm:hex",
                raw
            ))),
        }
    }

    /// Full digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines (algorithm plus 12 hex characters).
    pub fn short(&self) -> &str {
        let end = self
            .0
            .find(':')
            .map(|pos| (pos + 1 + 12).min(self.0.len()))
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

fn valid_algorithm(algorithm: &str) -> bool {
    let is_separator = |c: char| matches!(c, '+' | '.' | '_' | '-');
    !algorithm.is_empty()
        && algorithm
            .split(is_separator)
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn valid_hex(hex: &str) -> bool {
    !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Digest {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Digest::parse(&raw).map_err(serde::de::Error::custom)
    }
}

//! ACR Sweep Core - Foundational Types
//!
//! This crate provides the data model, configuration and error types shared
//! by the reconciliation engine and the command line.

pub mod config;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod reference;

// Re-export commonly used types
pub use config::{ConcurrencyConfig, ConfigLayer, SweepConfig};
pub use digest::Digest;
pub use error::{Result, SweepError};
pub use manifest::{DeletionOutcome, Manifest, ProtectedManifest, UnusedManifest};
pub use reference::{ImageName, ImageReference, ImageTarget, ResolvedReference};

/// ACR Sweep version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! ACR Sweep Runtime - reconciliation and safe-deletion engine.
//!
//! This crate inventories a registry, collects the images deployed hosts run,
//! resolves them to digests, computes the unused set and drives deletion
//! through a confirmed, audited state machine. Remote systems are reached
//! through the collaborator traits in [`client`]; [`azure`] implements them
//! on top of the Azure CLI.

#![allow(clippy::result_large_err)]

pub mod audit;
pub mod azure;
pub mod client;
pub mod collector;
pub mod executor;
pub mod extract;
pub mod inventory;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod resolver;
pub mod sweep;
pub mod unused;

// Re-export common types
pub use audit::{AuditDraft, AuditRecord, AuditRecorder, RunInfo, RunStatus, SystemInfo};
pub use client::{Clock, ContainerConfig, Host, HostClient, Operator, Page, RegistryClient, SystemClock};
pub use collector::{HostScan, ReferenceCollector, SkippedTarget};
pub use executor::{DeletionExecutor, DeletionMode, ExecutionReport, ExecutorState, CONFIRMATION_TOKEN};
pub use extract::{default_strategies, ExtractionStrategy};
pub use inventory::{Inventory, RegistryInventory, SkippedRepository};
pub use resolver::{DigestResolver, Resolution};
pub use sweep::{Analysis, RunReport, Sweep};
pub use unused::{UnusedSet, UnusedSetComputer};

/// ACR Sweep Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

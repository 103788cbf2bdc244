//! Azure CLI transport.
//!
//! Implements the registry and host collaborators by shelling out to `az`.
//! The CLI must already be signed in; [`AzCli::verify_login`] checks this
//! before a run.

pub mod cli;
pub mod registry;
pub mod webapp;

pub use cli::{Account, AzCli, DEFAULT_PROGRAM};
pub use registry::AzureRegistry;
pub use webapp::AzureWebApps;

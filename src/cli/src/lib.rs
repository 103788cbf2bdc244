//! ACR Sweep CLI - find and remove container images no host still runs.

pub mod commands;
pub mod output;
pub mod prompt;

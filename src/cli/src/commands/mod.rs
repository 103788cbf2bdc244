//! CLI command definitions and dispatch.

mod clean;
mod scan;
mod version;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acr_sweep_core::{ConfigLayer, SweepConfig};
use acr_sweep_runtime::azure::{AzCli, AzureRegistry, AzureWebApps, DEFAULT_PROGRAM};
use acr_sweep_runtime::{RunReport, RunStatus, Sweep, SystemInfo};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;

/// ACR Sweep - find and remove registry images no App Service still runs.
#[derive(Parser)]
#[command(name = "acr-sweep", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Subscription holding the registry and the App Services
    #[arg(long, global = true, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription: Option<String>,

    /// Registry name, without `.azurecr.io`
    #[arg(long, global = true, env = "AZURE_ACR_NAME")]
    pub registry: Option<String>,

    /// Resource group containing the registry
    #[arg(long, global = true, env = "AZURE_ACR_RESOURCE_GROUP")]
    pub resource_group: Option<String>,

    /// Minimum manifest age in days [default: 30]
    #[arg(long, global = true)]
    pub threshold_days: Option<u32>,

    /// Directory receiving audit records [default: audits]
    #[arg(long, global = true)]
    pub audit_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Azure CLI executable
    #[arg(long, global = true, default_value = DEFAULT_PROGRAM)]
    pub az: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl GlobalArgs {
    /// Values given on the command line or through the environment.
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            subscription_id: self.subscription.clone(),
            registry_name: self.registry.clone(),
            resource_group: self.resource_group.clone(),
            threshold_days: self.threshold_days,
            audit_dir: self.audit_dir.clone(),
            ..Default::default()
        }
    }

    /// Resolve the run configuration: flags, then environment, then the
    /// YAML file, then defaults.
    pub fn resolve_config(&self) -> Result<SweepConfig, Box<dyn std::error::Error>> {
        let file = match self.config {
            Some(ref path) => ConfigLayer::from_yaml_file(path)?,
            None => ConfigLayer::default(),
        };
        let config = SweepConfig::resolve(self.layer().or(file))?;
        tracing::debug!(?config, "Resolved configuration");
        Ok(config)
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Report unused manifests without deleting anything
    Scan(scan::ScanArgs),
    /// Interactively delete unused manifests
    Clean(clean::CleanArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Scan(args) => scan::execute(&cli.global, args).await,
        Command::Clean(args) => clean::execute(&cli.global, args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

/// Check the Azure CLI login and wire a sweep over the Azure transport.
pub(crate) async fn connect(
    global: &GlobalArgs,
    config: SweepConfig,
) -> Result<Sweep, Box<dyn std::error::Error>> {
    let cli = AzCli::new(
        global.az.clone(),
        Duration::from_secs(config.command_timeout_secs),
    )
    .with_subscription(config.subscription_id.clone());
    cli.verify_login().await?;

    let registry = AzureRegistry::new(cli.clone(), config.registry_name.clone());
    let hosts = AzureWebApps::new(cli, config.subscription_id.clone());
    Ok(Sweep::new(config, Arc::new(registry), Arc::new(hosts))
        .with_executed_by(current_user())
        .with_system_info(system_info()))
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Host facts recorded in the audit record.
pub(crate) fn system_info() -> SystemInfo {
    use sysinfo::System;

    let unknown = || "unknown".to_string();
    SystemInfo {
        hostname: System::host_name().unwrap_or_else(unknown),
        platform: System::long_os_version().unwrap_or_else(unknown),
        os_type: System::name().unwrap_or_else(unknown),
        os_version: System::os_version().unwrap_or_else(unknown),
        user: current_user(),
    }
}

/// Cancellation flag set by the first Ctrl-C. A second Ctrl-C exits at once.
pub(crate) fn cancel_on_interrupt() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!(
            "\nInterrupted. Stopping after in-flight deletions and writing the audit record; \
             press Ctrl-C again to exit without it."
        );
        let _ = tx.send(true);
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
    rx
}

/// Exit with the conventional SIGINT status once an interrupted run has been
/// reported. An abandoned prompt may still be blocked on stdin, so the
/// process must not wait for the runtime to drain.
pub(crate) fn exit_if_interrupted(report: &RunReport) {
    if report.status == RunStatus::Cancelled {
        std::process::exit(130);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_flags_resolve_config() {
        let cli = parse(&[
            "acr-sweep",
            "scan",
            "--subscription",
            "sub-1",
            "--registry",
            "myacr",
            "--resource-group",
            "rg",
            "--threshold-days",
            "45",
        ]);
        let config = cli.global.resolve_config().unwrap();
        assert_eq!(config.registry_name, "myacr");
        assert_eq!(config.threshold_days, 45);
        assert_eq!(config.audit_dir, PathBuf::from("audits"));
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "subscription_id: sub-file\nregistry_name: fileacr\nresource_group: rg-file\nthreshold_days: 60"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = parse(&["acr-sweep", "--config", &path, "--registry", "flagacr", "scan"]);
        let config = cli.global.resolve_config().unwrap();
        assert_eq!(config.registry_name, "flagacr");
        assert_eq!(config.resource_group, "rg-file");
        assert_eq!(config.threshold_days, 60);
    }

    #[test]
    fn test_clean_mode_flag() {
        let cli = parse(&["acr-sweep", "clean", "--mode", "commit"]);
        assert!(matches!(cli.command, Command::Clean(_)));
        assert!(Cli::try_parse_from(["acr-sweep", "clean", "--mode", "purge"]).is_err());
    }

    #[test]
    fn test_default_program() {
        let cli = parse(&["acr-sweep", "version"]);
        assert_eq!(cli.global.az, "az");
        assert!(!cli.global.log_json);
    }
}

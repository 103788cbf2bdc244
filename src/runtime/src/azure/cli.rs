//! Azure CLI invocation.

use std::process::Stdio;
use std::time::Duration;

use acr_sweep_core::error::{Result, SweepError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;

/// Default Azure CLI executable.
pub const DEFAULT_PROGRAM: &str = "az";

/// Signed-in account reported by `az account show`.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user: Option<AccountUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountUser {
    pub name: String,
}

/// Runs `az` commands with JSON output and a per-call timeout.
#[derive(Debug, Clone)]
pub struct AzCli {
    program: String,
    timeout: Duration,
    subscription: Option<String>,
}

impl AzCli {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            subscription: None,
        }
    }

    /// Pin every command to one subscription.
    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full: Vec<String> = args.to_vec();
        if let Some(ref subscription) = self.subscription {
            full.push("--subscription".to_string());
            full.push(subscription.clone());
        }
        full.push("--output".to_string());
        full.push("json".to_string());
        full
    }

    /// Command line `run` would execute, for display.
    pub fn render(&self, args: &[String]) -> String {
        let mut line = self.program.clone();
        for arg in self.full_args(args) {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push_str(&format!("\"{}\"", arg));
            } else {
                line.push_str(&arg);
            }
        }
        line
    }

    /// Run a command and return its standard output.
    pub async fn run(&self, args: &[String]) -> Result<String> {
        let full = self.full_args(args);
        tracing::debug!(program = %self.program, args = ?full, "Running command");

        let child = Command::new(&self.program)
            .args(&full)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.error(format!("failed to start: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| self.error(format!("failed to wait: {}", e)))?,
            Err(_) => {
                return Err(self.error(format!(
                    "'{}' timed out after {}s",
                    args.join(" "),
                    self.timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            return Err(self.error(format!(
                "'{}' exited with {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                if message.is_empty() { "no error output" } else { message }
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command and decode its JSON output.
    pub async fn run_json<T: DeserializeOwned>(&self, args: &[String]) -> Result<T> {
        let stdout = self.run(args).await?;
        serde_json::from_str(&stdout).map_err(|e| {
            self.error(format!("unexpected output of '{}': {}", args.join(" "), e))
        })
    }

    /// Check that the CLI has a signed-in account.
    pub async fn verify_login(&self) -> Result<Account> {
        let account: Account = self
            .run_json(&args(&["account", "show"]))
            .await
            .map_err(|e| SweepError::Authentication(format!("run 'az login' first ({})", e)))?;
        tracing::info!(
            subscription = %account.id,
            user = account.user.as_ref().map(|u| u.name.as_str()).unwrap_or("unknown"),
            "Azure CLI authenticated"
        );
        Ok(account)
    }

    fn error(&self, message: String) -> SweepError {
        SweepError::Command {
            program: self.program.clone(),
            message,
        }
    }
}

/// Owned argument list from string slices.
pub(crate) fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

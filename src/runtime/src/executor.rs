//! Deletion executor.
//!
//! An explicit state machine gating every remote deletion:
//!
//! ```text
//! Idle -> ModeSelected(Simulate) ------------> Executing -> Completed
//! Idle -> ModeSelected(Commit) -> Confirmed -> Executing -> Completed
//! ```
//!
//! Commit cannot reach `Executing` without passing both confirmations.
//! Each deletion attempt produces its own outcome; a failure never stops the
//! remaining attempts.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use acr_sweep_core::error::{Result, SweepError};
use acr_sweep_core::{DeletionOutcome, Digest, Manifest, UnusedManifest};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};

use crate::client::{Clock, Operator, RegistryClient};

/// Exact token the operator must type before a commit run.
pub const CONFIRMATION_TOKEN: &str = "DELETE";

/// How deletions are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionMode {
    /// Report what would be deleted, touch nothing
    Simulate,
    /// Delete for real
    Commit,
}

impl DeletionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionMode::Simulate => "simulate",
            DeletionMode::Commit => "commit",
        }
    }
}

impl fmt::Display for DeletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeletionMode {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "simulate" | "mock" => Ok(DeletionMode::Simulate),
            "2" | "commit" | "hard" => Ok(DeletionMode::Commit),
            other => Err(SweepError::InvalidMode(other.to_string())),
        }
    }
}

/// Executor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    Idle,
    ModeSelected(DeletionMode),
    /// Commit mode, both confirmations passed
    Confirmed,
    Executing(DeletionMode),
    Completed,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorState::Idle => write!(f, "idle"),
            ExecutorState::ModeSelected(mode) => write!(f, "mode_selected({})", mode),
            ExecutorState::Confirmed => write!(f, "confirmed"),
            ExecutorState::Executing(mode) => write!(f, "executing({})", mode),
            ExecutorState::Completed => write!(f, "completed"),
        }
    }
}

/// True for a loose affirmative answer (`y` / `yes`, any case).
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// A deletion that a simulate run would have made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDeletion {
    pub repository: String,
    pub digest: Digest,
    pub command: String,
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub mode: DeletionMode,
    /// Simulate only
    pub simulated: Vec<SimulatedDeletion>,
    /// Commit only, ordered oldest manifest first
    pub outcomes: Vec<DeletionOutcome>,
    pub cancelled: bool,
    /// Manifests never attempted because of cancellation
    pub not_attempted: usize,
}

impl ExecutionReport {
    /// A report with nothing simulated or attempted.
    pub fn empty(mode: DeletionMode) -> Self {
        Self {
            mode,
            simulated: Vec::new(),
            outcomes: Vec::new(),
            cancelled: false,
            not_attempted: 0,
        }
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeletionOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded)
    }

    /// Percentage of attempts that succeeded, rounded to 2 decimals. 100 when
    /// nothing was attempted, since nothing failed.
    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 100.0;
        }
        let rate = self.succeeded() as f64 / self.attempted() as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

/// Drives the deletion state machine against a [`RegistryClient`].
pub struct DeletionExecutor {
    client: Arc<dyn RegistryClient>,
    clock: Arc<dyn Clock>,
    concurrency: usize,
    state: ExecutorState,
}

impl DeletionExecutor {
    pub fn new(client: Arc<dyn RegistryClient>, clock: Arc<dyn Clock>, concurrency: usize) -> Self {
        Self {
            client,
            clock,
            concurrency: concurrency.max(1),
            state: ExecutorState::Idle,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Select the deletion mode from raw operator input.
    ///
    /// Anything but the two accepted modes is rejected and the executor stays
    /// `Idle`.
    pub fn select_mode(&mut self, choice: &str) -> Result<DeletionMode> {
        if self.state != ExecutorState::Idle {
            return Err(self.invalid("mode_selected"));
        }
        let mode = match choice.parse::<DeletionMode>() {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!(choice = %choice.trim(), "Invalid deletion mode");
                return Err(e);
            }
        };
        tracing::info!(mode = %mode, "Deletion mode selected");
        self.state = ExecutorState::ModeSelected(mode);
        Ok(mode)
    }

    /// Run both commit confirmations.
    ///
    /// The operator must first answer yes, then type [`CONFIRMATION_TOKEN`]
    /// exactly. Any other answer returns the executor to `Idle`.
    pub fn confirm(&mut self, operator: &dyn Operator, pending: usize) -> Result<()> {
        if self.state != ExecutorState::ModeSelected(DeletionMode::Commit) {
            return Err(self.invalid("confirmed"));
        }

        let question = format!(
            "Permanently delete {} manifest(s) from {}?",
            pending,
            self.client.login_server()
        );
        if !operator.confirm(&question)? {
            return Err(self.reject("deletion not confirmed"));
        }

        let prompt = format!("Type {} to proceed", CONFIRMATION_TOKEN);
        let token = operator.read_token(&prompt)?;
        if token.trim() != CONFIRMATION_TOKEN {
            return Err(self.reject("confirmation token mismatch"));
        }

        tracing::info!(pending, "Deletion confirmed");
        self.state = ExecutorState::Confirmed;
        Ok(())
    }

    /// Execute the selected mode over `manifests`.
    ///
    /// `cancel` is checked before each new attempt. Deletions already in
    /// flight are allowed to finish.
    pub async fn execute(
        &mut self,
        manifests: &[UnusedManifest],
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionReport> {
        let mode = match self.state {
            ExecutorState::ModeSelected(DeletionMode::Simulate) => DeletionMode::Simulate,
            ExecutorState::Confirmed => DeletionMode::Commit,
            _ => return Err(self.invalid("executing")),
        };
        self.state = ExecutorState::Executing(mode);
        tracing::info!(mode = %mode, manifests = manifests.len(), "Executing deletion plan");

        let report = match mode {
            DeletionMode::Simulate => self.simulate(manifests, &cancel),
            DeletionMode::Commit => self.commit(manifests, &cancel).await,
        };

        self.state = ExecutorState::Completed;
        if report.cancelled {
            tracing::warn!(not_attempted = report.not_attempted, "Execution cancelled");
        }
        Ok(report)
    }

    /// Abandon the run from any state.
    pub fn cancel(&mut self) {
        tracing::info!(from = %self.state, "Executor cancelled");
        self.state = ExecutorState::Completed;
    }

    fn simulate(&self, manifests: &[UnusedManifest], cancel: &watch::Receiver<bool>) -> ExecutionReport {
        let mut report = ExecutionReport::empty(DeletionMode::Simulate);
        for (index, unused) in manifests.iter().enumerate() {
            if *cancel.borrow() {
                report.cancelled = true;
                report.not_attempted = manifests.len() - index;
                break;
            }
            let manifest = &unused.manifest;
            let command = self
                .client
                .describe_delete(&manifest.repository, &manifest.digest);
            tracing::debug!(command = %command, "Simulated deletion");
            report.simulated.push(SimulatedDeletion {
                repository: manifest.repository.clone(),
                digest: manifest.digest.clone(),
                command,
            });
        }
        report
    }

    async fn commit(&self, manifests: &[UnusedManifest], cancel: &watch::Receiver<bool>) -> ExecutionReport {
        let mut report = ExecutionReport::empty(DeletionMode::Commit);
        let total = manifests.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);

        for (index, unused) in manifests.iter().enumerate() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    report.not_attempted = total - index;
                    break;
                }
            };
            if *cancel.borrow() {
                report.cancelled = true;
                report.not_attempted = total - index;
                break;
            }

            let client = Arc::clone(&self.client);
            let clock = Arc::clone(&self.clock);
            let manifest = unused.manifest.clone();
            tracing::info!(
                image = %manifest.image_ref(),
                progress = %format!("{}/{}", index + 1, total),
                "Deleting manifest"
            );
            let task_manifest = manifest.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                delete_one(client.as_ref(), clock.as_ref(), &task_manifest).await
            });
            handles.push((manifest, handle));
        }

        let mut attempts: Vec<(Manifest, DeletionOutcome)> = Vec::with_capacity(handles.len());
        for (manifest, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => DeletionOutcome::failure(
                    &manifest,
                    format!("deletion task failed: {}", e),
                    self.clock.now(),
                ),
            };
            attempts.push((manifest, outcome));
        }
        attempts.sort_by(|(a, _), (b, _)| a.sort_key().cmp(&b.sort_key()));
        report.outcomes = attempts.into_iter().map(|(_, outcome)| outcome).collect();

        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            not_attempted = report.not_attempted,
            "Deletion finished"
        );
        report
    }

    fn invalid(&self, to: &str) -> SweepError {
        SweepError::InvalidTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    fn reject(&mut self, reason: &str) -> SweepError {
        tracing::warn!(reason, "Deletion rejected by operator");
        self.state = ExecutorState::Idle;
        SweepError::ConfirmationRejected(reason.to_string())
    }
}

async fn delete_one(client: &dyn RegistryClient, clock: &dyn Clock, manifest: &Manifest) -> DeletionOutcome {
    let attempted_at = clock.now();
    match client
        .delete_manifest(&manifest.repository, &manifest.digest)
        .await
    {
        Ok(()) => {
            tracing::info!(image = %manifest.image_ref(), "Deleted manifest");
            DeletionOutcome::success(manifest, attempted_at)
        }
        Err(e) => {
            tracing::warn!(image = %manifest.image_ref(), error = %e, "Failed to delete manifest");
            DeletionOutcome::failure(manifest, e.to_string(), attempted_at)
        }
    }
}

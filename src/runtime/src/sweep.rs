//! Sweep orchestration.
//!
//! Wires the engine components into one run: inventory and host scan in
//! parallel, then resolution, the unused-set computation, mode selection,
//! confirmation, execution and a single audit write.

use std::path::PathBuf;
use std::sync::Arc;

use acr_sweep_core::error::{Result, SweepError};
use acr_sweep_core::SweepConfig;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::audit::{AuditDraft, AuditRecorder, RunInfo, RunStatus, SystemInfo};
use crate::client::{Clock, HostClient, Operator, RegistryClient, SystemClock};
use crate::collector::{HostScan, ReferenceCollector};
use crate::executor::{DeletionExecutor, DeletionMode, ExecutionReport};
use crate::inventory::{Inventory, RegistryInventory};
use crate::resolver::{DigestResolver, Resolution};
use crate::unused::{UnusedSet, UnusedSetComputer};

/// Everything learned before any deletion decision.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub inventory: Inventory,
    pub scan: HostScan,
    pub resolution: Resolution,
    pub unused: UnusedSet,
    pub analyzed_at: DateTime<Utc>,
}

impl Analysis {
    /// Analysis of a run stopped before anything was learned.
    pub fn empty(registry: impl Into<String>, scope: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            inventory: Inventory::new(registry, Vec::new()),
            scan: HostScan {
                scope: scope.into(),
                ..Default::default()
            },
            resolution: Resolution::default(),
            unused: UnusedSet::default(),
            analyzed_at: at,
        }
    }

    /// True when part of the registry or the host fleet could not be read.
    pub fn is_degraded(&self) -> bool {
        !self.inventory.skipped_repositories.is_empty() || !self.scan.skipped.is_empty()
    }
}

/// Outcome of [`Sweep::run`].
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub analysis: Analysis,
    pub mode: Option<DeletionMode>,
    pub execution: Option<ExecutionReport>,
    /// Why the run stopped short, for rejected and cancelled runs
    pub reason: Option<String>,
    pub audit_path: Option<PathBuf>,
    /// Set when the audit record could not be written
    pub audit_error: Option<String>,
}

/// One reconciliation run over a registry and a host fleet.
pub struct Sweep {
    config: SweepConfig,
    registry: Arc<dyn RegistryClient>,
    hosts: Arc<dyn HostClient>,
    clock: Arc<dyn Clock>,
    executed_by: String,
    system_info: SystemInfo,
}

impl Sweep {
    pub fn new(
        config: SweepConfig,
        registry: Arc<dyn RegistryClient>,
        hosts: Arc<dyn HostClient>,
    ) -> Self {
        Self {
            config,
            registry,
            hosts,
            clock: Arc::new(SystemClock),
            executed_by: String::from("unknown"),
            system_info: SystemInfo::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Identity recorded as `executed_by` in the audit record.
    pub fn with_executed_by(mut self, user: impl Into<String>) -> Self {
        self.executed_by = user.into();
        self
    }

    pub fn with_system_info(mut self, info: SystemInfo) -> Self {
        self.system_info = info;
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Build the inventory and scan hosts concurrently, then compute the
    /// unused set. No remote state is changed.
    pub async fn analyze(&self) -> Result<Analysis> {
        let inventory = RegistryInventory::new(
            Arc::clone(&self.registry),
            self.config.concurrency.repositories,
        );
        let collector = ReferenceCollector::new(Arc::clone(&self.hosts), self.config.concurrency.hosts);

        let (inventory, scan) = tokio::join!(
            inventory.snapshot(),
            collector.list_host_image_references()
        );
        let inventory = inventory?;
        let scan = scan?;

        let resolution = DigestResolver::new().resolve(&scan.references, &inventory);
        let analyzed_at = self.clock.now();
        let unused = UnusedSetComputer::new(self.config.threshold_days).compute_with_usage(
            &inventory.manifests,
            &resolution,
            analyzed_at,
        );

        if !inventory.skipped_repositories.is_empty() {
            tracing::warn!(
                count = inventory.skipped_repositories.len(),
                "Some repositories were skipped, their manifests are not considered"
            );
        }
        if !scan.skipped.is_empty() {
            tracing::warn!(
                hosts = scan.skipped_hosts(),
                targets = scan.skipped.len(),
                "Some hosts could not be read, images they run may be reported as unused"
            );
        }

        Ok(Analysis {
            inventory,
            scan,
            resolution,
            unused,
            analyzed_at,
        })
    }

    /// Drive a full run and write its audit record.
    ///
    /// `mode` skips the operator's mode prompt when set. Fatal analysis
    /// errors are returned after an `aborted` record has been written.
    /// Operator rejections end the run with status `rejected`.
    ///
    /// Setting `cancel` ends the run at once from any stage: analysis and
    /// pending prompts are abandoned, in-flight deletions finish, and a
    /// `cancelled` record is written.
    pub async fn run(
        &self,
        operator: Arc<dyn Operator>,
        mode: Option<DeletionMode>,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let recorder = AuditRecorder::new(self.config.audit_dir.clone());
        let mut draft = recorder.begin(RunInfo {
            config: self.config.clone(),
            started_at: self.clock.now(),
            executed_by: self.executed_by.clone(),
            system_info: self.system_info.clone(),
        });
        tracing::info!(
            run_id = %draft.run_id(),
            registry = %self.config.registry_name,
            threshold_days = self.config.threshold_days,
            "Starting sweep"
        );

        let analyzed = {
            let mut interrupt = cancel.clone();
            tokio::select! {
                biased;
                _ = interrupted(&mut interrupt) => None,
                analysis = self.analyze() => Some(analysis),
            }
        };
        let analysis = match analyzed {
            Some(Ok(analysis)) => analysis,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Sweep aborted");
                draft.mark_aborted(e.to_string());
                if let Err(audit) = recorder.flush(draft, self.clock.now()) {
                    tracing::warn!(error = %audit, "Failed to write aborted audit record");
                }
                return Err(e);
            }
            None => {
                tracing::warn!("Sweep interrupted during analysis");
                let analysis = Analysis::empty(
                    self.registry.login_server(),
                    self.hosts.scope(),
                    self.clock.now(),
                );
                let mut report = RunReport::new(analysis);
                cancelled(&mut draft, &mut report);
                return Ok(self.finish(&recorder, draft, report));
            }
        };
        draft.record_inventory(&analysis.inventory);
        draft.record_hosts(&analysis.scan);
        draft.record_resolution(&analysis.resolution);
        draft.record_unused(&analysis.unused);
        operator.review(&analysis);

        let mut report = RunReport::new(analysis);
        match self
            .decide_and_execute(&operator, mode, cancel, &mut draft, &mut report)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_user_reject() => {
                draft.mark_rejected(e.to_string());
                report.reason = Some(e.to_string());
            }
            Err(e) => {
                tracing::error!(error = %e, "Sweep aborted");
                draft.mark_aborted(e.to_string());
                if let Err(audit) = recorder.flush(draft, self.clock.now()) {
                    tracing::warn!(error = %audit, "Failed to write aborted audit record");
                }
                return Err(e);
            }
        }

        Ok(self.finish(&recorder, draft, report))
    }

    fn finish(&self, recorder: &AuditRecorder, draft: AuditDraft, mut report: RunReport) -> RunReport {
        report.status = draft.status();
        match recorder.flush(draft, self.clock.now()) {
            Ok(path) => report.audit_path = Some(path),
            Err(e) => {
                tracing::error!(error = %e, "Failed to write audit record");
                report.audit_error = Some(e.to_string());
            }
        }
        report
    }

    async fn decide_and_execute(
        &self,
        operator: &Arc<dyn Operator>,
        mode: Option<DeletionMode>,
        cancel: watch::Receiver<bool>,
        draft: &mut AuditDraft,
        report: &mut RunReport,
    ) -> Result<()> {
        let pending = report.analysis.unused.unused.len();
        let mut executor = DeletionExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.config.concurrency.deletions,
        );

        if *cancel.borrow() {
            executor.cancel();
            cancelled(draft, report);
            return Ok(());
        }

        let choice = match mode {
            Some(mode) => mode.as_str().to_string(),
            None if pending == 0 => DeletionMode::Simulate.as_str().to_string(),
            None => {
                let op = Arc::clone(operator);
                match interruptible(&cancel, move || op.choose_mode()).await {
                    Some(choice) => choice??,
                    None => {
                        executor.cancel();
                        cancelled(draft, report);
                        return Ok(());
                    }
                }
            }
        };
        let mode = executor.select_mode(&choice)?;
        draft.record_mode(mode);
        report.mode = Some(mode);

        if pending == 0 {
            tracing::info!("No unused manifests, nothing to delete");
        } else if mode == DeletionMode::Commit {
            // The executor travels with the prompt and only comes back once
            // both answers are in.
            let op = Arc::clone(operator);
            let confirming = interruptible(&cancel, move || {
                let confirmed = executor.confirm(op.as_ref(), pending);
                (executor, confirmed)
            })
            .await;
            match confirming {
                Some(joined) => {
                    let (returned, confirmed) = joined?;
                    executor = returned;
                    confirmed?;
                }
                None => {
                    cancelled(draft, report);
                    return Ok(());
                }
            }
        }

        if *cancel.borrow() {
            executor.cancel();
            cancelled(draft, report);
            return Ok(());
        }

        let execution = if pending == 0 && mode == DeletionMode::Commit {
            executor.cancel();
            ExecutionReport::empty(mode)
        } else {
            executor.execute(&report.analysis.unused.unused, cancel).await?
        };
        draft.record_execution(&execution);
        if execution.cancelled {
            report.reason = Some(String::from("interrupted by operator"));
        }
        report.execution = Some(execution);
        Ok(())
    }
}

impl RunReport {
    fn new(analysis: Analysis) -> Self {
        Self {
            status: RunStatus::Aborted,
            analysis,
            mode: None,
            execution: None,
            reason: None,
            audit_path: None,
            audit_error: None,
        }
    }
}

fn cancelled(draft: &mut AuditDraft, report: &mut RunReport) {
    draft.mark_cancelled();
    report.reason = Some(String::from("interrupted by operator"));
}

/// Resolves once the cancel flag is set. Never resolves if the sender is
/// gone without having set it.
async fn interrupted(cancel: &mut watch::Receiver<bool>) {
    let set = cancel.wait_for(|flag| *flag).await.is_ok();
    if !set {
        std::future::pending::<()>().await;
    }
}

/// Run a blocking operator prompt off the async workers, giving up on it as
/// soon as `cancel` is set. `None` means the run was interrupted; the prompt
/// thread is left to finish on its own.
async fn interruptible<T, F>(cancel: &watch::Receiver<bool>, prompt: F) -> Option<Result<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut interrupt = cancel.clone();
    let handle = tokio::task::spawn_blocking(prompt);
    tokio::select! {
        biased;
        _ = interrupted(&mut interrupt) => None,
        joined = handle => Some(joined.map_err(|e| {
            SweepError::IoError(std::io::Error::other(format!("operator prompt failed: {}", e)))
        })),
    }
}

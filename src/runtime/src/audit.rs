//! Audit recording.
//!
//! A run opens an [`AuditDraft`] and fills it as each stage completes, so a
//! cancelled or aborted run still leaves a best-effort record. The draft is
//! written exactly once by [`AuditRecorder::flush`], which never overwrites an
//! existing file.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use acr_sweep_core::error::{Result, SweepError};
use acr_sweep_core::{Digest, ProtectedManifest, SweepConfig, UnusedManifest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collector::{HostScan, HostScanStats, SkippedTarget};
use crate::executor::{DeletionMode, ExecutionReport};
use crate::inventory::{Inventory, InventoryStats, SkippedRepository};
use crate::resolver::{Resolution, ResolutionStats};
use crate::unused::UnusedSet;

/// Version of the audit file layout.
pub const AUDIT_FILE_VERSION: &str = "1.0";

const GENERATOR: &str = "acr-sweep";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Machine the run executed on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub platform: String,
    pub os_type: String,
    pub os_version: String,
    pub user: String,
}

/// Fixed facts about a run, known before it starts.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub config: SweepConfig,
    pub started_at: DateTime<Utc>,
    pub executed_by: String,
    pub system_info: SystemInfo,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Aborted,
    Rejected,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Aborted => "aborted",
            RunStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record under construction.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    run_id: Uuid,
    info: RunInfo,
    status: RunStatus,
    reason: Option<String>,
    mode: Option<DeletionMode>,
    inventory: Option<InventoryStats>,
    skipped_repositories: Vec<SkippedRepository>,
    hosts: Option<HostScanStats>,
    skipped_targets: Vec<SkippedTarget>,
    resolution: Option<ResolutionStats>,
    older_than_threshold: usize,
    unused: Vec<UnusedManifest>,
    protected: Vec<ProtectedManifest>,
    execution: Option<ExecutionReport>,
}

impl AuditDraft {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn record_inventory(&mut self, inventory: &Inventory) {
        self.inventory = Some(inventory.stats());
        self.skipped_repositories = inventory.skipped_repositories.clone();
    }

    pub fn record_hosts(&mut self, scan: &HostScan) {
        self.hosts = Some(scan.stats());
        self.skipped_targets = scan.skipped.clone();
    }

    pub fn record_resolution(&mut self, resolution: &Resolution) {
        self.resolution = Some(resolution.stats());
    }

    pub fn record_unused(&mut self, unused: &UnusedSet) {
        self.older_than_threshold = unused.older_than_threshold;
        self.unused = unused.unused.clone();
        self.protected = unused.protected.clone();
    }

    pub fn record_mode(&mut self, mode: DeletionMode) {
        self.mode = Some(mode);
    }

    /// Store the execution result. Marks the run completed, or cancelled when
    /// the execution was interrupted.
    pub fn record_execution(&mut self, report: &ExecutionReport) {
        self.mode = Some(report.mode);
        self.status = if report.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        if report.cancelled {
            self.reason = Some("interrupted by operator".to_string());
        }
        self.execution = Some(report.clone());
    }

    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Aborted;
        self.reason = Some(reason.into());
    }

    pub fn mark_rejected(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Rejected;
        self.reason = Some(reason.into());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = RunStatus::Cancelled;
        self.reason = Some("interrupted by operator".to_string());
    }

    /// Mode label used in the file name and `execution_info`.
    fn mode_label(&self) -> String {
        match (self.status, self.mode) {
            (RunStatus::Aborted, _) => RunStatus::Aborted.to_string(),
            (_, Some(mode)) => mode.to_string(),
            (status, None) => status.to_string(),
        }
    }

    /// File name, `{start}_{mode}_{registry}_{unused}_manifests.json`.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.file_stem())
    }

    /// Name used when [`file_name`](Self::file_name) is already taken by
    /// another run that started in the same second.
    pub fn fallback_file_name(&self) -> String {
        let run_id = self.run_id.simple().to_string();
        format!("{}_{}.json", self.file_stem(), &run_id[..8])
    }

    fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}_manifests",
            self.info.started_at.format("%Y%m%d_%H%M%S"),
            self.mode_label(),
            self.info.config.registry_name,
            self.unused.len()
        )
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for skipped in &self.skipped_repositories {
            warnings.push(format!(
                "repository '{}' skipped: {}",
                skipped.repository, skipped.reason
            ));
        }
        for skipped in &self.skipped_targets {
            warnings.push(format!(
                "host '{}' skipped, images it runs were treated as unused: {}",
                skipped.label(),
                skipped.reason
            ));
        }
        if !self.protected.is_empty() {
            warnings.push(format!(
                "{} manifest(s) older than {} days are still in use and were protected",
                self.protected.len(),
                self.info.config.threshold_days
            ));
        }
        if let Some(ref execution) = self.execution {
            if execution.not_attempted > 0 {
                warnings.push(format!(
                    "{} deletion(s) not attempted after cancellation",
                    execution.not_attempted
                ));
            }
        }
        warnings
    }

    fn into_record(self, ended_at: DateTime<Utc>) -> AuditRecord {
        let duration_ms = ended_at
            .signed_duration_since(self.info.started_at)
            .num_milliseconds()
            .max(0);
        let duration_seconds = duration_ms as f64 / 1000.0;
        let whole_seconds = duration_ms / 1000;
        let config = &self.info.config;

        let deletion_results: BTreeMap<(&str, &Digest), DeletionResult> = match self.execution {
            Some(ref report) => deletion_results(report),
            None => BTreeMap::new(),
        };
        let simulated: BTreeMap<(&str, &Digest), &str> = self
            .execution
            .as_ref()
            .map(|report| {
                report
                    .simulated
                    .iter()
                    .map(|s| ((s.repository.as_str(), &s.digest), s.command.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let manifests = self
            .unused
            .iter()
            .map(|u| {
                let m = &u.manifest;
                let key = (m.repository.as_str(), &m.digest);
                AuditManifest {
                    repository: m.repository.clone(),
                    digest: m.digest.clone(),
                    tags: m.tags.iter().cloned().collect(),
                    created_time: m.created_at,
                    age_days: u.age_days,
                    size_bytes: m.size_bytes,
                    size_mb: size_mb(m.size_bytes),
                    deletion_result: deletion_results.get(&key).cloned(),
                    simulated_command: simulated.get(&key).map(|c| c.to_string()),
                }
            })
            .collect();

        let old_manifests_in_use = self
            .protected
            .iter()
            .map(|p| {
                let m = &p.manifest;
                AuditProtectedManifest {
                    repository: m.repository.clone(),
                    digest: m.digest.clone(),
                    tags: m.tags.iter().cloned().collect(),
                    created_time: m.created_at,
                    age_days: p.age_days,
                    days_over_threshold: p.days_over_threshold,
                    size_bytes: m.size_bytes,
                    size_mb: size_mb(m.size_bytes),
                    app_service_count: p.used_by.len(),
                    used_by_app_services: p.used_by.clone(),
                    status: "protected_from_deletion".to_string(),
                }
            })
            .collect();

        let (deletion_summary, failed_deletions) = match self.execution {
            Some(ref report)
                if report.mode == DeletionMode::Commit
                    && report.attempted() + report.not_attempted > 0 =>
            (
                Some(DeletionSummary {
                    total_attempted: report.attempted(),
                    successful: report.succeeded(),
                    failed: report.failed(),
                    not_attempted: report.not_attempted,
                    success_rate: report.success_rate(),
                }),
                report
                    .failures()
                    .map(|o| FailedDeletion {
                        repository: o.repository.clone(),
                        digest: o.digest.clone(),
                        error: o.error.clone().unwrap_or_default(),
                    })
                    .collect(),
            ),
            _ => (None, Vec::new()),
        };

        let resolution = self.resolution.unwrap_or_default();
        let hosts = self.hosts.unwrap_or_default();
        let inventory = self.inventory.unwrap_or_default();
        let summary = AuditSummary {
            repositories_scanned: inventory.repositories,
            total_manifests_scanned: inventory.manifests,
            manifests_older_than_threshold: self.older_than_threshold,
            images_in_use: resolution.in_use_digests,
            unused_manifests_identified: self.unused.len(),
            reclaimable_bytes: self.unused.iter().map(|u| u.manifest.size_bytes).sum(),
            old_manifests_still_in_use: self.protected.len(),
            hosts_scanned: hosts.hosts,
            slots_scanned: hosts.slots,
            skipped_repositories: inventory.skipped_repositories,
            skipped_hosts: hosts.skipped_hosts,
            skipped_host_targets: hosts.skipped_targets,
            unresolved_references: resolution.unmatched,
            out_of_scope_references: resolution.out_of_scope,
        };

        let warnings = self.warnings();
        let deletion_mode = self.mode_label();

        AuditRecord {
            audit_metadata: AuditMetadata {
                audit_file_version: AUDIT_FILE_VERSION.to_string(),
                generator: GENERATOR.to_string(),
                generator_version: crate::VERSION.to_string(),
                generated_at: ended_at,
                run_id: self.run_id,
            },
            execution_info: ExecutionInfo {
                status: self.status,
                complete: self.status == RunStatus::Completed,
                deletion_mode,
                reason: self.reason,
                start_time: self.info.started_at,
                end_time: ended_at,
                duration_seconds: (duration_seconds * 100.0).round() / 100.0,
                duration_human: format!("{}m {}s", whole_seconds / 60, whole_seconds % 60),
                executed_by: self.info.executed_by,
            },
            configuration: AuditConfiguration {
                subscription_id: config.subscription_id.clone(),
                acr_name: config.registry_name.clone(),
                acr_resource_group: config.resource_group.clone(),
                login_server: config.login_server(),
                image_age_threshold_days: config.threshold_days,
            },
            system_info: self.info.system_info,
            summary,
            warnings,
            manifests,
            old_manifests_in_use,
            deletion_summary,
            failed_deletions,
        }
    }
}

fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

/// Outcomes keyed by repository and digest; a digest is only unique within
/// one repository.
fn deletion_results(report: &ExecutionReport) -> BTreeMap<(&str, &Digest), DeletionResult> {
    report
        .outcomes
        .iter()
        .map(|o| {
            let result = DeletionResult {
                status: if o.succeeded { "success" } else { "failed" }.to_string(),
                error: o.error.clone(),
                attempted_at: o.attempted_at,
            };
            ((o.repository.as_str(), &o.digest), result)
        })
        .collect()
}

fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Serialized audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_metadata: AuditMetadata,
    pub execution_info: ExecutionInfo,
    pub configuration: AuditConfiguration,
    pub system_info: SystemInfo,
    pub summary: AuditSummary,
    pub warnings: Vec<String>,
    pub manifests: Vec<AuditManifest>,
    pub old_manifests_in_use: Vec<AuditProtectedManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_summary: Option<DeletionSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_deletions: Vec<FailedDeletion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub audit_file_version: String,
    pub generator: String,
    pub generator_version: String,
    pub generated_at: DateTime<Utc>,
    pub run_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub status: RunStatus,
    pub complete: bool,
    pub deletion_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub duration_human: String,
    pub executed_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfiguration {
    pub subscription_id: String,
    pub acr_name: String,
    pub acr_resource_group: String,
    pub login_server: String,
    pub image_age_threshold_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSummary {
    pub repositories_scanned: usize,
    pub total_manifests_scanned: usize,
    pub manifests_older_than_threshold: usize,
    pub images_in_use: usize,
    pub unused_manifests_identified: usize,
    pub reclaimable_bytes: u64,
    pub old_manifests_still_in_use: usize,
    pub hosts_scanned: usize,
    pub slots_scanned: usize,
    pub skipped_repositories: usize,
    pub skipped_hosts: usize,
    pub skipped_host_targets: usize,
    pub unresolved_references: usize,
    pub out_of_scope_references: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionResult {
    /// `success` or `failed`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditManifest {
    pub repository: String,
    pub digest: Digest,
    pub tags: Vec<String>,
    pub created_time: DateTime<Utc>,
    pub age_days: i64,
    pub size_bytes: u64,
    pub size_mb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_result: Option<DeletionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditProtectedManifest {
    pub repository: String,
    pub digest: Digest,
    pub tags: Vec<String>,
    pub created_time: DateTime<Utc>,
    pub age_days: i64,
    pub days_over_threshold: i64,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub used_by_app_services: Vec<String>,
    pub app_service_count: usize,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionSummary {
    pub total_attempted: usize,
    pub successful: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDeletion {
    pub repository: String,
    pub digest: Digest,
    pub error: String,
}

/// Writes audit records into one directory.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    dir: PathBuf,
}

impl AuditRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open a draft for a new run. The draft starts out `aborted` until an
    /// execution or another terminal status is recorded.
    pub fn begin(&self, info: RunInfo) -> AuditDraft {
        let run_id = Uuid::new_v4();
        tracing::debug!(run_id = %run_id, "Audit draft opened");
        AuditDraft {
            run_id,
            info,
            status: RunStatus::Aborted,
            reason: Some("run ended before execution".to_string()),
            mode: None,
            inventory: None,
            skipped_repositories: Vec::new(),
            hosts: None,
            skipped_targets: Vec::new(),
            resolution: None,
            older_than_threshold: 0,
            unused: Vec::new(),
            protected: Vec::new(),
            execution: None,
        }
    }

    /// Write the record. Fails rather than overwrite an existing file.
    pub fn flush(&self, draft: AuditDraft, ended_at: DateTime<Utc>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            SweepError::Audit(format!(
                "Failed to create audit directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let primary = self.dir.join(draft.file_name());
        let fallback = self.dir.join(draft.fallback_file_name());
        let status = draft.status;
        let record = draft.into_record(ended_at);
        let mut data = serde_json::to_string_pretty(&record)?;
        data.push('\n');

        let (path, opened) = match create_new(&primary) {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!(
                    path = %primary.display(),
                    "Audit record name already taken, using run-specific name"
                );
                let opened = create_new(&fallback);
                (fallback, opened)
            }
            opened => (primary, opened),
        };
        let mut file = opened.map_err(|e| {
            SweepError::Audit(format!(
                "Failed to create audit record {}: {}",
                path.display(),
                e
            ))
        })?;
        file.write_all(data.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| {
                SweepError::Audit(format!(
                    "Failed to write audit record {}: {}",
                    path.display(),
                    e
                ))
            })?;

        tracing::info!(path = %path.display(), status = %status, "Audit record written");
        Ok(path)
    }
}

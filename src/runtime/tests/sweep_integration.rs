//! End-to-end sweep runs against in-memory collaborators.

use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};

use acr_sweep_core::{ConfigLayer, Digest, Manifest, SweepConfig, SweepError};
use acr_sweep_runtime::memory::{
    days_ago, docker_linux, fixed_now, FixedClock, InMemoryHosts, InMemoryRegistry,
    ScriptedOperator,
};
use acr_sweep_runtime::{
    ContainerConfig, DeletionMode, Host, HostClient, Operator, RunStatus, Sweep, CONFIRMATION_TOKEN,
};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;

fn config_layer(audit_dir: &Path, threshold_days: u32) -> ConfigLayer {
    ConfigLayer {
        subscription_id: Some("sub-1".to_string()),
        registry_name: Some("myacr".to_string()),
        resource_group: Some("rg".to_string()),
        threshold_days: Some(threshold_days),
        audit_dir: Some(audit_dir.to_path_buf()),
        ..Default::default()
    }
}

fn config(audit_dir: &Path, threshold_days: u32) -> SweepConfig {
    SweepConfig::resolve(config_layer(audit_dir, threshold_days)).unwrap()
}

fn digest(s: &str) -> Digest {
    Digest::parse(s).unwrap()
}

fn sweep(
    dir: &TempDir,
    registry: Arc<InMemoryRegistry>,
    hosts: InMemoryHosts,
    threshold_days: u32,
) -> Sweep {
    Sweep::new(config(dir.path(), threshold_days), registry, Arc::new(hosts))
        .with_clock(Arc::new(FixedClock(fixed_now())))
        .with_executed_by("tester")
}

fn idle() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

fn unused_digests(report: &acr_sweep_runtime::RunReport) -> Vec<String> {
    report
        .analysis
        .unused
        .unused
        .iter()
        .map(|u| u.manifest.digest.to_string())
        .collect()
}

fn read_audit(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn old_manifest_with_no_users_is_unused() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(45), 10).with_tags(["v1"])),
    );
    let sweep = sweep(&dir, registry, InMemoryHosts::new("sub-1"), 30);

    let report = sweep
        .run(
            Arc::new(ScriptedOperator::new("1", false, "")),
            Some(DeletionMode::Simulate),
            idle(),
        )
        .await
        .unwrap();
    assert_eq!(unused_digests(&report), vec!["sha256:1"]);
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn referenced_tag_protects_manifest() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(45), 10).with_tags(["v1"])),
    );
    let hosts = InMemoryHosts::new("sub-1").with_host("web", docker_linux("myacr.azurecr.io/a:v1"));
    let sweep = sweep(&dir, registry, hosts, 30);

    let report = sweep
        .run(
            Arc::new(ScriptedOperator::new("1", false, "")),
            Some(DeletionMode::Simulate),
            idle(),
        )
        .await
        .unwrap();
    assert!(unused_digests(&report).is_empty());
    assert_eq!(report.analysis.unused.protected.len(), 1);
    assert_eq!(report.analysis.unused.protected[0].used_by, vec!["web".to_string()]);
}

#[tokio::test]
async fn young_manifest_is_never_unused() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(10), 10).with_tags(["v1"])),
    );
    let sweep = sweep(&dir, registry, InMemoryHosts::new("sub-1"), 30);

    let analysis = sweep.analyze().await.unwrap();
    assert!(analysis.unused.unused.is_empty());
    assert_eq!(analysis.unused.older_than_threshold, 0);
}

#[tokio::test]
async fn commit_with_one_failure_completes() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10))
            .with_manifest(Manifest::new("a", digest("sha256:2"), days_ago(60), 10))
            .with_manifest(Manifest::new("b", digest("sha256:3"), days_ago(45), 10))
            .failing_delete("sha256:2", "locked"),
    );
    let sweep = sweep(&dir, Arc::clone(&registry), InMemoryHosts::new("sub-1"), 30);

    let operator = Arc::new(ScriptedOperator::approving());
    let report = sweep.run(operator.clone(), None, idle()).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.mode, Some(DeletionMode::Commit));
    let execution = report.execution.as_ref().unwrap();
    assert_eq!(execution.succeeded(), 2);
    assert_eq!(execution.failed(), 1);
    assert_eq!(execution.success_rate(), 66.67);
    assert_eq!(registry.deleted().len(), 2);
    assert_eq!(operator.prompts().len(), 3);

    let path = report.audit_path.unwrap();
    assert!(path
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .ends_with("_commit_myacr_3_manifests.json"));
    let audit = read_audit(&path);
    assert_eq!(audit["deletion_summary"]["failed"], 1);
    assert_eq!(audit["failed_deletions"][0]["digest"], "sha256:2");
    assert_eq!(audit["execution_info"]["executed_by"], "tester");
}

#[tokio::test]
async fn wrong_token_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10)),
    );
    let sweep = sweep(&dir, Arc::clone(&registry), InMemoryHosts::new("sub-1"), 30);

    let operator = Arc::new(ScriptedOperator::new("2", true, "delete"));
    let report = sweep.run(operator.clone(), None, idle()).await.unwrap();

    assert_eq!(report.status, RunStatus::Rejected);
    assert!(report.execution.is_none());
    assert!(registry.deleted().is_empty());
    let audit = read_audit(&report.audit_path.unwrap());
    assert_eq!(audit["execution_info"]["status"], "rejected");
    assert_eq!(audit["execution_info"]["complete"], false);
}

#[tokio::test]
async fn invalid_mode_is_rejected() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10)),
    );
    let sweep = sweep(&dir, Arc::clone(&registry), InMemoryHosts::new("sub-1"), 30);

    let report = sweep
        .run(Arc::new(ScriptedOperator::new("3", true, "DELETE")), None, idle())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Rejected);
    assert!(registry.deleted().is_empty());
}

#[tokio::test]
async fn simulate_is_repeatable() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_page_size(1)
            .with_manifest(Manifest::new("b", digest("sha256:2"), days_ago(40), 10))
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(40), 10))
            .with_manifest(Manifest::new("a", digest("sha256:3"), days_ago(70), 10)),
    );
    let sweep = sweep(&dir, Arc::clone(&registry), InMemoryHosts::new("sub-1"), 30);
    let operator = Arc::new(ScriptedOperator::new("1", false, ""));

    let first = sweep
        .run(operator.clone(), Some(DeletionMode::Simulate), idle())
        .await
        .unwrap();
    // Second record lands on the same timestamped file name.
    let second_dir = TempDir::new().unwrap();
    let second_sweep = Sweep::new(
        config(second_dir.path(), 30),
        Arc::clone(&registry) as Arc<dyn acr_sweep_runtime::RegistryClient>,
        Arc::new(InMemoryHosts::new("sub-1")),
    )
    .with_clock(Arc::new(FixedClock(fixed_now())));
    let second = second_sweep
        .run(operator.clone(), Some(DeletionMode::Simulate), idle())
        .await
        .unwrap();

    assert_eq!(unused_digests(&first), vec!["sha256:3", "sha256:1", "sha256:2"]);
    assert_eq!(unused_digests(&first), unused_digests(&second));
    let commands: Vec<String> = first
        .execution
        .unwrap()
        .simulated
        .into_iter()
        .map(|s| s.command)
        .collect();
    assert_eq!(commands[0], "delete myacr.azurecr.io/a@sha256:3");
    assert!(registry.deleted().is_empty());
}

#[tokio::test]
async fn host_enumeration_failure_aborts_with_record() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10)),
    );
    let hosts = InMemoryHosts::new("sub-1").failing_host_listing("unauthorized");
    let sweep = sweep(&dir, Arc::clone(&registry), hosts, 30);

    let err = sweep
        .run(Arc::new(ScriptedOperator::approving()), None, idle())
        .await
        .unwrap_err();
    assert!(matches!(err, SweepError::HostEnumeration { .. }));
    assert!(registry.deleted().is_empty());

    let records: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(records.len(), 1);
    let path = records[0].as_ref().unwrap().path();
    assert!(path.to_str().unwrap().contains("_aborted_"));
    assert_eq!(read_audit(&path)["execution_info"]["complete"], false);
}

#[tokio::test]
async fn skipped_host_is_surfaced() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10).with_tags(["v1"])),
    );
    let hosts = InMemoryHosts::new("sub-1")
        .with_host("web", docker_linux("myacr.azurecr.io/a:v1"))
        .failing_host("web", "forbidden");
    let sweep = sweep(&dir, registry, hosts, 30);

    let report = sweep
        .run(
            Arc::new(ScriptedOperator::new("1", false, "")),
            Some(DeletionMode::Simulate),
            idle(),
        )
        .await
        .unwrap();
    assert!(report.analysis.is_degraded());
    assert_eq!(unused_digests(&report), vec!["sha256:1"]);
    let audit = read_audit(&report.audit_path.unwrap());
    assert_eq!(audit["summary"]["skipped_hosts"], 1);
    assert!(!audit["warnings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_before_execution() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10)),
    );
    let sweep = sweep(&dir, Arc::clone(&registry), InMemoryHosts::new("sub-1"), 30);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let report = sweep.run(Arc::new(ScriptedOperator::approving()), None, rx).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(registry.deleted().is_empty());
    let audit = read_audit(&report.audit_path.unwrap());
    assert_eq!(audit["execution_info"]["status"], "cancelled");
}

/// Host client whose listing raises the cancel flag and then never returns.
struct StalledHosts {
    cancel: watch::Sender<bool>,
}

#[async_trait]
impl HostClient for StalledHosts {
    fn scope(&self) -> &str {
        "sub-1"
    }

    async fn list_hosts(&self) -> acr_sweep_core::Result<Vec<Host>> {
        self.cancel.send_replace(true);
        std::future::pending().await
    }

    async fn list_slots(&self, _host: &Host) -> acr_sweep_core::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_container_config(
        &self,
        _host: &Host,
        _slot: Option<&str>,
    ) -> acr_sweep_core::Result<ContainerConfig> {
        Ok(ContainerConfig::default())
    }
}

/// Operator that raises the cancel flag at the mode prompt and then waits
/// for input that only arrives when `release` is dropped.
struct StalledOperator {
    cancel: watch::Sender<bool>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl StalledOperator {
    fn wait(&self) {
        if let Ok(release) = self.release.lock() {
            let _ = release.recv();
        }
    }
}

impl Operator for StalledOperator {
    fn choose_mode(&self) -> acr_sweep_core::Result<String> {
        self.cancel.send_replace(true);
        self.wait();
        Ok("2".to_string())
    }

    fn confirm(&self, _prompt: &str) -> acr_sweep_core::Result<bool> {
        Ok(true)
    }

    fn read_token(&self, _prompt: &str) -> acr_sweep_core::Result<String> {
        Ok(CONFIRMATION_TOKEN.to_string())
    }
}

#[tokio::test]
async fn interrupt_during_analysis_writes_cancelled_record() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10)),
    );
    let (tx, rx) = watch::channel(false);
    let sweep = Sweep::new(
        config(dir.path(), 30),
        registry.clone(),
        Arc::new(StalledHosts { cancel: tx }),
    )
    .with_clock(Arc::new(FixedClock(fixed_now())));

    let report = sweep
        .run(Arc::new(ScriptedOperator::approving()), None, rx)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.mode.is_none());
    assert!(report.analysis.unused.unused.is_empty());
    assert!(registry.deleted().is_empty());
    let path = report.audit_path.unwrap();
    assert!(path.to_str().unwrap().contains("_cancelled_myacr_0_"));
    let audit = read_audit(&path);
    assert_eq!(audit["execution_info"]["status"], "cancelled");
    assert_eq!(audit["execution_info"]["complete"], false);
}

#[tokio::test]
async fn interrupt_at_mode_prompt_does_not_wait_for_answer() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10)),
    );
    let sweep = sweep(&dir, Arc::clone(&registry), InMemoryHosts::new("sub-1"), 30);
    let (tx, rx) = watch::channel(false);
    let (release, waiting) = mpsc::channel();
    let operator = Arc::new(StalledOperator {
        cancel: tx,
        release: Mutex::new(waiting),
    });

    let report = sweep.run(operator, None, rx).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.execution.is_none());
    assert!(registry.deleted().is_empty());
    let audit = read_audit(&report.audit_path.unwrap());
    assert_eq!(audit["execution_info"]["status"], "cancelled");
    assert_eq!(audit["summary"]["unused_manifests_identified"], 1);
    drop(release);
}

#[tokio::test]
async fn interrupt_mid_commit_finishes_in_flight_and_records_rest() {
    let dir = TempDir::new().unwrap();
    let (tx, rx) = watch::channel(false);
    let registry = Arc::new(
        InMemoryRegistry::new("myacr")
            .with_manifest(Manifest::new("a", digest("sha256:1"), days_ago(90), 10))
            .with_manifest(Manifest::new("a", digest("sha256:2"), days_ago(60), 10))
            .with_manifest(Manifest::new("b", digest("sha256:3"), days_ago(45), 10))
            .interrupting_on_delete(tx),
    );
    let layer = ConfigLayer {
        deletion_concurrency: Some(1),
        ..Default::default()
    }
    .or(config_layer(dir.path(), 30));
    let sweep = Sweep::new(
        SweepConfig::resolve(layer).unwrap(),
        registry.clone(),
        Arc::new(InMemoryHosts::new("sub-1")),
    )
    .with_clock(Arc::new(FixedClock(fixed_now())));

    let report = sweep
        .run(Arc::new(ScriptedOperator::approving()), None, rx)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    let execution = report.execution.as_ref().unwrap();
    assert!(execution.cancelled);
    assert_eq!(execution.succeeded(), 1);
    assert_eq!(execution.not_attempted, 2);
    assert_eq!(registry.deleted(), vec![("a".to_string(), digest("sha256:1"))]);

    let audit = read_audit(&report.audit_path.unwrap());
    assert_eq!(audit["execution_info"]["status"], "cancelled");
    assert_eq!(audit["deletion_summary"]["total_attempted"], 1);
    assert_eq!(audit["deletion_summary"]["not_attempted"], 2);
    assert_eq!(audit["manifests"][0]["deletion_result"]["status"], "success");
    assert!(audit["manifests"][1].get("deletion_result").is_none());
}

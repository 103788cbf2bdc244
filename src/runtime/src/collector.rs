//! Host image reference collection.
//!
//! Probes the primary slot and every deployment slot of each host for a
//! configured container image. Hosts are probed with bounded concurrency and
//! results are merged in host listing order once every probe has finished.
//!
//! A host or slot whose configuration cannot be read is skipped, which means
//! any image it runs is invisible to the unused-set computation. Skips are
//! counted and must be surfaced to the operator.

use std::sync::Arc;

use acr_sweep_core::error::{Result, SweepError};
use acr_sweep_core::reference::host_label;
use acr_sweep_core::ImageReference;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::client::{Host, HostClient};
use crate::extract::{default_strategies, extract_image, ExtractionStrategy};

/// A host, or one slot of a host, left out of the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTarget {
    pub host: String,
    /// `None` when the whole host (or its slot list) was unreadable
    pub slot: Option<String>,
    pub reason: String,
}

impl SkippedTarget {
    pub fn label(&self) -> String {
        host_label(&self.host, self.slot.as_deref().unwrap_or(""))
    }
}

/// Counts describing a host scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostScanStats {
    pub hosts: usize,
    pub slots: usize,
    pub references: usize,
    pub without_image: usize,
    pub skipped_hosts: usize,
    pub skipped_targets: usize,
}

/// Result of probing every host in scope.
#[derive(Debug, Clone, Default)]
pub struct HostScan {
    pub scope: String,
    pub references: Vec<ImageReference>,
    pub hosts_scanned: usize,
    pub slots_scanned: usize,
    /// Host slots that were read but carry no recognizable image
    pub without_image: usize,
    pub skipped: Vec<SkippedTarget>,
}

impl HostScan {
    /// Distinct hosts with at least one unreadable target.
    pub fn skipped_hosts(&self) -> usize {
        let mut hosts: Vec<&str> = self.skipped.iter().map(|s| s.host.as_str()).collect();
        hosts.sort_unstable();
        hosts.dedup();
        hosts.len()
    }

    pub fn stats(&self) -> HostScanStats {
        HostScanStats {
            hosts: self.hosts_scanned,
            slots: self.slots_scanned,
            references: self.references.len(),
            without_image: self.without_image,
            skipped_hosts: self.skipped_hosts(),
            skipped_targets: self.skipped.len(),
        }
    }
}

#[derive(Default)]
struct HostProbe {
    references: Vec<ImageReference>,
    slots_scanned: usize,
    without_image: usize,
    skipped: Vec<SkippedTarget>,
}

/// Collects image references from every host through a [`HostClient`].
pub struct ReferenceCollector {
    client: Arc<dyn HostClient>,
    strategies: Arc<[ExtractionStrategy]>,
    concurrency: usize,
}

impl ReferenceCollector {
    /// Collector using [`default_strategies`].
    pub fn new(client: Arc<dyn HostClient>, concurrency: usize) -> Self {
        Self::with_strategies(client, default_strategies(), concurrency)
    }

    pub fn with_strategies(
        client: Arc<dyn HostClient>,
        strategies: Vec<ExtractionStrategy>,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            strategies: strategies.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Probe every host and slot in scope.
    ///
    /// Fails only if the host list itself cannot be read.
    pub async fn list_host_image_references(&self) -> Result<HostScan> {
        let scope = self.client.scope().to_string();
        tracing::info!(scope = %scope, "Listing hosts");

        let hosts = self
            .client
            .list_hosts()
            .await
            .map_err(|e| SweepError::HostEnumeration {
                scope: scope.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(count = hosts.len(), "Found hosts");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(hosts.len());
        for host in &hosts {
            let client = Arc::clone(&self.client);
            let strategies = Arc::clone(&self.strategies);
            let semaphore = Arc::clone(&semaphore);
            let host = host.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                probe_host(client.as_ref(), &strategies, &host).await
            }));
        }

        let mut scan = HostScan {
            scope,
            hosts_scanned: hosts.len(),
            ..Default::default()
        };
        for (host, handle) in hosts.iter().zip(handles) {
            let probe = match handle.await {
                Ok(probe) => probe,
                Err(e) => HostProbe {
                    skipped: vec![SkippedTarget {
                        host: host.name.clone(),
                        slot: None,
                        reason: format!("probe task failed: {}", e),
                    }],
                    ..Default::default()
                },
            };
            scan.references.extend(probe.references);
            scan.slots_scanned += probe.slots_scanned;
            scan.without_image += probe.without_image;
            scan.skipped.extend(probe.skipped);
        }

        if scan.skipped.is_empty() {
            tracing::info!(references = scan.references.len(), "Host scan complete");
        } else {
            tracing::warn!(
                references = scan.references.len(),
                skipped_hosts = scan.skipped_hosts(),
                skipped_targets = scan.skipped.len(),
                "Host scan incomplete, images used by skipped hosts are treated as unused"
            );
        }
        Ok(scan)
    }
}

async fn probe_host(
    client: &dyn HostClient,
    strategies: &[ExtractionStrategy],
    host: &Host,
) -> HostProbe {
    let mut probe = HostProbe::default();

    let primary = match client.get_container_config(host, None).await {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(host = %host.name, error = %e, "Skipping host, configuration unreadable");
            probe.skipped.push(SkippedTarget {
                host: host.name.clone(),
                slot: None,
                reason: e.to_string(),
            });
            return probe;
        }
    };
    record(&mut probe, strategies, &primary, host, "");

    let slots = match client.list_slots(host).await {
        Ok(slots) => slots,
        Err(e) => {
            tracing::warn!(host = %host.name, error = %e, "Skipping deployment slots, slot list unreadable");
            probe.skipped.push(SkippedTarget {
                host: host.name.clone(),
                slot: None,
                reason: format!("slot list unreadable: {}", e),
            });
            return probe;
        }
    };

    for slot in slots {
        match client.get_container_config(host, Some(&slot)).await {
            Ok(config) => {
                probe.slots_scanned += 1;
                record(&mut probe, strategies, &config, host, &slot);
            }
            Err(e) => {
                tracing::warn!(host = %host.name, slot = %slot, error = %e, "Skipping slot, configuration unreadable");
                probe.skipped.push(SkippedTarget {
                    host: host.name.clone(),
                    slot: Some(slot),
                    reason: e.to_string(),
                });
            }
        }
    }

    probe
}

fn record(
    probe: &mut HostProbe,
    strategies: &[ExtractionStrategy],
    config: &crate::client::ContainerConfig,
    host: &Host,
    slot: &str,
) {
    match extract_image(strategies, config) {
        Some((strategy, image)) => {
            let reference = ImageReference::new(image, host.name.clone(), slot);
            tracing::debug!(
                location = %reference.location(),
                image = %reference,
                strategy,
                "Found image reference"
            );
            probe.references.push(reference);
        }
        None => {
            tracing::debug!(location = %host_label(&host.name, slot), "No container image configured");
            probe.without_image += 1;
        }
    }
}

//! Table formatting helpers for CLI output.

use acr_sweep_runtime::{Analysis, ExecutionReport, RunReport, RunStatus};
use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Scan counts and degraded-scan warnings.
pub fn print_analysis(analysis: &Analysis, threshold_days: u32) {
    let inventory = analysis.inventory.stats();
    let scan = analysis.scan.stats();
    let resolution = analysis.resolution.stats();

    println!("Registry:        {}", analysis.inventory.registry);
    println!(
        "Repositories:    {} ({} manifests, {})",
        inventory.repositories,
        inventory.manifests,
        format_bytes(inventory.total_size_bytes)
    );
    println!(
        "Hosts scanned:   {} ({} deployment slots)",
        scan.hosts, scan.slots
    );
    println!(
        "Images in use:   {} digests from {} references",
        resolution.in_use_digests, scan.references
    );
    println!(
        "Older than {}d:  {}",
        threshold_days, analysis.unused.older_than_threshold
    );
    println!(
        "Unused:          {} ({})",
        analysis.unused.unused.len(),
        format_bytes(analysis.unused.reclaimable_bytes())
    );

    for skipped in &analysis.inventory.skipped_repositories {
        eprintln!(
            "WARNING: repository '{}' was skipped: {}",
            skipped.repository, skipped.reason
        );
    }
    if !analysis.scan.skipped.is_empty() {
        eprintln!(
            "WARNING: {} host target(s) could not be read. Images they run are NOT protected:",
            analysis.scan.skipped.len()
        );
        for skipped in &analysis.scan.skipped {
            eprintln!("  - {}: {}", skipped.label(), skipped.reason);
        }
    }
    if resolution.unmatched > 0 {
        eprintln!(
            "NOTE: {} image reference(s) matched no manifest in the registry",
            resolution.unmatched
        );
    }
}

/// Unused manifests, oldest first.
pub fn print_unused(analysis: &Analysis) {
    if analysis.unused.unused.is_empty() {
        println!("\nNo unused manifests found.");
        return;
    }

    let mut table = new_table(&["REPOSITORY", "DIGEST", "TAGS", "CREATED", "AGE", "SIZE"]);
    for unused in &analysis.unused.unused {
        let m = &unused.manifest;
        table.add_row(vec![
            m.repository.clone(),
            m.digest.short().to_string(),
            m.tags_display(),
            m.created_at.format("%Y-%m-%d").to_string(),
            format!("{}d", unused.age_days),
            format_bytes(m.size_bytes),
        ]);
    }
    println!("\n{table}");
}

/// Old manifests kept because a host still runs them.
pub fn print_protected(analysis: &Analysis, threshold_days: u32) {
    let protected = &analysis.unused.protected;
    if protected.is_empty() {
        return;
    }

    println!(
        "\nWARNING: {} manifest(s) older than {} days are still in use and were kept:",
        protected.len(),
        threshold_days
    );
    let mut table = new_table(&["REPOSITORY", "DIGEST", "TAGS", "AGE", "OVER", "USED BY"]);
    for p in protected {
        table.add_row(vec![
            p.manifest.repository.clone(),
            p.manifest.digest.short().to_string(),
            p.manifest.tags_display(),
            format!("{}d", p.age_days),
            format!("+{}d", p.days_over_threshold),
            p.used_by.join(", "),
        ]);
    }
    println!("{table}");
    println!("Consider redeploying these hosts with a newer image.");
}

/// Simulated commands or deletion outcomes.
pub fn print_execution(report: &ExecutionReport) {
    if !report.simulated.is_empty() {
        println!("\nSimulated deletions (nothing was deleted):");
        for simulated in &report.simulated {
            println!("  {}", simulated.command);
        }
    }

    if !report.outcomes.is_empty() {
        let mut table = new_table(&["REPOSITORY", "DIGEST", "RESULT"]);
        for outcome in &report.outcomes {
            let result = match outcome.error {
                Some(ref error) if !outcome.succeeded => format!("failed: {error}"),
                _ => "deleted".to_string(),
            };
            table.add_row(vec![
                outcome.repository.clone(),
                outcome.digest.short().to_string(),
                result,
            ]);
        }
        println!("\n{table}");
        println!(
            "Deleted {} of {} ({}% success), {} failed",
            report.succeeded(),
            report.attempted(),
            report.success_rate(),
            report.failed()
        );
    }

    if report.not_attempted > 0 {
        println!("{} deletion(s) not attempted after interruption", report.not_attempted);
    }
}

/// Final status line and audit location.
pub fn print_run_summary(report: &RunReport) {
    match report.status {
        RunStatus::Completed => {}
        RunStatus::Rejected => println!(
            "\nDeletion cancelled, no manifests were deleted ({}).",
            report.reason.as_deref().unwrap_or("rejected")
        ),
        RunStatus::Cancelled => println!("\nRun interrupted."),
        RunStatus::Aborted => println!(
            "\nRun aborted: {}",
            report.reason.as_deref().unwrap_or("unknown reason")
        ),
    }

    match (&report.audit_path, &report.audit_error) {
        (Some(path), _) => println!("Audit record: {}", path.display()),
        (None, Some(error)) => eprintln!("WARNING: audit record not written: {error}"),
        (None, None) => {}
    }
}

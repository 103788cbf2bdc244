//! `acr-sweep scan` command: report unused manifests without deleting.

use std::sync::Arc;

use acr_sweep_runtime::DeletionMode;
use clap::Args;

use super::GlobalArgs;
use crate::output;
use crate::prompt::StdinOperator;

#[derive(Args)]
pub struct ScanArgs {
    /// Print the unused and protected manifests as JSON
    #[arg(long)]
    pub json: bool,

    /// Do not list individual manifests, only the summary
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(global: &GlobalArgs, args: ScanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = global.resolve_config()?;
    let threshold_days = config.threshold_days;
    let sweep = super::connect(global, config).await?;

    let report = sweep
        .run(
            Arc::new(StdinOperator::new()),
            Some(DeletionMode::Simulate),
            super::cancel_on_interrupt(),
        )
        .await?;

    if args.json {
        let body = serde_json::json!({
            "status": report.status,
            "registry": report.analysis.inventory.registry,
            "threshold_days": threshold_days,
            "degraded": report.analysis.is_degraded(),
            "reclaimable_bytes": report.analysis.unused.reclaimable_bytes(),
            "unused": report.analysis.unused.unused,
            "protected": report.analysis.unused.protected,
            "audit_path": report.audit_path,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        super::exit_if_interrupted(&report);
        return Ok(());
    }

    output::print_analysis(&report.analysis, threshold_days);
    if !args.quiet {
        output::print_unused(&report.analysis);
        if let Some(ref execution) = report.execution {
            output::print_execution(execution);
        }
    }
    output::print_protected(&report.analysis, threshold_days);
    output::print_run_summary(&report);
    super::exit_if_interrupted(&report);
    Ok(())
}

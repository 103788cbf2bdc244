//! `acr-sweep clean` command: interactively delete unused manifests.

use std::sync::Arc;

use acr_sweep_core::error::Result as SweepResult;
use acr_sweep_runtime::{Analysis, DeletionMode, Operator};
use clap::{Args, ValueEnum};

use super::GlobalArgs;
use crate::output;
use crate::prompt::StdinOperator;

#[derive(Args)]
pub struct CleanArgs {
    /// Deletion mode; prompts when omitted
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Print the delete commands without running them
    Simulate,
    /// Permanently delete after typed confirmation
    Commit,
}

impl From<ModeArg> for DeletionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Simulate => DeletionMode::Simulate,
            ModeArg::Commit => DeletionMode::Commit,
        }
    }
}

/// Prints the analysis before delegating prompts to stdin.
struct Console {
    input: StdinOperator,
    threshold_days: u32,
}

impl Operator for Console {
    fn review(&self, analysis: &Analysis) {
        output::print_analysis(analysis, self.threshold_days);
        output::print_unused(analysis);
        output::print_protected(analysis, self.threshold_days);
        if analysis.is_degraded() && !analysis.unused.unused.is_empty() {
            println!("\nThe scan is incomplete; review the warnings above before deleting.");
        }
    }

    fn choose_mode(&self) -> SweepResult<String> {
        self.input.choose_mode()
    }

    fn confirm(&self, prompt: &str) -> SweepResult<bool> {
        self.input.confirm(prompt)
    }

    fn read_token(&self, prompt: &str) -> SweepResult<String> {
        self.input.read_token(prompt)
    }
}

pub async fn execute(global: &GlobalArgs, args: CleanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = global.resolve_config()?;
    let console = Arc::new(Console {
        input: StdinOperator::new(),
        threshold_days: config.threshold_days,
    });
    let sweep = super::connect(global, config).await?;

    let report = sweep
        .run(
            console,
            args.mode.map(DeletionMode::from),
            super::cancel_on_interrupt(),
        )
        .await?;

    if let Some(ref execution) = report.execution {
        output::print_execution(execution);
    }
    output::print_run_summary(&report);
    super::exit_if_interrupted(&report);
    Ok(())
}

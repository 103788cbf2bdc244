//! Terminal prompts for the deletion confirmations.

use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

use acr_sweep_core::error::Result;
use acr_sweep_runtime::executor::is_affirmative;
use acr_sweep_runtime::Operator;

/// Operator reading answers from a line-oriented input.
pub struct StdinOperator {
    input: Mutex<Box<dyn BufRead + Send>>,
}

impl StdinOperator {
    /// Operator bound to the process's standard input.
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(std::io::stdin()))
    }

    pub fn from_reader(input: impl BufRead + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
        }
    }

    fn ask(&self, prompt: &str) -> Result<String> {
        print!("{prompt}");
        std::io::stdout().flush()?;

        let mut line = String::new();
        let mut input = self
            .input
            .lock()
            .map_err(|_| std::io::Error::other("input lock poisoned"))?;
        input.read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Default for StdinOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for StdinOperator {
    fn choose_mode(&self) -> Result<String> {
        println!();
        println!("Select deletion mode:");
        println!("  1) Simulate - list the deletions that would be made");
        println!("  2) Commit   - permanently delete the manifests");
        self.ask("Enter choice [1/2]: ")
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        println!();
        println!("WARNING: deleted manifests cannot be recovered.");
        let answer = self.ask(&format!("{prompt} [y/N] "))?;
        Ok(is_affirmative(&answer))
    }

    fn read_token(&self, prompt: &str) -> Result<String> {
        self.ask(&format!("{prompt}: "))
    }
}

//! Interactive operator prompt adapter.

use ringvault_ports::PromptPort;
use ringvault_shared::{ErrorEnvelope, Result};
use std::io::{BufRead, Write};

/// Terminal Y/n prompt on stdin/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompt;

impl PromptPort for StdinPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{message} [Y/n] ").map_err(ErrorEnvelope::from)?;
        stderr.flush().map_err(ErrorEnvelope::from)?;

        let mut answer = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .map_err(ErrorEnvelope::from)?;
        Ok(matches!(answer.trim(), "" | "y" | "Y"))
    }
}

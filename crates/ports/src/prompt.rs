//! Operator confirmation boundary contract.

use ringvault_shared::Result;

/// Boundary contract for interactive Y/n confirmation before
/// destructive steps.
pub trait PromptPort: Send + Sync {
    /// Ask the operator to confirm; `false` aborts the operation.
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// A prompt that always answers yes (for `-y` / non-interactive runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassPrompt;

impl PromptPort for BypassPrompt {
    fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(true)
    }
}

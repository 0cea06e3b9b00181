//! Cancel command implementation.

use anyhow::{Result, bail};
use colored::Colorize;
use foresight_orchestrator::CancelOutcome;
use foresight_training::SessionId;

use super::Context;

/// Marks a running session CANCELLED. The owning worker stops at its next
/// boundary.
pub fn execute(ctx: &Context, session_id: &str) -> Result<()> {
    let orchestrator = ctx.persistent_orchestrator()?;
    let session_id = SessionId::from(session_id);
    match orchestrator.cancel(&session_id)? {
        CancelOutcome::Cancelled => {
            println!("{} Cancellation requested for {}", "✓".green(), session_id.to_string().cyan());
            Ok(())
        }
        CancelOutcome::NotFound => bail!("training session {session_id} not found"),
        CancelOutcome::NotInProgress(status) => {
            bail!("training session {session_id} is {status}, not IN_PROGRESS")
        }
    }
}

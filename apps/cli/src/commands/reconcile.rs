//! Reconcile command implementation.

use anyhow::Result;
use colored::Colorize;

use super::Context;

/// Runs one supervisory sweep over the session database.
///
/// IN_PROGRESS sessions whose record has not been written for
/// `orchestrator.stale_after_secs` are marked FAILED, and sessions past the
/// training timeout are cancelled.
pub fn execute(ctx: &Context, json_output: bool) -> Result<()> {
    let orchestrator = ctx.persistent_orchestrator()?;
    let report = orchestrator.reconcile()?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_empty() {
        println!("{}", "Nothing to reconcile.".dimmed());
        return Ok(());
    }
    for id in &report.orphaned {
        println!("  {} {} (worker lost)", "failed".red(), id);
    }
    for id in &report.timed_out {
        println!("  {} {} (timed out)", "cancelled".yellow(), id);
    }
    Ok(())
}

//! Session listing and maintenance commands.

use anyhow::Result;
use chrono::{Duration, Utc};
use colored::Colorize;
use foresight_training::TrainingSession;

use super::Context;
use super::status::colored_status;
use super::types::CleanupArgs;

/// Lists IN_PROGRESS sessions, oldest first.
pub fn active(ctx: &Context, json_output: bool) -> Result<()> {
    let orchestrator = ctx.persistent_orchestrator()?;
    let sessions = orchestrator.list_active()?;
    print_sessions("Active Training Sessions", &sessions, json_output)
}

/// Lists every stored session, newest first.
pub fn list(ctx: &Context, json_output: bool) -> Result<()> {
    let sessions = ctx.sqlite_store()?.list_all()?;
    print_sessions("Training Sessions", &sessions, json_output)
}

/// Deletes finished sessions older than the given age.
pub fn cleanup(ctx: &Context, args: &CleanupArgs) -> Result<()> {
    let cutoff = Utc::now() - Duration::days(i64::from(args.older_than_days));
    let removed = ctx.sqlite_store()?.purge_finished_before(cutoff)?;
    println!("Cleaned up {removed} old training sessions.");
    Ok(())
}

fn print_sessions(title: &str, sessions: &[TrainingSession], json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(sessions)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("{title} ({})", sessions.len()).bold().cyan());
    println!();
    if sessions.is_empty() {
        println!("  {}", "No training sessions found.".dimmed());
        println!();
        return Ok(());
    }

    println!("{:<38} {:<10} {:<9} {:<12} {}", "Session", "Ticker", "Model", "Status", "Created");
    println!("{}", "─".repeat(90));
    for session in sessions {
        println!(
            "{:<38} {:<10} {:<9} {:<12} {}",
            session.session_id.to_string().cyan(),
            session.spec.ticker,
            session.spec.model_type.as_str(),
            colored_status(session.status),
            session.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    println!();
    Ok(())
}

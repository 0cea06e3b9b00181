//! Status command implementation.

use anyhow::{Result, bail};
use colored::Colorize;
use foresight_orchestrator::StatusSnapshot;
use foresight_training::{SessionId, TrainingStatus};

use super::Context;

/// Shows the stage, percentage and persisted fields of one session.
pub fn execute(ctx: &Context, session_id: &str, json_output: bool) -> Result<()> {
    let orchestrator = ctx.persistent_orchestrator()?;
    let session_id = SessionId::from(session_id);
    let Some(snapshot) = orchestrator.status(&session_id)? else {
        bail!("training session {session_id} not found");
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_human(&snapshot);
    }
    Ok(())
}

pub(crate) fn colored_status(status: TrainingStatus) -> colored::ColoredString {
    match status {
        TrainingStatus::Completed => status.as_str().green(),
        TrainingStatus::Failed => status.as_str().red(),
        TrainingStatus::Cancelled => status.as_str().dimmed(),
        TrainingStatus::InProgress | TrainingStatus::Pending => status.as_str().yellow(),
    }
}

fn print_human(snapshot: &StatusSnapshot) {
    let session = &snapshot.session;
    println!();
    println!("{}", format!("Training Session {}", snapshot.session_id).bold().cyan());
    println!();
    println!("  Status:   {}", colored_status(snapshot.status));
    println!("  Stage:    {} ({}%)", snapshot.stage, snapshot.percentage);
    println!(
        "  Job:      {} {} {}..{} ({} epochs)",
        session.spec.ticker,
        session.spec.model_type,
        session.spec.start_date,
        session.spec.end_date,
        session.spec.epochs
    );
    println!("  Created:  {}", session.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(started) = session.started_at {
        println!("  Started:  {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(completed) = session.completed_at {
        println!("  Finished: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(progress) = &session.progress {
        println!(
            "  Epoch:    {}/{} (accuracy {:.4}, loss {:.4})",
            progress.epoch, progress.total_epochs, progress.accuracy, progress.loss
        );
    }
    if let Some(metrics) = &session.metrics {
        println!("  Accuracy: {:.4}", metrics.accuracy);
        println!("  Loss:     {:.4}", metrics.loss);
        let extra = [("R2", metrics.r2), ("MAE", metrics.mae), ("RMSE", metrics.rmse), ("MAPE", metrics.mape)];
        for (name, value) in extra {
            if let Some(value) = value {
                println!("  {:<9} {:.4}", format!("{name}:"), value);
            }
        }
    }
    if let Some(error) = &session.error {
        println!("  Error:    {}", error.red());
    }
    println!();
}

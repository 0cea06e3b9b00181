//! Train command implementation.

use anyhow::{Result, bail};
use foresight_orchestrator::CancelOutcome;
use foresight_training::{SessionId, event_names};
use tracing::{info, warn};

use super::Context;
use super::types::TrainArgs;

/// Starts the job and prints each event as a JSON line until a terminal one.
pub async fn execute(ctx: &Context, args: TrainArgs) -> Result<()> {
    let orchestrator = ctx.orchestrator(&args.data_dir)?;
    let session_id = args.session_id.clone().map_or_else(SessionId::generate, SessionId::from);

    // Subscribe first so no event is missed.
    let (_handle, mut events) = orchestrator.watch(&session_id);
    let receipt = orchestrator.start(session_id.clone(), args.spec())?;
    info!(session_id = %session_id, "training_submitted");

    let mut terminal = None;
    let mut interrupted = false;
    while terminal.is_none() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
                if event.is_terminal() {
                    terminal = Some(event.event);
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                match orchestrator.cancel(&session_id)? {
                    CancelOutcome::Cancelled => info!(session_id = %session_id, "training_cancel_requested"),
                    other => warn!(session_id = %session_id, outcome = ?other, "training_cancel_ignored"),
                }
            }
        }
    }
    receipt.handle.join().await;

    match terminal.as_deref() {
        Some(event_names::TRAINING_COMPLETED) => Ok(()),
        Some(event_names::TRAINING_CANCELLED) => bail!("training session {session_id} was cancelled"),
        Some(_) => bail!("training session {session_id} failed"),
        None => bail!("event stream for {session_id} closed before the job finished"),
    }
}

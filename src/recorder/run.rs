use chrono::{DateTime, Utc};

use crate::{
    db::{DbResult, RecorderRepo},
    models::RecorderRun,
};

/// Open the run for this process.
///
/// Runs still open at this point were left behind by a process that did not
/// shut down cleanly; they are closed first and flagged `closed_incorrect`.
pub async fn begin_run(repo: &dyn RecorderRepo, now: DateTime<Utc>) -> DbResult<RecorderRun> {
    let closed = repo.close_open_runs(now).await?;
    if closed > 0 {
        tracing::warn!(closed, "Closed recorder runs left open by an unclean shutdown");
    }

    let run = repo.start_run(now).await?;
    tracing::info!(run_id = run.run_id, start = %run.start, "Recorder run started");
    Ok(run)
}

/// Close the run on clean shutdown.
pub async fn finish_run(repo: &dyn RecorderRepo, run: &RecorderRun, now: DateTime<Utc>) -> DbResult<()> {
    repo.end_run(run.run_id, now).await?;
    tracing::info!(run_id = run.run_id, "Recorder run ended");
    Ok(())
}

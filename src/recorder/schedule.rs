//! Periodic purge scheduling.

use chrono::{DateTime, Datelike, Utc, Weekday};
use tokio::time::MissedTickBehavior;

use super::{
    services::keep_days_cutoff,
    task::{PurgeTask, RecorderTask, TaskQueue},
};
use crate::config::PurgeConfig;

/// Queue a purge every `interval_hours`, the first one interval after start.
///
/// Skips a tick while an earlier purge is still pending. Runs until the queue
/// closes or the task is aborted.
pub(crate) async fn run_auto_purge(queue: TaskQueue, config: PurgeConfig) {
    if !config.auto_purge {
        tracing::info!("Auto purge disabled by configuration");
        return;
    }

    tracing::info!(
        keep_days = config.keep_days,
        interval_hours = config.interval_hours,
        auto_repack = config.auto_repack,
        "Starting auto purge"
    );

    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if queue.pending_purges() > 0 {
            tracing::debug!("Previous purge still pending, skipping auto purge");
            continue;
        }

        let task = scheduled_task(&config, Utc::now());
        tracing::debug!(cutoff = %task.cutoff, repack = task.repack, "Queueing auto purge");
        if queue.enqueue(RecorderTask::Purge(task)).is_err() {
            tracing::debug!("Recorder queue closed, stopping auto purge");
            return;
        }
    }
}

fn scheduled_task(config: &PurgeConfig, now: DateTime<Utc>) -> PurgeTask {
    let cutoff = keep_days_cutoff(now, i64::from(config.keep_days));
    let repack = config.auto_repack && is_second_sunday(now);
    PurgeTask::new(cutoff, repack, false)
}

/// Auto repack runs once a month.
fn is_second_sunday(date: DateTime<Utc>) -> bool {
    date.weekday() == Weekday::Sun && (8..=14).contains(&date.day())
}

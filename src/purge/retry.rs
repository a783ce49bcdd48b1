use std::{future::Future, time::Duration};

use crate::{
    config::PurgeConfig,
    db::{DbError, DbResult},
    events::PurgeKind,
    observability::metrics,
};

/// How transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the retried task is enqueued again.
    pub wait: Duration,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &PurgeConfig) -> Self {
        Self {
            wait: config.retry_wait(),
            max_retries: config.max_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PurgeConfig::default())
    }
}

/// Classified result of one purge attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Transient error with retries left. Run the same task again after
    /// [`RetryPolicy::wait`].
    Retry(DbError),
    /// Abandon the task.
    Fatal(DbError),
    /// The store is damaged; retrying cannot help.
    Corruption(DbError),
}

/// Await one attempt and classify its result.
///
/// `attempt` counts from 0 for the first try.
pub async fn run_attempt<T, F>(
    kind: PurgeKind,
    attempt: u32,
    policy: &RetryPolicy,
    fut: F,
) -> AttemptOutcome<T>
where
    F: Future<Output = DbResult<T>>,
{
    match fut.await {
        Ok(value) => AttemptOutcome::Success(value),
        Err(e) if e.is_corruption() => {
            tracing::error!(kind = kind.as_str(), error = %e, "Database corruption detected during purge");
            metrics::record_purge_run(kind.as_str(), "corrupted");
            AttemptOutcome::Corruption(e)
        }
        Err(e) if e.is_transient() && attempt < policy.max_retries => {
            tracing::warn!(
                kind = kind.as_str(),
                attempt = attempt + 1,
                max_retries = policy.max_retries,
                retry_in_secs = policy.wait.as_secs_f64(),
                error = %e,
                "{} not completed, retrying",
                label(kind)
            );
            metrics::record_purge_retry(kind.as_str());
            metrics::record_purge_run(kind.as_str(), "retry");
            AttemptOutcome::Retry(e)
        }
        Err(e) => {
            if e.is_transient() {
                tracing::error!(
                    kind = kind.as_str(),
                    attempts = attempt + 1,
                    "Giving up on purge after repeated transient errors"
                );
            }
            tracing::error!(kind = kind.as_str(), error = %e, "Error executing purge");
            metrics::record_purge_run(kind.as_str(), "failed");
            AttemptOutcome::Fatal(e)
        }
    }
}

fn label(kind: PurgeKind) -> &'static str {
    match kind {
        PurgeKind::OldData => "Purge",
        PurgeKind::Entities => "Purge entities",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            wait: Duration::ZERO,
            max_retries,
        }
    }

    #[tokio::test]
    async fn test_success() {
        let outcome = run_attempt(PurgeKind::OldData, 0, &policy(3), async { Ok(5) }).await;
        assert!(matches!(outcome, AttemptOutcome::Success(5)));
    }

    #[tokio::test]
    async fn test_transient_error_retries() {
        let outcome = run_attempt::<(), _>(PurgeKind::OldData, 0, &policy(3), async {
            Err(DbError::Transient("database is locked".into()))
        })
        .await;
        assert!(matches!(outcome, AttemptOutcome::Retry(_)));
    }

    #[tokio::test]
    async fn test_transient_error_after_last_retry_is_fatal() {
        let outcome = run_attempt::<(), _>(PurgeKind::Entities, 3, &policy(3), async {
            Err(DbError::Transient("database is locked".into()))
        })
        .await;
        assert!(matches!(outcome, AttemptOutcome::Fatal(_)));
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let outcome = run_attempt::<(), _>(PurgeKind::OldData, 0, &policy(3), async {
            Err(DbError::Internal("no such table: states".into()))
        })
        .await;
        assert!(matches!(outcome, AttemptOutcome::Fatal(_)));
    }

    #[tokio::test]
    async fn test_corruption_is_never_retried() {
        let outcome = run_attempt::<(), _>(PurgeKind::OldData, 0, &policy(3), async {
            Err(DbError::Corruption("database disk image is malformed".into()))
        })
        .await;
        assert!(matches!(outcome, AttemptOutcome::Corruption(_)));
    }

    #[test]
    fn test_policy_from_config() {
        let config = PurgeConfig {
            retry_wait_secs: 7,
            max_retries: 2,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.wait, Duration::from_secs(7));
        assert_eq!(policy.max_retries, 2);
    }
}

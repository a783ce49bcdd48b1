use crate::db::{Backend, PurgeRepo};

/// Compact the database after a finished purge.
///
/// Failures are logged and reported as `false`; a repack is never retried.
pub async fn repack_database(repo: &dyn PurgeRepo, backend: Backend) -> bool {
    tracing::info!(backend = %backend, "Vacuuming SQL DB to free space");
    let started = std::time::Instant::now();

    match repo.repack().await {
        Ok(()) => {
            tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Repack complete");
            true
        }
        Err(e) => {
            tracing::error!(backend = %backend, error = %e, "Error repacking database");
            false
        }
    }
}

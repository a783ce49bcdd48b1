use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

/// Sidecar files SQLite keeps next to the main database in WAL mode.
const SQLITE_SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm"];

/// Path a corrupt database at `path` is moved to.
pub fn quarantine_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    append_to_path(
        path,
        &format!(".corrupt.{}", now.format("%Y%m%dT%H%M%S%.6fZ")),
    )
}

/// Move a corrupt SQLite database and its sidecar files out of the way.
///
/// Returns the new location of the main file, or `None` when there was no
/// file to move. Nothing is deleted.
pub fn quarantine_database_file(path: &Path, now: DateTime<Utc>) -> io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let target = quarantine_path(path, now);
    move_database_file(path, &target)?;
    Ok(Some(target))
}

/// Path a replacement database is built at before it is swapped in.
pub fn staging_path(path: &Path) -> PathBuf {
    append_to_path(path, ".rebuild")
}

/// Remove a database file and its sidecars. Missing files are ignored.
pub fn remove_database_file(path: &Path) -> io::Result<()> {
    let sidecars = SQLITE_SIDECAR_SUFFIXES
        .iter()
        .map(|suffix| append_to_path(path, suffix));
    for file in std::iter::once(path.to_path_buf()).chain(sidecars) {
        match std::fs::remove_file(&file) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    Ok(())
}

/// Quarantine the database at `path` and move the staged one into its place.
///
/// If the staged file cannot be moved, the quarantined file is moved back so
/// `path` still holds the original database.
pub fn swap_in_staged_database(
    path: &Path,
    staged: &Path,
    now: DateTime<Utc>,
) -> io::Result<Option<PathBuf>> {
    let moved_to = quarantine_database_file(path, now)?;
    if let Err(e) = move_database_file(staged, path) {
        if let Some(moved_to) = &moved_to
            && let Err(restore) = move_database_file(moved_to, path)
        {
            tracing::error!(
                error = %restore,
                moved_to = %moved_to.display(),
                "Failed to restore quarantined database"
            );
        }
        return Err(e);
    }
    Ok(moved_to)
}

fn move_database_file(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::rename(from, to)?;
    for suffix in SQLITE_SIDECAR_SUFFIXES {
        let sidecar = append_to_path(from, suffix);
        if sidecar.exists() {
            std::fs::rename(&sidecar, append_to_path(to, suffix))?;
        }
    }
    Ok(())
}

fn append_to_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

//! Decides whether a storage directory still needs cluster initialisation.

use std::fs::{self, DirBuilder};
use std::io;
use std::path::Path;

use tracing::{info, warn};

use crate::error::ServerError;

const STORAGE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::storage");

/// Marker file `initdb` writes at the root of every cluster.
pub(crate) const CLUSTER_VERSION_FILE: &str = "PG_VERSION";

/// Whether a storage directory holds a cluster yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    /// The directory is empty (or was just created).
    NeedsInitialisation,
    /// The directory already has content; it is assumed to be a cluster.
    Initialised,
}

/// Inspects `path`, creating it when absent.
///
/// Cluster integrity and server-version compatibility are not validated: a
/// non-empty directory is trusted to hold a usable cluster.
pub fn inspect_storage(path: &Path) -> Result<StorageState, ServerError> {
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            create_storage(path)?;
            info!(
                target: STORAGE_TARGET,
                path = %path.display(),
                "created storage directory"
            );
            return Ok(StorageState::NeedsInitialisation);
        }
        Err(_) if path.exists() && !path.is_dir() => {
            return Err(ServerError::StorageNotDirectory {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(ServerError::InspectStorage {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if entries.next().is_none() {
        info!(
            target: STORAGE_TARGET,
            path = %path.display(),
            "storage directory is empty"
        );
        return Ok(StorageState::NeedsInitialisation);
    }
    if !path.join(CLUSTER_VERSION_FILE).is_file() {
        warn!(
            target: STORAGE_TARGET,
            path = %path.display(),
            "storage directory has content but no {CLUSTER_VERSION_FILE}; using it as-is"
        );
    }
    info!(
        target: STORAGE_TARGET,
        path = %path.display(),
        "reusing existing cluster"
    );
    Ok(StorageState::Initialised)
}

fn create_storage(path: &Path) -> Result<(), ServerError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        // The server refuses data directories readable by other users.
        builder.mode(0o700);
    }
    builder
        .create(path)
        .map_err(|source| ServerError::CreateStorage {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn missing_directory_is_created_and_needs_initialisation() {
        let temp = TempDir::new().expect("create temp dir");
        let path = temp.path().join("nested").join("data");
        let state = inspect_storage(&path).expect("inspect missing path");
        assert_eq!(state, StorageState::NeedsInitialisation);
        assert!(path.is_dir(), "storage directory should be created");
    }

    #[cfg(unix)]
    #[test]
    fn created_directory_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("create temp dir");
        let path = temp.path().join("data");
        inspect_storage(&path).expect("inspect missing path");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o077, 0, "group/other bits should be clear: {mode:o}");
    }

    #[test]
    fn empty_directory_needs_initialisation() {
        let temp = TempDir::new().expect("create temp dir");
        let state = inspect_storage(temp.path()).expect("inspect empty dir");
        assert_eq!(state, StorageState::NeedsInitialisation);
    }

    #[test]
    fn populated_directory_is_initialised() {
        let temp = TempDir::new().expect("create temp dir");
        fs::write(temp.path().join(CLUSTER_VERSION_FILE), "16\n").expect("write marker");
        let state = inspect_storage(temp.path()).expect("inspect populated dir");
        assert_eq!(state, StorageState::Initialised);
    }

    #[test]
    fn populated_directory_without_marker_is_still_trusted() {
        let temp = TempDir::new().expect("create temp dir");
        fs::write(temp.path().join("leftover"), "x").expect("write file");
        let state = inspect_storage(temp.path()).expect("inspect populated dir");
        assert_eq!(state, StorageState::Initialised);
    }

    #[test]
    fn regular_file_is_a_configuration_error() {
        let temp = TempDir::new().expect("create temp dir");
        let path = temp.path().join("not-a-dir");
        fs::write(&path, "x").expect("write file");
        let error = inspect_storage(&path).expect_err("file should be rejected");
        assert!(
            matches!(error, ServerError::StorageNotDirectory { .. }),
            "unexpected error: {error:?}"
        );
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }
}

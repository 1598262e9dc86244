//! Allocates the storage and communication directories of an instance.
//!
//! Directories created here are owned by the instance and removed during
//! teardown. A storage directory supplied by the caller is never removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ServerError;
use crate::storage::{StorageState, inspect_storage};

const PATHS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::paths");
const STORAGE_PREFIX: &str = "pgserver-data-";
const SOCKET_PREFIX: &str = "pgserver-socket-";

/// A uniquely named directory created by this crate.
///
/// Uniqueness comes from `mkdtemp(3)` semantics, so concurrent allocations
/// from several processes never collide. [`OwnedDir::remove`] consumes the
/// value, so a directory is deleted at most once.
#[derive(Debug)]
pub struct OwnedDir {
    path: PathBuf,
}

impl OwnedDir {
    pub(crate) fn allocate(prefix: &str, purpose: &'static str) -> Result<Self, ServerError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|source| ServerError::AllocateDirectory { purpose, source })?;
        let path = dir.keep();
        debug!(
            target: PATHS_TARGET,
            purpose,
            path = %path.display(),
            "allocated directory"
        );
        Ok(Self { path })
    }

    /// Location of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the directory tree. A tree that is already gone counts as
    /// removed.
    pub(crate) fn remove(self) -> Result<(), (PathBuf, io::Error)> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                info!(
                    target: PATHS_TARGET,
                    path = %self.path.display(),
                    "removed owned directory"
                );
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err((self.path, error)),
        }
    }
}

/// Where an instance keeps its cluster.
#[derive(Debug)]
pub enum StorageDir {
    /// Supplied by the caller; left in place on teardown.
    Supplied(PathBuf),
    /// Allocated for this instance; removed on teardown.
    Owned(OwnedDir),
}

impl StorageDir {
    /// Location of the storage directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Supplied(path) => path,
            Self::Owned(dir) => dir.path(),
        }
    }

    /// Returns `true` when teardown removes this directory.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    fn into_owned(self) -> Option<OwnedDir> {
        match self {
            Self::Supplied(_) => None,
            Self::Owned(dir) => Some(dir),
        }
    }
}

/// The pair of directories backing one instance.
#[derive(Debug)]
pub(crate) struct InstanceDirs {
    storage: StorageDir,
    socket: OwnedDir,
}

impl InstanceDirs {
    /// Resolves the storage directory and allocates a fresh communication
    /// directory.
    pub(crate) fn prepare(supplied: Option<&Path>) -> Result<(Self, StorageState), ServerError> {
        let (storage, state) = match supplied {
            Some(path) => {
                let state = inspect_storage(path)?;
                (StorageDir::Supplied(path.to_path_buf()), state)
            }
            None => {
                let dir = OwnedDir::allocate(STORAGE_PREFIX, "storage")?;
                (StorageDir::Owned(dir), StorageState::NeedsInitialisation)
            }
        };
        let socket = OwnedDir::allocate(SOCKET_PREFIX, "socket")?;
        Ok((Self { storage, socket }, state))
    }

    pub(crate) fn storage(&self) -> &StorageDir {
        &self.storage
    }

    pub(crate) fn socket_path(&self) -> &Path {
        self.socket.path()
    }

    /// Removes every owned directory, communication directory first.
    ///
    /// Must only run once the server process has exited.
    pub(crate) fn remove_owned(self) -> Vec<(PathBuf, io::Error)> {
        let mut failures = Vec::new();
        if let Err(failure) = self.socket.remove() {
            failures.push(failure);
        }
        if let Some(storage) = self.storage.into_owned()
            && let Err(failure) = storage.remove()
        {
            failures.push(failure);
        }
        failures
    }
}

//! The on-disk layout under the archive's file root, and the atomic publish
//! step that swaps a freshly built index into place.

use crate::error::Error;
use crate::logfiles::FileKey;
use std::path::{Path, PathBuf};

const INDEX_FILE_NAME: &str = "zarchive.frozen";

/// Owns every path the archive touches. Directories are created up front so
/// the rest of the code never has to think about it.
#[derive(Clone, Debug)]
pub struct ArchivePaths {
    root: PathBuf,
    logged_dir: PathBuf,
    unlogged_dir: PathBuf,
    index_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl ArchivePaths {
    pub fn new(root: impl Into<PathBuf>) -> Result<ArchivePaths, Error> {
        let root = root.into();
        let paths = ArchivePaths {
            logged_dir: root.join("logged"),
            unlogged_dir: root.join("unlogged"),
            index_dir: root.join("index"),
            scratch_dir: root.join("scratch"),
            root,
        };
        for dir in [
            &paths.root,
            &paths.logged_dir,
            &paths.unlogged_dir,
            &paths.index_dir,
            &paths.scratch_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| (e, file!(), line!()))?;
        }
        Ok(paths)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory holding one tree's plaintext logs.
    pub fn log_dir(&self, logged: bool) -> &Path {
        if logged {
            &self.logged_dir
        } else {
            &self.unlogged_dir
        }
    }

    pub fn plaintext_path(&self, key: FileKey) -> PathBuf {
        self.log_dir(key.logged()).join(key.file_name())
    }

    /// The live frozen index.
    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join(INDEX_FILE_NAME)
    }

    /// Where the builder writes before publishing.
    pub fn scratch_index_path(&self) -> PathBuf {
        self.scratch_dir.join(INDEX_FILE_NAME)
    }

    /// Removes any leftover build products.
    pub fn clear_scratch(&self) -> Result<(), Error> {
        let scratch = self.scratch_index_path();
        match std::fs::remove_file(&scratch) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err((e, file!(), line!()).into()),
        }
    }

    /// Atomically swaps the scratch index into the live location.
    pub fn publish_build(&self) -> Result<(), Error> {
        std::fs::rename(self.scratch_index_path(), self.index_path())
            .map_err(|e| (e, file!(), line!()))?;
        Ok(())
    }

    pub fn remove_plaintext(&self, key: FileKey) -> Result<(), Error> {
        std::fs::remove_file(self.plaintext_path(key)).map_err(|e| (e, file!(), line!()))?;
        Ok(())
    }
}

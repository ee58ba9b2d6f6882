//! Remote file store boundary.
//!
//! In the remote environment input CSVs are fetched from, and exported views
//! published to, a remote file store. Transport and authentication live
//! behind [`FileRelay`].

use std::path::{Path, PathBuf};

/// Moves files between the local working directories and the remote store.
pub trait FileRelay {
    /// Fetch `file_name` into `local_dir`, returning the local path.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote file can't be fetched.
    fn download(&mut self, file_name: &str, local_dir: &Path) -> anyhow::Result<PathBuf>;

    /// Publish a local file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be sent.
    fn upload(&mut self, local_path: &Path) -> anyhow::Result<()>;
}

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

/// The two process-lifetime scratch directories: originals awaiting
/// processing and processed artifacts awaiting upload or download.
///
/// File names are derived from globally unique image ids, so concurrent
/// operations never collide inside these directories.
#[derive(Debug, Clone)]
pub struct ScratchDirs {
    originals: PathBuf,
    processed: PathBuf,
    // Keeps temporary directories alive (and removes them on drop).
    _guards: Arc<Vec<TempDir>>,
}

impl ScratchDirs {
    /// Create fresh `images*` / `processed*` temporary directories under `root`.
    /// They are removed when the last clone is dropped.
    pub fn create_in(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let originals = tempfile::Builder::new().prefix("images").tempdir_in(root)?;
        let processed = tempfile::Builder::new()
            .prefix("processed")
            .tempdir_in(root)?;

        Ok(Self {
            originals: originals.path().to_path_buf(),
            processed: processed.path().to_path_buf(),
            _guards: Arc::new(vec![originals, processed]),
        })
    }

    /// Use existing directories, creating them if needed. Nothing is removed on drop.
    pub fn at(originals: impl Into<PathBuf>, processed: impl Into<PathBuf>) -> io::Result<Self> {
        let originals = originals.into();
        let processed = processed.into();
        std::fs::create_dir_all(&originals)?;
        std::fs::create_dir_all(&processed)?;

        Ok(Self {
            originals,
            processed,
            _guards: Arc::new(Vec::new()),
        })
    }

    pub fn originals_dir(&self) -> &Path {
        &self.originals
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed
    }

    pub fn original_path(&self, file_name: &str) -> PathBuf {
        self.originals.join(file_name)
    }

    pub fn processed_path(&self, file_name: &str) -> PathBuf {
        self.processed.join(file_name)
    }

    /// A fresh, uniquely named empty file in the processed directory for one
    /// retrieval. Concurrent retrievals of the same image never share a file,
    /// and none of them touch the worker's deterministic processed path.
    pub fn retrieval_path(&self, file_name: &str) -> io::Result<PathBuf> {
        let path = tempfile::Builder::new()
            .prefix("download-")
            .suffix(&format!("-{file_name}"))
            .tempfile_in(&self.processed)?
            .into_temp_path()
            .keep()?;
        Ok(path)
    }

    pub async fn write_original(&self, file_name: &str, data: &[u8]) -> io::Result<PathBuf> {
        let path = self.original_path(file_name);
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// Create an empty file at the processed path, truncating any leftover.
    pub async fn create_processed_placeholder(&self, file_name: &str) -> io::Result<PathBuf> {
        let path = self.processed_path(file_name);
        tokio::fs::File::create(&path).await?;
        Ok(path)
    }
}

/// Remove a scratch file. A file that is already gone counts as removed.
pub async fn remove_scratch_file(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

//! Staging of transient helper artifacts.
//!
//! Each transport call that hands a payload to a helper materializes one
//! small file, named with a timestamp-based identifier, and deletes it
//! immediately after use — on both the success and failure paths (the
//! [`StagedFile`] drop guard covers early returns).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use synapse_core::Result;
use tracing::debug;

/// Directory where transient helper files live.
pub struct StagingArea {
    root: PathBuf,
    counter: AtomicU64,
}

impl StagingArea {
    /// Open (creating if needed) a staging area at `root`, or under the OS
    /// temp dir when `root` is `None`.
    pub fn new(root: Option<PathBuf>) -> Result<Self> {
        let root = root.unwrap_or_else(|| std::env::temp_dir().join("synapse-helpers"));
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            counter: AtomicU64::new(0),
        })
    }

    /// The staging directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `contents` to a fresh timestamp-named file.
    ///
    /// The counter suffix disambiguates calls within one millisecond.
    pub fn stage(&self, prefix: &str, contents: &str) -> Result<StagedFile> {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.root.join(format!("{prefix}-{stamp}-{n}.json"));
        std::fs::write(&path, contents)?;
        debug!(path = %path.display(), "staged helper artifact");
        Ok(StagedFile {
            path,
            removed: false,
        })
    }
}

/// A staged artifact, removed on [`StagedFile::remove`] or at drop.
pub struct StagedFile {
    path: PathBuf,
    removed: bool,
}

impl StagedFile {
    /// Path handed to the helper.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the artifact now.
    pub fn remove(mut self) {
        self.remove_inner();
    }

    fn remove_inner(&mut self) {
        if !self.removed {
            self.removed = true;
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), error = %e, "failed to remove staged artifact");
            }
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        self.remove_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_writes_and_remove_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(Some(dir.path().to_path_buf())).unwrap();
        let staged = area.stage("notify-post", r#"{"x":1}"#).unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"x":1}"#);
        staged.remove();
        assert!(!path.exists());
    }

    #[test]
    fn drop_cleans_up_on_failure_paths() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(Some(dir.path().to_path_buf())).unwrap();
        let path = {
            let staged = area.stage("native-publish", "{}").unwrap();
            staged.path().to_path_buf()
            // staged dropped here without an explicit remove
        };
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_stages_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(Some(dir.path().to_path_buf())).unwrap();
        let a = area.stage("p", "1").unwrap();
        let b = area.stage("p", "2").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn default_root_is_under_temp_dir() {
        let area = StagingArea::new(None).unwrap();
        assert!(area.root().starts_with(std::env::temp_dir()));
    }
}

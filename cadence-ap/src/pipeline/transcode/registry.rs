//! Process-wide registry of transcoded temp files
//!
//! Every file the transcoder may write is allocated here first. The set is
//! kept for the lifetime of the process so a shutdown sweep can delete
//! whatever is left. Deletion is idempotent: a file that is already gone is
//! not an error.

use cadence_common::TrackId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared handle to the temp-file registry
///
/// Cheap to clone; all clones see the same set.
#[derive(Clone)]
pub struct TempFileRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    dir: PathBuf,
    prefix: String,
    files: Mutex<HashSet<PathBuf>>,
    sequence: AtomicU64,
}

impl TempFileRegistry {
    /// Registry placing files in `dir`, named `<prefix>-...`
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                dir: dir.into(),
                prefix: prefix.into(),
                files: Mutex::new(HashSet::new()),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Reserve a unique output path for a track and register it.
    ///
    /// Name: `<prefix>-<track id>-<unix millis>-<sequence>.wav`. The
    /// sequence number keeps names unique even within one millisecond.
    pub fn allocate(&self, track_id: &TrackId) -> PathBuf {
        let millis = chrono::Utc::now().timestamp_millis();
        let seq = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}-{}-{}-{}.wav",
            self.inner.prefix,
            sanitize(track_id.as_str()),
            millis,
            seq
        );
        let path = self.inner.dir.join(name);

        self.inner.files.lock().insert(path.clone());
        debug!(track_id = %track_id, path = %path.display(), "Allocated temp file");
        path
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.files.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.inner.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete a registered file.
    ///
    /// Returns `true` when a file was actually removed from disk. Paths the
    /// registry never handed out are left alone.
    pub fn remove(&self, path: &Path) -> bool {
        if !self.contains(path) {
            debug!(path = %path.display(), "Not deleting unregistered file");
            return false;
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                self.inner.files.lock().remove(path);
                debug!(path = %path.display(), "Deleted temp file");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.inner.files.lock().remove(path);
                false
            }
            Err(e) => {
                // Stays registered so the shutdown sweep retries it
                warn!(path = %path.display(), error = %e, "Failed to delete temp file");
                false
            }
        }
    }

    /// Delete every registered file. Returns how many existed on disk.
    pub fn sweep(&self) -> usize {
        let paths: Vec<PathBuf> = self.inner.files.lock().iter().cloned().collect();
        let removed = paths.iter().filter(|path| self.remove(path)).count();
        info!(removed, remaining = self.len(), "Swept transcode temp files");
        removed
    }
}

/// Keep file names portable whatever the track id looks like
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "track".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_allocate_unique_names() {
        let dir = TempDir::new().unwrap();
        let registry = TempFileRegistry::new(dir.path(), "cadence");
        let id = TrackId::new("42");

        let a = registry.allocate(&id);
        let b = registry.allocate(&id);

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("cadence-42-"));
        assert!(name.ends_with(".wav"));
    }

    #[test]
    fn test_sanitize_track_id() {
        assert_eq!(sanitize("a/b c"), "a_b_c");
        assert_eq!(sanitize(""), "track");
        assert_eq!(sanitize("abc-DEF_1"), "abc-DEF_1");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = TempFileRegistry::new(dir.path(), "cadence");
        let path = registry.allocate(&TrackId::new("1"));
        std::fs::write(&path, b"RIFF").unwrap();

        assert!(registry.remove(&path));
        assert!(!path.exists());
        assert!(!registry.remove(&path));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_missing_file_unregisters() {
        let dir = TempDir::new().unwrap();
        let registry = TempFileRegistry::new(dir.path(), "cadence");
        let path = registry.allocate(&TrackId::new("1"));

        // Never written
        assert!(!registry.remove(&path));
        assert!(!registry.contains(&path));
    }

    #[test]
    fn test_unregistered_file_is_not_deleted() {
        let dir = TempDir::new().unwrap();
        let registry = TempFileRegistry::new(dir.path(), "cadence");
        let foreign = dir.path().join("user-file.wav");
        std::fs::write(&foreign, b"data").unwrap();

        assert!(!registry.remove(&foreign));
        assert!(foreign.exists());
    }

    #[test]
    fn test_sweep_deletes_everything() {
        let dir = TempDir::new().unwrap();
        let registry = TempFileRegistry::new(dir.path(), "cadence");
        for id in ["a", "b", "c"] {
            let path = registry.allocate(&TrackId::new(id));
            std::fs::write(&path, b"RIFF").unwrap();
        }
        // One allocation never produced a file
        registry.allocate(&TrackId::new("d"));

        assert_eq!(registry.sweep(), 3);
        assert!(registry.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let dir = TempDir::new().unwrap();
        let registry = TempFileRegistry::new(dir.path(), "cadence");
        let clone = registry.clone();

        let path = registry.allocate(&TrackId::new("x"));
        assert!(clone.contains(&path));
    }
}

use anyhow::{Context, Result};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File and directory utilities.
///
/// All pipeline output placement funnels through [`FileManager::persist`] so
/// that the cross-filesystem case (scratch on one mount, library on an SMB
/// or NFS share) is handled in exactly one place.

/// Media and subtitle extensions the service ingests
pub const MEDIA_EXTENSIONS: &[&str] = &["mkv", "srt", "ass"];

/// File operations utility
pub struct FileManager;

impl FileManager {
    /// Check file existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    /// Check directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    /// Create directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    /// Whether the path carries one of the ingestable extensions
    pub fn is_media_file<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                MEDIA_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }

    /// Find ingestable files under a directory.
    ///
    /// `recursive=false` inspects only the immediate children. Unreadable
    /// entries are skipped with a log line so one bad subdirectory cannot
    /// abort a scan.
    pub fn find_media_files<P: AsRef<Path>>(dir: P, recursive: bool) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(anyhow::anyhow!("Not a directory: {:?}", dir));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut result = Vec::new();
        for entry in WalkDir::new(dir).max_depth(max_depth).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", dir, e);
                    continue;
                }
            };
            if entry.file_type().is_file() && Self::is_media_file(entry.path()) {
                result.push(entry.path().to_path_buf());
            }
        }
        result.sort();
        Ok(result)
    }

    /// Expand a leading `~` to the user's home directory
    pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
        let path = path.as_ref();
        if let Ok(stripped) = path.strip_prefix("~") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        }
        path.to_path_buf()
    }

    /// Move a file onto its final destination.
    ///
    /// Tries an atomic rename first. When source and destination live on
    /// different mounts the rename fails (EXDEV-class); the move degrades to
    /// copy-then-unlink, which is required for SMB/NFS output directories.
    pub fn persist<P1: AsRef<Path>, P2: AsRef<Path>>(src: P1, dst: P2) -> Result<()> {
        let src = src.as_ref();
        let dst = dst.as_ref();

        if let Some(parent) = dst.parent() {
            Self::ensure_dir(parent)?;
        }

        match fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                fs::copy(src, dst).with_context(|| {
                    format!(
                        "Failed to move {:?} to {:?} (rename: {})",
                        src, dst, rename_err
                    )
                })?;
                if let Err(e) = fs::remove_file(src) {
                    warn!("Copied {:?} but could not remove source: {}", src, e);
                }
                Ok(())
            }
        }
    }

    /// Write file contents via a same-directory temp file and atomic rename
    pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Path has no parent directory: {:?}", path))?;
        Self::ensure_dir(parent)?;

        let temp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
        fs::write(temp.path(), contents)
            .with_context(|| format!("Failed to write temp file for {:?}", path))?;
        temp.persist(path)
            .with_context(|| format!("Failed to persist {:?}", path))?;
        Ok(())
    }

    /// Read a file to a string
    pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {:?}", path.as_ref()))
    }

    /// Canonical absolute form of a path, degrading to the input when the
    /// filesystem cannot resolve it (e.g. the file was just deleted)
    pub fn canonicalize_lossy<P: AsRef<Path>>(path: P) -> PathBuf {
        fs::canonicalize(path.as_ref()).unwrap_or_else(|_| path.as_ref().to_path_buf())
    }
}

/// Per-task working directory for intermediate files.
///
/// Every temp path a pipeline produces lives under its arena so terminal
/// cleanup is a single recursive delete.
#[derive(Debug, Clone)]
pub struct ScratchArena {
    root: PathBuf,
}

impl ScratchArena {
    /// Create (or reuse) the scratch directory for a task id
    pub fn create(scratch_root: &Path, task_id: i64) -> Result<Self> {
        let root = scratch_root.join(task_id.to_string());
        FileManager::ensure_dir(&root)?;
        Ok(Self { root })
    }

    /// The arena's root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A path inside the arena
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Whether the arena still exists on disk
    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    /// Remove the arena and everything in it
    pub fn release(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to remove scratch dir {:?}", self.root))?;
        }
        Ok(())
    }
}

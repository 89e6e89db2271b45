//! Atomic file writes
//!
//! Content is written to a temp file in the target's directory, synced, given
//! its final mode and then renamed over the target. Staging and committing are
//! separate steps so that two files can be prepared before either is replaced.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Mode for private files such as authorized-keys lists
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Mode for files meant to be shared through version control
pub const SHARED_FILE_MODE: u32 = 0o644;

/// Mode for directories holding private files
pub const PRIVATE_DIR_MODE: u32 = 0o700;

/// Mode for backup copies
pub const READ_ONLY_MODE: u32 = 0o400;

/// A fully written temp file waiting to replace its target
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the temp file over the target
    pub fn commit(self) -> io::Result<()> {
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Write `contents` to a temp file beside `target` without touching `target`
pub fn stage(target: &Path, contents: &[u8], mode: u32) -> io::Result<StagedWrite> {
    let mut temp = NamedTempFile::new_in(parent_dir(target))?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    set_mode(temp.path(), mode)?;
    Ok(StagedWrite {
        temp,
        target: target.to_path_buf(),
    })
}

/// Atomically replace `target` with `contents`
pub fn write_atomic(target: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    stage(target, contents, mode)?.commit()
}

/// Read a file, treating a missing file as `None`
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create a directory (and parents) with the given mode if it does not exist
pub fn ensure_dir(path: &Path, mode: u32) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)?;
    set_mode(path, mode)
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Permission bits of a file (always `None` off unix)
pub fn file_mode(path: &Path) -> io::Result<Option<u32>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(Some(fs::metadata(path)?.permissions().mode() & 0o777))
    }
    #[cfg(not(unix))]
    {
        fs::metadata(path)?;
        Ok(None)
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file");
        fs::write(&target, "old").unwrap();

        write_atomic(&target, b"new", PRIVATE_FILE_MODE).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_sets_mode() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("keys");

        write_atomic(&target, b"x", PRIVATE_FILE_MODE).unwrap();
        assert_eq!(file_mode(&target).unwrap(), Some(0o600));

        write_atomic(&target, b"y", SHARED_FILE_MODE).unwrap();
        assert_eq!(file_mode(&target).unwrap(), Some(0o644));
    }

    #[test]
    fn test_staged_write_leaves_target_until_commit() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file");
        fs::write(&target, "before").unwrap();

        let staged = stage(&target, b"after", PRIVATE_FILE_MODE).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "before");
        assert_eq!(staged.target(), target.as_path());

        staged.commit().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "after");
    }

    #[test]
    fn test_dropped_stage_cleans_up() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file");

        drop(stage(&target, b"abandoned", PRIVATE_FILE_MODE).unwrap());
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_onto_non_empty_directory_fails() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("blocked");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inner"), "x").unwrap();

        let staged = stage(&target, b"data", PRIVATE_FILE_MODE).unwrap();
        assert!(staged.commit().is_err());
        assert!(target.is_dir());
    }

    #[test]
    fn test_read_optional() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing");
        assert_eq!(read_optional(&path).unwrap(), None);

        fs::write(&path, "here").unwrap();
        assert_eq!(read_optional(&path).unwrap(), Some(b"here".to_vec()));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_dir_creates_with_mode() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join(".ssh");

        ensure_dir(&nested, PRIVATE_DIR_MODE).unwrap();
        assert!(nested.is_dir());
        assert_eq!(file_mode(&nested).unwrap(), Some(0o700));

        // Existing directories keep their mode
        set_mode(&nested, 0o755).unwrap();
        ensure_dir(&nested, PRIVATE_DIR_MODE).unwrap();
        assert_eq!(file_mode(&nested).unwrap(), Some(0o755));
    }
}

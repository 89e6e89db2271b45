//! System key manager
//!
//! Lists, renames and deletes key pairs in an ssh directory. A key is named
//! after its public file without the `.pub` suffix; the private file, when
//! present, has the bare name. The registry is never consulted or modified.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::keys::{FingerprintId, KeyParseError, fingerprint};

const PUBLIC_SUFFIX: &str = ".pub";

/// A key pair found in the ssh directory
#[derive(Debug, Clone)]
pub struct SystemKey {
    pub name: String,
    pub public_path: PathBuf,
    pub private_path: Option<PathBuf>,
    pub fingerprint: std::result::Result<FingerprintId, KeyParseError>,
}

impl SystemKey {
    pub fn has_private(&self) -> bool {
        self.private_path.is_some()
    }
}

/// Serializable view of a [`SystemKey`] for JSON output
#[derive(Debug, Clone, Serialize)]
pub struct SystemKeySummary {
    pub name: String,
    pub public_path: PathBuf,
    pub private_path: Option<PathBuf>,
    pub fingerprint: Option<FingerprintId>,
    pub error: Option<String>,
}

impl From<&SystemKey> for SystemKeySummary {
    fn from(key: &SystemKey) -> Self {
        let (fingerprint, error) = match &key.fingerprint {
            Ok(fp) => (Some(fp.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            name: key.name.clone(),
            public_path: key.public_path.clone(),
            private_path: key.private_path.clone(),
            fingerprint,
            error,
        }
    }
}

/// Proof that a deletion was prepared and shown to the user
///
/// Only [`SystemKeyManager::prepare_delete`] creates one.
#[derive(Debug)]
pub struct DeletionToken {
    name: String,
    files: Vec<PathBuf>,
}

impl DeletionToken {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Files that [`SystemKeyManager::delete`] will remove
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn includes_private(&self) -> bool {
        self.files
            .iter()
            .any(|f| !f.to_string_lossy().ends_with(PUBLIC_SUFFIX))
    }
}

/// Manages key files in one ssh directory
#[derive(Debug, Clone)]
pub struct SystemKeyManager {
    dir: PathBuf,
}

impl SystemKeyManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn public_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{PUBLIC_SUFFIX}"))
    }

    fn private_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Key pairs with a public file, sorted by name
    pub fn list(&self) -> Result<Vec<SystemKey>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(name) = file_name.strip_suffix(PUBLIC_SUFFIX) else {
                continue;
            };
            if name.is_empty() || !entry.file_type()?.is_file() {
                continue;
            }

            let public_path = entry.path();
            let private_path = Some(self.private_path(name)).filter(|p| p.is_file());
            let fingerprint = match fs::read_to_string(&public_path) {
                Ok(content) => fingerprint(&content),
                Err(e) => Err(KeyParseError::InvalidEncoding(e.to_string())),
            };
            keys.push(SystemKey {
                name: name.to_string(),
                public_path,
                private_path,
                fingerprint,
            });
        }
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    /// Map a name, file name or 1-based listing index to a key name
    pub fn resolve(&self, selector: &str) -> Result<String> {
        let name = selector.trim();
        let name = name.strip_suffix(PUBLIC_SUFFIX).unwrap_or(name);
        if validate_name(name).is_ok()
            && (self.public_path(name).is_file() || self.private_path(name).is_file())
        {
            return Ok(name.to_string());
        }

        if let Ok(index) = name.parse::<usize>() {
            let keys = self.list()?;
            if let Some(key) = index.checked_sub(1).and_then(|i| keys.get(i)) {
                return Ok(key.name.clone());
            }
        }

        Err(Error::SystemKeyNotFound(selector.to_string()))
    }

    /// Public key text of `name`
    pub fn read_public(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        let path = self.public_path(name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::SystemKeyNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rename a key pair without overwriting anything
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        validate_name(old)?;
        validate_name(new)?;

        let old_public = self.public_path(old);
        let old_private = self.private_path(old);
        let has_public = old_public.is_file();
        let has_private = old_private.is_file();
        if !has_public && !has_private {
            return Err(Error::SystemKeyNotFound(old.to_string()));
        }

        let new_public = self.public_path(new);
        let new_private = self.private_path(new);
        for taken in [&new_public, &new_private] {
            if taken.symlink_metadata().is_ok() {
                return Err(Error::NameCollision(file_label(taken)));
            }
        }

        let mut moves = Vec::new();
        if has_public {
            moves.push((old_public, new_public));
        }
        if has_private {
            moves.push((old_private, new_private));
        }
        move_all(&moves)?;

        info!(from = %old, to = %new, "System key renamed");
        Ok(())
    }

    /// Collect the files a deletion of `name` would remove
    pub fn prepare_delete(&self, name: &str) -> Result<DeletionToken> {
        validate_name(name)?;
        let files: Vec<PathBuf> = [self.public_path(name), self.private_path(name)]
            .into_iter()
            .filter(|p| p.is_file())
            .collect();
        if files.is_empty() {
            return Err(Error::SystemKeyNotFound(name.to_string()));
        }
        Ok(DeletionToken {
            name: name.to_string(),
            files,
        })
    }

    /// Remove the files listed in a prepared token
    pub fn delete(&self, token: DeletionToken) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for file in token.files {
            match fs::remove_file(&file) {
                Ok(()) => removed.push(file),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed.is_empty() {
            return Err(Error::SystemKeyNotFound(token.name));
        }
        info!(name = %token.name, files = removed.len(), "System key deleted");
        Ok(removed)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("key name cannot be empty".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::InvalidInput(format!(
            "key name '{}' must not contain path separators",
            name
        )));
    }
    if name.ends_with(PUBLIC_SUFFIX) {
        return Err(Error::InvalidInput(format!(
            "key name '{}' must be given without the .pub suffix",
            name
        )));
    }
    Ok(())
}

/// Move each file in order, undoing earlier moves if a later one fails
fn move_all(moves: &[(PathBuf, PathBuf)]) -> Result<()> {
    for (done, (from, to)) in moves.iter().enumerate() {
        if let Err(e) = move_no_clobber(from, to) {
            for (from, to) in moves[..done].iter().rev() {
                if let Err(undo) = move_no_clobber(to, from) {
                    warn!(error = %undo, file = %to.display(), "Failed to undo rename");
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Move a file, failing with `NameCollision` if the destination exists
fn move_no_clobber(from: &Path, to: &Path) -> Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            fs::remove_file(from)?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(Error::NameCollision(file_label(to)))
        }
        // Filesystems without hard links
        Err(_) if to.symlink_metadata().is_err() => {
            fs::rename(from, to)?;
            Ok(())
        }
        Err(_) => Err(Error::NameCollision(file_label(to))),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::key_line;
    use tempfile::TempDir;

    fn ssh_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("id_work.pub"), key_line(1, "work")).unwrap();
        fs::write(dir.path().join("id_work"), "PRIVATE WORK").unwrap();
        fs::write(dir.path().join("id_old.pub"), key_line(2, "old")).unwrap();
        fs::write(dir.path().join("config"), "Host *").unwrap();
        dir
    }

    #[test]
    fn test_list_pairs_public_and_private() {
        let dir = ssh_dir();
        fs::write(dir.path().join("broken.pub"), "nonsense").unwrap();
        let keys = SystemKeyManager::new(dir.path()).list().unwrap();

        let names: Vec<_> = keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["broken", "id_old", "id_work"]);
        assert!(keys[0].fingerprint.is_err());
        assert!(!keys[1].has_private());
        assert!(keys[2].has_private());
        assert_eq!(
            keys[2].fingerprint.as_ref().unwrap(),
            &crate::keys::fingerprint(&key_line(1, "work")).unwrap()
        );
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let manager = SystemKeyManager::new(dir.path().join("absent"));
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_rename_moves_both_files() {
        let dir = ssh_dir();
        let manager = SystemKeyManager::new(dir.path());

        manager.rename("id_work", "id_client").unwrap();
        assert!(dir.path().join("id_client.pub").is_file());
        assert_eq!(
            fs::read_to_string(dir.path().join("id_client")).unwrap(),
            "PRIVATE WORK"
        );
        assert!(!dir.path().join("id_work.pub").exists());
        assert!(!dir.path().join("id_work").exists());
    }

    #[test]
    fn test_rename_refuses_to_clobber() {
        let dir = ssh_dir();
        let manager = SystemKeyManager::new(dir.path());

        let err = manager.rename("id_work", "id_old").unwrap_err();
        assert!(matches!(err, Error::NameCollision(_)));
        assert_eq!(
            fs::read_to_string(dir.path().join("id_old.pub")).unwrap(),
            key_line(2, "old")
        );
        assert!(dir.path().join("id_work.pub").is_file());
        assert!(dir.path().join("id_work").is_file());
    }

    #[test]
    fn test_rename_blocked_by_stray_private_file() {
        let dir = ssh_dir();
        let manager = SystemKeyManager::new(dir.path());
        fs::write(dir.path().join("id_new"), "stray").unwrap();

        let err = manager.rename("id_work", "id_new").unwrap_err();
        assert!(matches!(err, Error::NameCollision(name) if name == "id_new"));
        assert!(dir.path().join("id_work.pub").is_file());
        assert!(!dir.path().join("id_new.pub").exists());
        assert_eq!(fs::read_to_string(dir.path().join("id_new")).unwrap(), "stray");
    }

    #[test]
    fn test_move_all_undoes_earlier_moves() {
        let dir = ssh_dir();
        let p = |name: &str| dir.path().join(name);
        fs::write(p("id_new"), "appeared late").unwrap();

        let moves = vec![
            (p("id_work.pub"), p("id_new.pub")),
            (p("id_work"), p("id_new")),
        ];
        let err = move_all(&moves).unwrap_err();
        assert!(matches!(err, Error::NameCollision(_)));

        assert_eq!(fs::read_to_string(p("id_work.pub")).unwrap(), key_line(1, "work"));
        assert_eq!(fs::read_to_string(p("id_work")).unwrap(), "PRIVATE WORK");
        assert!(!p("id_new.pub").exists());
        assert_eq!(fs::read_to_string(p("id_new")).unwrap(), "appeared late");
    }

    #[test]
    fn test_rename_validates_name() {
        let dir = ssh_dir();
        let manager = SystemKeyManager::new(dir.path());

        for bad in ["", "  ", "../escape", "sub/dir", "id_new.pub", ".."] {
            let err = manager.rename("id_work", bad).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "accepted {bad:?}");
        }
        assert!(matches!(
            manager.rename("ghost", "id_new"),
            Err(Error::SystemKeyNotFound(_))
        ));
    }

    #[test]
    fn test_prepare_then_delete() {
        let dir = ssh_dir();
        let manager = SystemKeyManager::new(dir.path());

        let token = manager.prepare_delete("id_work").unwrap();
        assert_eq!(token.name(), "id_work");
        assert_eq!(token.files().len(), 2);
        assert!(token.includes_private());

        let removed = manager.delete(token).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!dir.path().join("id_work").exists());
        assert!(!dir.path().join("id_work.pub").exists());

        assert!(matches!(
            manager.prepare_delete("id_work"),
            Err(Error::SystemKeyNotFound(_))
        ));
    }

    #[test]
    fn test_delete_after_files_vanish() {
        let dir = ssh_dir();
        let manager = SystemKeyManager::new(dir.path());
        let token = manager.prepare_delete("id_old").unwrap();
        assert!(!token.includes_private());

        fs::remove_file(dir.path().join("id_old.pub")).unwrap();
        assert!(matches!(manager.delete(token), Err(Error::SystemKeyNotFound(_))));
    }

    #[test]
    fn test_resolve_and_read_public() {
        let dir = ssh_dir();
        let manager = SystemKeyManager::new(dir.path());

        assert_eq!(manager.resolve("id_work").unwrap(), "id_work");
        assert_eq!(manager.resolve("id_work.pub").unwrap(), "id_work");
        assert_eq!(manager.resolve("1").unwrap(), "id_old");
        assert!(manager.resolve("9").is_err());

        assert_eq!(manager.read_public("id_old").unwrap(), key_line(2, "old"));
        assert!(matches!(
            manager.read_public("ghost"),
            Err(Error::SystemKeyNotFound(_))
        ));
    }
}

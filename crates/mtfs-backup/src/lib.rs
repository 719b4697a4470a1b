#![forbid(unsafe_code)]
//! Whole-tree and incremental backups.
//!
//! A backup is a directory under the configured root plus a
//! `<name>_metadata.txt` sidecar of `key=value` lines (`filelist` is
//! comma-separated). Full backups copy every regular file in the source
//! tree; incremental backups copy only files modified after the parent
//! backup's creation time and record the parent name.

use mtfs_error::{Result, StoreError};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Descriptor of one backup, persisted as its sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetadata {
    pub name: String,
    pub location: PathBuf,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub modified_at: u64,
    pub total_files: u64,
    pub total_bytes: u64,
    pub incremental: bool,
    /// Parent backup name; empty for a full backup.
    pub parent: String,
    /// Relative paths included, in tree-walk order.
    pub included_files: Vec<String>,
}

/// Running totals across backups created by this manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub total_backups: u64,
    pub total_bytes: u64,
    pub files_backed_up: u64,
    /// Creation time of the most recent backup, seconds since epoch.
    pub last_backup_at: u64,
}

/// Manages the backup root directory and its sidecars.
#[derive(Debug)]
pub struct BackupManager {
    root: PathBuf,
    stats: Mutex<BackupStats>,
}

impl BackupManager {
    /// Create a manager, making the backup root if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), "backup manager initialized");
        Ok(Self {
            root,
            stats: Mutex::new(BackupStats::default()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn backup_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}_metadata.txt"))
    }

    /// Whether both the backup directory and its sidecar exist.
    #[must_use]
    pub fn backup_exists(&self, name: &str) -> bool {
        self.backup_path(name).is_dir() && self.sidecar_path(name).is_file()
    }

    /// Full backup of `source` under `name`. Refuses to overwrite.
    pub fn create(&self, name: &str, source: impl AsRef<Path>) -> Result<BackupMetadata> {
        self.create_filtered(name, source.as_ref(), false, String::new(), None)
    }

    /// Incremental backup: only files modified after the parent backup's
    /// creation time are included.
    pub fn create_incremental(
        &self,
        name: &str,
        parent: &str,
        source: impl AsRef<Path>,
    ) -> Result<BackupMetadata> {
        let parent_meta = self.backup_info(parent)?;
        self.create_filtered(
            name,
            source.as_ref(),
            true,
            parent.to_owned(),
            Some(parent_meta.created_at),
        )
    }

    fn create_filtered(
        &self,
        name: &str,
        source: &Path,
        incremental: bool,
        parent: String,
        modified_after: Option<u64>,
    ) -> Result<BackupMetadata> {
        if self.backup_exists(name) {
            return Err(StoreError::AlreadyExists(format!("backup {name}")));
        }
        if !source.is_dir() {
            return Err(StoreError::NotFound(format!(
                "backup source {}",
                source.display()
            )));
        }

        let location = self.backup_path(name);
        fs::create_dir_all(&location)?;

        let mut included = Vec::new();
        let mut total_bytes = 0_u64;
        for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            if let Some(threshold) = modified_after {
                if file_mtime(entry.path()) <= threshold {
                    continue;
                }
            }
            let target = location.join(relative);
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir)?;
            }
            let copied = fs::copy(entry.path(), &target)?;
            total_bytes += copied;
            included.push(relative.to_string_lossy().into_owned());
        }

        let now = unix_now();
        let metadata = BackupMetadata {
            name: name.to_owned(),
            location,
            created_at: now,
            modified_at: now,
            total_files: included.len() as u64,
            total_bytes,
            incremental,
            parent,
            included_files: included,
        };
        self.save_sidecar(&metadata)?;

        {
            let mut stats = self.stats.lock();
            stats.total_backups += 1;
            stats.total_bytes += metadata.total_bytes;
            stats.files_backed_up += metadata.total_files;
            stats.last_backup_at = metadata.created_at;
        }

        info!(
            backup = name,
            files = metadata.total_files,
            bytes = metadata.total_bytes,
            incremental,
            "backup created"
        );
        Ok(metadata)
    }

    /// Recreate the listed files under `target`. Returns how many files
    /// were restored.
    pub fn restore(&self, name: &str, target: impl AsRef<Path>) -> Result<u64> {
        let metadata = self.backup_info(name)?;
        let target = target.as_ref();
        fs::create_dir_all(target)?;

        let mut restored = 0_u64;
        for relative in &metadata.included_files {
            let from = metadata.location.join(relative);
            let to = target.join(relative);
            if let Some(dir) = to.parent() {
                fs::create_dir_all(dir)?;
            }
            match fs::copy(&from, &to) {
                Ok(_) => restored += 1,
                Err(error) => {
                    warn!(backup = name, file = %relative, %error, "restore skipped a file");
                }
            }
        }
        info!(backup = name, restored, target = %target.display(), "backup restored");
        Ok(restored)
    }

    /// Remove the backup directory and its sidecar.
    pub fn delete(&self, name: &str) -> Result<()> {
        if !self.backup_exists(name) {
            return Err(StoreError::NotFound(format!("backup {name}")));
        }
        fs::remove_dir_all(self.backup_path(name))?;
        fs::remove_file(self.sidecar_path(name))?;
        info!(backup = name, "backup deleted");
        Ok(())
    }

    /// All backups with a readable sidecar, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<BackupMetadata> {
        let mut backups = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return backups;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.backup_info(&name) {
                Ok(metadata) => backups.push(metadata),
                Err(error) => {
                    debug!(backup = %name, %error, "skipping directory without sidecar");
                }
            }
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.name.cmp(&a.name)));
        backups
    }

    /// Parse one backup's sidecar.
    pub fn backup_info(&self, name: &str) -> Result<BackupMetadata> {
        let sidecar = self.sidecar_path(name);
        if !sidecar.is_file() {
            return Err(StoreError::NotFound(format!("backup {name}")));
        }
        let data = fs::read_to_string(&sidecar)?;
        let mut metadata = BackupMetadata {
            name: name.to_owned(),
            location: self.backup_path(name),
            created_at: 0,
            modified_at: 0,
            total_files: 0,
            total_bytes: 0,
            incremental: false,
            parent: String::new(),
            included_files: Vec::new(),
        };
        for line in data.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "name" => metadata.name = value.to_owned(),
                "path" => metadata.location = PathBuf::from(value),
                "created" => metadata.created_at = value.parse().unwrap_or(0),
                "modified" => metadata.modified_at = value.parse().unwrap_or(0),
                "files" => metadata.total_files = value.parse().unwrap_or(0),
                "size" => metadata.total_bytes = value.parse().unwrap_or(0),
                "incremental" => metadata.incremental = value == "1",
                "parent" => metadata.parent = value.to_owned(),
                "filelist" => {
                    metadata.included_files = value
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect();
                }
                _ => {}
            }
        }
        Ok(metadata)
    }

    /// Check that every listed file is present in the backup directory.
    pub fn verify(&self, name: &str) -> Result<bool> {
        let metadata = self.backup_info(name)?;
        Ok(metadata
            .included_files
            .iter()
            .all(|relative| metadata.location.join(relative).is_file()))
    }

    /// Delete the oldest backups beyond `max_keep`. Returns how many were
    /// removed.
    pub fn cleanup_old(&self, max_keep: usize) -> Result<usize> {
        let backups = self.list();
        let mut removed = 0;
        for metadata in backups.iter().skip(max_keep) {
            self.delete(&metadata.name)?;
            removed += 1;
        }
        Ok(removed)
    }

    #[must_use]
    pub fn stats(&self) -> BackupStats {
        *self.stats.lock()
    }

    /// Human-readable summary of the backup root.
    #[must_use]
    pub fn render_report(&self) -> String {
        use std::fmt::Write as _;
        let backups = self.list();
        let stats = self.stats();
        let mut out = String::new();
        let _ = writeln!(out, "========== Backups ==========");
        let _ = writeln!(out, "total:       {}", backups.len());
        let _ = writeln!(out, "files saved: {}", stats.files_backed_up);
        let _ = writeln!(out, "bytes saved: {}", stats.total_bytes);
        for metadata in backups.iter().take(5) {
            let _ = writeln!(
                out,
                "  {} ({} files, {} bytes) {}",
                metadata.name,
                metadata.total_files,
                metadata.total_bytes,
                if metadata.incremental {
                    "[incremental]"
                } else {
                    "[full]"
                }
            );
        }
        let _ = writeln!(out, "=============================");
        out
    }

    fn save_sidecar(&self, metadata: &BackupMetadata) -> Result<()> {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(out, "name={}", metadata.name);
        let _ = writeln!(out, "path={}", metadata.location.display());
        let _ = writeln!(out, "created={}", metadata.created_at);
        let _ = writeln!(out, "modified={}", metadata.modified_at);
        let _ = writeln!(out, "files={}", metadata.total_files);
        let _ = writeln!(out, "size={}", metadata.total_bytes);
        let _ = writeln!(out, "incremental={}", u8::from(metadata.incremental));
        let _ = writeln!(out, "parent={}", metadata.parent);
        let _ = writeln!(out, "filelist={}", metadata.included_files.join(","));
        fs::write(self.sidecar_path(&metadata.name), out)?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn file_mtime(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn source_tree(dir: &Path) {
        fs::create_dir_all(dir.join("sub")).expect("mkdir");
        fs::write(dir.join("a.txt"), b"alpha").expect("write");
        fs::write(dir.join("b.txt"), b"beta beta").expect("write");
        fs::write(dir.join("sub/c.txt"), b"gamma").expect("write");
    }

    #[test]
    fn create_and_restore_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        let metadata = manager.create("nightly", &source).expect("create");
        assert_eq!(metadata.total_files, 3);
        assert!(!metadata.incremental);
        assert!(manager.backup_exists("nightly"));
        assert!(manager.verify("nightly").expect("verify"));

        let target = tmp.path().join("restored");
        let restored = manager.restore("nightly", &target).expect("restore");
        assert_eq!(restored, 3);
        assert_eq!(fs::read(target.join("a.txt")).expect("read"), b"alpha");
        assert_eq!(fs::read(target.join("sub/c.txt")).expect("read"), b"gamma");
    }

    #[test]
    fn duplicate_name_is_refused() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        manager.create("weekly", &source).expect("create");
        let err = manager.create("weekly", &source).expect_err("duplicate");
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn missing_source_and_missing_backup() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        let err = manager
            .create("ghost", tmp.path().join("nope"))
            .expect_err("no source");
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = manager.restore("ghost", tmp.path()).expect_err("no backup");
        assert!(matches!(err, StoreError::NotFound(_)));
        let err = manager.delete("ghost").expect_err("no backup");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn list_is_newest_first() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        manager.create("first", &source).expect("create");
        thread::sleep(Duration::from_millis(1100));
        manager.create("second", &source).expect("create");

        let names: Vec<String> = manager.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["second".to_owned(), "first".to_owned()]);
    }

    #[test]
    fn sidecar_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        let created = manager.create("snap", &source).expect("create");
        let loaded = manager.backup_info("snap").expect("info");
        assert_eq!(loaded.name, created.name);
        assert_eq!(loaded.total_files, created.total_files);
        assert_eq!(loaded.total_bytes, created.total_bytes);
        assert_eq!(loaded.parent, "");
        let mut files = loaded.included_files.clone();
        files.sort();
        assert_eq!(files, vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn incremental_takes_only_newer_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        manager.create("base", &source).expect("create");
        // Sidecar timestamps have second resolution.
        thread::sleep(Duration::from_millis(1200));
        fs::write(source.join("b.txt"), b"beta v2").expect("write");

        let inc = manager
            .create_incremental("delta", "base", &source)
            .expect("incremental");
        assert!(inc.incremental);
        assert_eq!(inc.parent, "base");
        assert_eq!(inc.included_files, vec!["b.txt".to_owned()]);

        let loaded = manager.backup_info("delta").expect("info");
        assert!(loaded.incremental);
        assert_eq!(loaded.parent, "base");
    }

    #[test]
    fn incremental_requires_parent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        let err = manager
            .create_incremental("delta", "missing", &source)
            .expect_err("no parent");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_removes_dir_and_sidecar() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        manager.create("gone", &source).expect("create");
        manager.delete("gone").expect("delete");
        assert!(!manager.backup_exists("gone"));
        assert!(manager.list().is_empty());
    }

    #[test]
    fn cleanup_old_keeps_newest() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        manager.create("one", &source).expect("create");
        thread::sleep(Duration::from_millis(1100));
        manager.create("two", &source).expect("create");
        let removed = manager.cleanup_old(1).expect("cleanup");
        assert_eq!(removed, 1);
        assert!(manager.backup_exists("two"));
        assert!(!manager.backup_exists("one"));
    }

    #[test]
    fn stats_accumulate() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = tmp.path().join("data");
        source_tree(&source);
        let manager = BackupManager::new(tmp.path().join("backups")).expect("manager");

        manager.create("one", &source).expect("create");
        let stats = manager.stats();
        assert_eq!(stats.total_backups, 1);
        assert_eq!(stats.files_backed_up, 3);
        assert!(stats.total_bytes > 0);
        assert!(stats.last_backup_at > 0);

        let report = manager.render_report();
        assert!(report.contains("one"));
        assert!(report.contains("[full]"));
    }
}

#![forbid(unsafe_code)]
//! Filesystem coordinator.
//!
//! [`FileStore`] owns the sharded cache, the metadata table, the block
//! store, the journal, the codec statistics, and the backup manager, and
//! enforces the ordering between them on every mutating operation:
//! authenticate, resolve the path, journal the intent, perform the host
//! filesystem operation, update in-memory metadata, update the cache, and
//! account statistics. Reads are cache-first: on a miss the whole file is
//! loaded from the host filesystem and inserted before it is returned; on
//! a hit the host filesystem is never touched.
//!
//! Every synchronous operation has an async twin that submits the same
//! code path to the shared worker pool; batch variants fan out per item
//! and collect results in input order.

mod glob;
mod stats;

pub use glob::matches_pattern;
pub use stats::PerformanceStats;

use mtfs_auth::AuthManager;
use mtfs_backup::{BackupManager, BackupMetadata, BackupStats};
use mtfs_cache::{CacheStatistics, EvictionPolicy};
use mtfs_codec::CompressionStats;
use mtfs_concurrent::pool::{TaskHandle, WorkerPool, join_all_flatten};
use mtfs_concurrent::{DEFAULT_SHARDS, ShardedCache};
use mtfs_error::{Result, StoreError};
use mtfs_journal::{Journal, JournalEntryKind};
use mtfs_store::BlockStore;
use parking_lot::Mutex;
use stats::PerfCounters;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Name of the metadata sidecar inside the store root.
pub const METADATA_SIDECAR: &str = ".mtfs_metadata";
/// Name of the block store backing file inside the store root.
pub const BLOCK_FILE: &str = ".mtfs_blocks.dat";

/// One record per live path, persisted to the metadata sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Path relative to the store root.
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
    /// Seconds since the Unix epoch; zero when only loaded from the
    /// sidecar (timestamps are not persisted).
    pub created_at: u64,
    pub modified_at: u64,
    pub permissions: u32,
    pub owner: String,
    pub group: Option<String>,
}

/// Tunables for a [`FileStore`].
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub cache_capacity: usize,
    pub cache_policy: EvictionPolicy,
    pub shard_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            cache_policy: EvictionPolicy::Lru,
            shard_count: DEFAULT_SHARDS,
        }
    }
}

/// The filesystem coordinator.
pub struct FileStore {
    root: PathBuf,
    auth: Option<Arc<AuthManager>>,
    pool: Arc<WorkerPool>,
    cache: Arc<ShardedCache<String, Vec<u8>>>,
    metadata: Mutex<HashMap<String, FileMetadata>>,
    journal: Journal,
    blocks: BlockStore,
    backups: BackupManager,
    compression: Mutex<CompressionStats>,
    perf: PerfCounters,
}

impl FileStore {
    /// Open a store rooted at `root` with default tunables.
    ///
    /// Pass `auth` to enforce authenticated access; `None` disables the
    /// checks (useful for embedding). The worker pool drives all async
    /// variants.
    pub fn create(
        root: impl AsRef<Path>,
        auth: Option<Arc<AuthManager>>,
        pool: Arc<WorkerPool>,
    ) -> Result<Arc<Self>> {
        Self::create_with_config(root, auth, pool, StoreConfig::default())
    }

    /// Open a store with explicit tunables.
    pub fn create_with_config(
        root: impl AsRef<Path>,
        auth: Option<Arc<AuthManager>>,
        pool: Arc<WorkerPool>,
        config: StoreConfig,
    ) -> Result<Arc<Self>> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let cache = ShardedCache::new(
            config.cache_capacity,
            config.cache_policy,
            config.shard_count,
            Arc::clone(&pool),
        );
        let blocks = BlockStore::open(root.join(BLOCK_FILE))?;
        let backup_root = backup_root_for(&root);
        let backups = BackupManager::new(&backup_root)?;

        let store = Arc::new(Self {
            root: root.clone(),
            auth,
            pool,
            cache,
            metadata: Mutex::new(HashMap::new()),
            journal: Journal::new(),
            blocks,
            backups,
            compression: Mutex::new(CompressionStats::default()),
            perf: PerfCounters::new(),
        });
        store.load_metadata()?;
        if store.journal.needs_recovery() {
            warn!("journal left mid-transaction; replaying is a coordinator decision");
            store.journal.recover();
        }
        info!(root = %root.display(), "file store initialized");
        Ok(store)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    #[must_use]
    pub fn block_store(&self) -> &BlockStore {
        &self.blocks
    }

    #[must_use]
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    // ── Auth gates ──────────────────────────────────────────────────────

    fn require_login(&self) -> Result<Option<String>> {
        match &self.auth {
            None => Ok(None),
            Some(auth) => auth
                .current_user()
                .map(Some)
                .ok_or(StoreError::AuthRequired),
        }
    }

    /// Owner-or-admin gate used by read, write, and delete.
    fn require_owner_or_admin(&self, path: &str) -> Result<()> {
        let Some(auth) = &self.auth else {
            return Ok(());
        };
        let user = auth.current_user().ok_or(StoreError::AuthRequired)?;
        if auth.is_admin(&user) {
            return Ok(());
        }
        let table = self.metadata.lock();
        let owner = table.get(path).map(|meta| meta.owner.as_str());
        if owner == Some(user.as_str()) {
            Ok(())
        } else {
            Err(StoreError::PermissionDenied(format!(
                "{path}: caller is neither owner nor administrator"
            )))
        }
    }

    fn current_owner(&self) -> String {
        self.auth
            .as_ref()
            .and_then(|auth| auth.current_user())
            .unwrap_or_else(|| "unknown".to_owned())
    }

    // ── Path handling ───────────────────────────────────────────────────

    /// Resolve a store-relative path, refusing escapes from the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(StoreError::Protocol("empty path".into()));
        }
        let rel = Path::new(path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(StoreError::Protocol(format!(
                "path escapes the store root: {path}"
            )));
        }
        Ok(self.root.join(rel))
    }

    /// Whether a store-relative path exists on the host filesystem.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    // ── File operations ─────────────────────────────────────────────────

    /// Create an empty file owned by the current user.
    pub fn create_file(&self, path: &str) -> Result<bool> {
        let _ = self.require_login()?;
        let full = self.resolve(path)?;
        if full.exists() {
            return Err(StoreError::AlreadyExists(path.to_owned()));
        }
        let _ = self
            .journal
            .append(JournalEntryKind::CreateFile, Vec::new(), path.into());
        fs::write(&full, b"")?;

        let now = unix_now();
        let meta = FileMetadata {
            name: path.to_owned(),
            size: 0,
            is_directory: false,
            created_at: now,
            modified_at: now,
            permissions: 0o644,
            owner: self.current_owner(),
            group: None,
        };
        self.metadata.lock().insert(path.to_owned(), meta);
        self.save_metadata()?;
        self.perf.record_operation();
        debug!(path, "file created");
        Ok(true)
    }

    /// Replace a file's contents. Requires ownership or admin.
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<bool> {
        let _ = self.require_login()?;
        self.require_owner_or_admin(path)?;
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let _ = self
            .journal
            .append(JournalEntryKind::WriteData, Vec::new(), path.into());
        fs::write(&full, data)?;

        {
            let mut table = self.metadata.lock();
            let owner = self.current_owner();
            let meta = table
                .entry(path.to_owned())
                .or_insert_with(|| FileMetadata {
                    name: path.to_owned(),
                    size: 0,
                    is_directory: false,
                    created_at: unix_now(),
                    modified_at: 0,
                    permissions: 0o644,
                    owner,
                    group: None,
                });
            meta.size = data.len() as u64;
            meta.modified_at = unix_now();
        }
        self.save_metadata()?;
        self.cache.put(path.to_owned(), data.to_vec());
        self.perf.record_write();
        debug!(path, bytes = data.len(), "file written");
        Ok(true)
    }

    /// Read a file, cache-first. A hit never touches the host filesystem.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let _ = self.require_login()?;
        self.require_owner_or_admin(path)?;
        self.perf.record_read();

        if let Some(data) = self.cache.get(&path.to_owned()) {
            self.perf.record_cache_hit();
            debug!(path, "cache hit");
            return Ok(data);
        }
        self.perf.record_cache_miss();
        debug!(path, "cache miss");

        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let data = fs::read(&full)?;
        self.cache.put(path.to_owned(), data.clone());
        Ok(data)
    }

    /// Delete a file. Requires ownership or admin.
    pub fn delete_file(&self, path: &str) -> Result<bool> {
        let _ = self.require_login()?;
        self.require_owner_or_admin(path)?;
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let _ = self
            .journal
            .append(JournalEntryKind::DeleteFile, Vec::new(), path.into());
        fs::remove_file(&full)?;
        self.metadata.lock().remove(path);
        self.save_metadata()?;
        self.cache.remove(&path.to_owned());
        self.perf.record_operation();
        debug!(path, "file deleted");
        Ok(true)
    }

    // ── Directory operations ────────────────────────────────────────────

    pub fn create_dir(&self, path: &str) -> Result<bool> {
        let _ = self.require_login()?;
        let full = self.resolve(path)?;
        if full.exists() {
            return Err(StoreError::AlreadyExists(path.to_owned()));
        }
        let _ = self
            .journal
            .append(JournalEntryKind::CreateDir, Vec::new(), path.into());
        fs::create_dir_all(&full)?;

        let now = unix_now();
        let meta = FileMetadata {
            name: path.to_owned(),
            size: 0,
            is_directory: true,
            created_at: now,
            modified_at: now,
            permissions: 0o755,
            owner: self.current_owner(),
            group: None,
        };
        self.metadata.lock().insert(path.to_owned(), meta);
        self.save_metadata()?;
        self.perf.record_operation();
        Ok(true)
    }

    /// Entry names in directory iteration order.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let _ = self.require_login()?;
        let full = self.resolve(path)?;
        if !full.is_dir() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    // ── Copy / move / rename ────────────────────────────────────────────

    /// Copy through the coordinator's own API so caching, metadata, and
    /// statistics are updated uniformly.
    pub fn copy_file(&self, source: &str, destination: &str) -> Result<bool> {
        let _ = self.require_login()?;
        if !self.exists(source) {
            return Err(StoreError::NotFound(source.to_owned()));
        }
        let content = self.read_file(source)?;
        let _ = self.create_file(destination)?;
        let _ = self.write_file(destination, &content)?;
        info!(source, destination, "file copied");
        Ok(true)
    }

    /// Copy, then delete the source. If the delete fails the destination
    /// is removed again — best-effort compensation, not a transaction.
    pub fn move_file(&self, source: &str, destination: &str) -> Result<bool> {
        let _ = self.copy_file(source, destination)?;
        if let Err(error) = self.delete_file(source) {
            warn!(source, destination, %error, "move failed after copy; compensating");
            if let Err(cleanup) = self.delete_file(destination) {
                warn!(destination, %cleanup, "compensation delete failed");
            }
            return Err(error);
        }
        info!(source, destination, "file moved");
        Ok(true)
    }

    pub fn rename_file(&self, old_name: &str, new_name: &str) -> Result<bool> {
        self.move_file(old_name, new_name)
    }

    // ── Find / info / permissions ───────────────────────────────────────

    /// Walk one directory applying glob matching (`*`, `?`) when the
    /// pattern has a wildcard, substring matching otherwise. Results keep
    /// directory iteration order.
    pub fn find(&self, pattern: &str, directory: &str) -> Result<Vec<String>> {
        let names = self.list_dir(directory)?;
        let results: Vec<String> = names
            .into_iter()
            .filter(|name| matches_pattern(name, pattern))
            .map(|name| {
                if directory == "." {
                    name
                } else {
                    format!("{directory}/{name}")
                }
            })
            .collect();
        debug!(pattern, directory, found = results.len(), "find completed");
        Ok(results)
    }

    /// Host filesystem metadata merged with the coordinator's table
    /// (owner, group, and permission bits come from the table when known).
    pub fn info(&self, path: &str) -> Result<FileMetadata> {
        let _ = self.require_login()?;
        let full = self.resolve(path)?;
        let host = fs::metadata(&full).map_err(|_| StoreError::NotFound(path.to_owned()))?;

        let table = self.metadata.lock();
        let record = table.get(path);
        let name = Path::new(path)
            .file_name()
            .map_or_else(|| path.to_owned(), |n| n.to_string_lossy().into_owned());
        Ok(FileMetadata {
            name,
            size: host.len(),
            is_directory: host.is_dir(),
            created_at: record.map_or(0, |m| m.created_at),
            modified_at: system_time_secs(host.modified().ok()),
            permissions: record.map_or_else(
                || host.permissions().mode() & 0o777,
                |m| m.permissions,
            ),
            owner: record.map_or_else(String::new, |m| m.owner.clone()),
            group: record.and_then(|m| m.group.clone()),
        })
    }

    /// Set permission bits on the host file and in the metadata table.
    pub fn set_permissions(&self, path: &str, mode: u32) -> Result<()> {
        let _ = self.require_login()?;
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let _ = self
            .journal
            .append(JournalEntryKind::UpdateMetadata, Vec::new(), path.into());
        fs::set_permissions(&full, fs::Permissions::from_mode(mode))?;
        if let Some(meta) = self.metadata.lock().get_mut(path) {
            meta.permissions = mode & 0o777;
        }
        self.save_metadata()?;
        Ok(())
    }

    // ── System operations ───────────────────────────────────────────────

    /// Flush the metadata sidecar and the block store to disk.
    pub fn sync(&self) -> Result<()> {
        self.save_metadata()?;
        self.blocks.sync()?;
        info!("store synced");
        Ok(())
    }

    pub fn mount(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        self.load_metadata()?;
        info!(root = %self.root.display(), "store mounted");
        Ok(())
    }

    pub fn unmount(&self) -> Result<()> {
        self.sync()?;
        info!(root = %self.root.display(), "store unmounted");
        Ok(())
    }

    // ── Compression ─────────────────────────────────────────────────────

    /// Compress a file in place, replacing its contents with the framed
    /// buffer. The cached copy is dropped so reads see the new bytes.
    pub fn compress_file(&self, path: &str) -> Result<bool> {
        let _ = self.require_login()?;
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let data = fs::read(&full)?;
        let framed = mtfs_codec::compress(&data)?;
        fs::write(&full, &framed)?;
        self.compression.lock().record(data.len(), framed.len());
        self.cache.remove(&path.to_owned());
        info!(
            path,
            original = data.len(),
            framed = framed.len(),
            "file compressed in place"
        );
        Ok(true)
    }

    /// Reverse of [`compress_file`](Self::compress_file). Fails with a
    /// protocol error when the file does not carry the frame magic.
    pub fn decompress_file(&self, path: &str) -> Result<bool> {
        let _ = self.require_login()?;
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        if !mtfs_codec::is_compressed(&full) {
            return Err(StoreError::Protocol(format!("{path} is not compressed")));
        }
        let framed = fs::read(&full)?;
        let data = mtfs_codec::decompress(&framed)?;
        fs::write(&full, &data)?;
        self.cache.remove(&path.to_owned());
        info!(path, restored = data.len(), "file decompressed in place");
        Ok(true)
    }

    #[must_use]
    pub fn compression_stats(&self) -> CompressionStats {
        *self.compression.lock()
    }

    pub fn reset_compression_stats(&self) {
        *self.compression.lock() = CompressionStats::default();
    }

    // ── Backups ─────────────────────────────────────────────────────────

    pub fn create_backup(&self, name: &str) -> Result<bool> {
        let _ = self.backups.create(name, &self.root)?;
        Ok(true)
    }

    pub fn create_incremental_backup(&self, name: &str, parent: &str) -> Result<bool> {
        let _ = self.backups.create_incremental(name, parent, &self.root)?;
        Ok(true)
    }

    /// Restore into `target`, defaulting to `<root>_restored`.
    pub fn restore_backup(&self, name: &str, target: Option<&Path>) -> Result<bool> {
        let default_target = self.root.with_file_name(format!(
            "{}_restored",
            self.root
                .file_name()
                .map_or_else(|| "store".to_owned(), |n| n.to_string_lossy().into_owned())
        ));
        let target = target.map_or(default_target, Path::to_path_buf);
        let _ = self.backups.restore(name, target)?;
        Ok(true)
    }

    pub fn delete_backup(&self, name: &str) -> Result<bool> {
        self.backups.delete(name)?;
        Ok(true)
    }

    /// Backup names, newest first.
    #[must_use]
    pub fn list_backups(&self) -> Vec<String> {
        self.backups.list().into_iter().map(|m| m.name).collect()
    }

    pub fn backup_info(&self, name: &str) -> Result<BackupMetadata> {
        self.backups.backup_info(name)
    }

    #[must_use]
    pub fn backup_stats(&self) -> BackupStats {
        self.backups.stats()
    }

    // ── Cache control ───────────────────────────────────────────────────

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn set_cache_policy(&self, policy: EvictionPolicy) {
        self.cache.set_policy(policy);
    }

    #[must_use]
    pub fn cache_policy(&self) -> EvictionPolicy {
        self.cache.policy()
    }

    pub fn resize_cache(&self, capacity: usize) {
        self.cache.resize(capacity);
    }

    /// Pin a file's content in the cache, loading it first if absent.
    pub fn pin_file(&self, path: &str) -> Result<()> {
        let _ = self.require_login()?;
        if !self.cache.contains(&path.to_owned()) {
            let _ = self.read_file(path)?;
        }
        self.cache.pin(&path.to_owned());
        Ok(())
    }

    pub fn unpin_file(&self, path: &str) {
        self.cache.unpin(&path.to_owned());
    }

    #[must_use]
    pub fn is_file_pinned(&self, path: &str) -> bool {
        self.cache.is_pinned(&path.to_owned())
    }

    /// Load a file into the cache without counting a hit or a miss.
    pub fn prefetch_file(&self, path: &str) -> Result<()> {
        let _ = self.require_login()?;
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(StoreError::NotFound(path.to_owned()));
        }
        let data = fs::read(&full)?;
        self.cache.prefetch(path.to_owned(), data);
        Ok(())
    }

    #[must_use]
    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    pub fn reset_cache_statistics(&self) {
        self.cache.reset_statistics();
    }

    /// Top-`count` cached paths by access count.
    #[must_use]
    pub fn hot_files(&self, count: usize) -> Vec<String> {
        self.cache.hot_keys(count)
    }

    /// The sharded cache behind the store, for warm-up and background
    /// loop control.
    #[must_use]
    pub fn cache(&self) -> &Arc<ShardedCache<String, Vec<u8>>> {
        &self.cache
    }

    // ── Performance monitoring ──────────────────────────────────────────

    #[must_use]
    pub fn stats(&self) -> PerformanceStats {
        self.perf.snapshot()
    }

    pub fn reset_stats(&self) {
        self.perf.reset();
        self.cache.reset_statistics();
    }

    /// Human-readable dashboard combining coordinator and cache counters.
    #[must_use]
    pub fn performance_dashboard(&self) -> String {
        use std::fmt::Write as _;
        let perf = self.stats();
        let cache = self.cache_statistics();
        let mut out = String::new();
        let _ = writeln!(out, "============== Performance ==============");
        let _ = writeln!(out, "monitoring period: {:.1?}", perf.since_reset);
        let _ = writeln!(
            out,
            "cache: {} hits, {} misses ({:.2}% hit rate), {} evictions",
            cache.hits,
            cache.misses,
            cache.hit_rate() * 100.0,
            cache.evictions
        );
        let _ = writeln!(
            out,
            "cache: {} resident, {} pinned, {} prefetched",
            self.cache_len(),
            cache.pinned_items,
            cache.prefetched_items
        );
        let _ = writeln!(
            out,
            "ops: {} reads, {} writes, {} total",
            perf.total_reads, perf.total_writes, perf.total_operations
        );
        let _ = writeln!(out, "=========================================");
        out
    }

    // ── Async API ───────────────────────────────────────────────────────
    //
    // Every synchronous operation has an async twin that submits the same
    // code path to the shared worker pool; the operations are never
    // re-implemented for the async side. Failures travel as error values
    // through the returned handle.

    fn submit<T, F>(self: &Arc<Self>, op: F) -> TaskHandle<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(self);
        self.pool.submit(move || op(&store))
    }

    pub fn create_file_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<bool>> {
        let path = path.to_owned();
        self.submit(move |store| store.create_file(&path))
    }

    pub fn read_file_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<Vec<u8>>> {
        let path = path.to_owned();
        self.submit(move |store| store.read_file(&path))
    }

    pub fn write_file_async(self: &Arc<Self>, path: &str, data: Vec<u8>) -> TaskHandle<Result<bool>> {
        let path = path.to_owned();
        self.submit(move |store| store.write_file(&path, &data))
    }

    pub fn copy_file_async(
        self: &Arc<Self>,
        source: &str,
        destination: &str,
    ) -> TaskHandle<Result<bool>> {
        let (source, destination) = (source.to_owned(), destination.to_owned());
        self.submit(move |store| store.copy_file(&source, &destination))
    }

    pub fn move_file_async(
        self: &Arc<Self>,
        source: &str,
        destination: &str,
    ) -> TaskHandle<Result<bool>> {
        let (source, destination) = (source.to_owned(), destination.to_owned());
        self.submit(move |store| store.move_file(&source, &destination))
    }

    pub fn delete_file_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<bool>> {
        let path = path.to_owned();
        self.submit(move |store| store.delete_file(&path))
    }

    pub fn create_dir_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<bool>> {
        let path = path.to_owned();
        self.submit(move |store| store.create_dir(&path))
    }

    pub fn list_dir_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<Vec<String>>> {
        let path = path.to_owned();
        self.submit(move |store| store.list_dir(&path))
    }

    pub fn rename_file_async(
        self: &Arc<Self>,
        old_name: &str,
        new_name: &str,
    ) -> TaskHandle<Result<bool>> {
        let (old_name, new_name) = (old_name.to_owned(), new_name.to_owned());
        self.submit(move |store| store.rename_file(&old_name, &new_name))
    }

    pub fn find_async(
        self: &Arc<Self>,
        pattern: &str,
        directory: &str,
    ) -> TaskHandle<Result<Vec<String>>> {
        let (pattern, directory) = (pattern.to_owned(), directory.to_owned());
        self.submit(move |store| store.find(&pattern, &directory))
    }

    pub fn info_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<FileMetadata>> {
        let path = path.to_owned();
        self.submit(move |store| store.info(&path))
    }

    pub fn set_permissions_async(
        self: &Arc<Self>,
        path: &str,
        mode: u32,
    ) -> TaskHandle<Result<()>> {
        let path = path.to_owned();
        self.submit(move |store| store.set_permissions(&path, mode))
    }

    pub fn exists_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<bool>> {
        let path = path.to_owned();
        self.submit(move |store| Ok(store.exists(&path)))
    }

    pub fn sync_async(self: &Arc<Self>) -> TaskHandle<Result<()>> {
        self.submit(Self::sync)
    }

    pub fn mount_async(self: &Arc<Self>) -> TaskHandle<Result<()>> {
        self.submit(Self::mount)
    }

    pub fn unmount_async(self: &Arc<Self>) -> TaskHandle<Result<()>> {
        self.submit(Self::unmount)
    }

    pub fn compress_file_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<bool>> {
        let path = path.to_owned();
        self.submit(move |store| store.compress_file(&path))
    }

    pub fn decompress_file_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<bool>> {
        let path = path.to_owned();
        self.submit(move |store| store.decompress_file(&path))
    }

    pub fn create_backup_async(self: &Arc<Self>, name: &str) -> TaskHandle<Result<bool>> {
        let name = name.to_owned();
        self.submit(move |store| store.create_backup(&name))
    }

    pub fn create_incremental_backup_async(
        self: &Arc<Self>,
        name: &str,
        parent: &str,
    ) -> TaskHandle<Result<bool>> {
        let (name, parent) = (name.to_owned(), parent.to_owned());
        self.submit(move |store| store.create_incremental_backup(&name, &parent))
    }

    pub fn restore_backup_async(
        self: &Arc<Self>,
        name: &str,
        target: Option<PathBuf>,
    ) -> TaskHandle<Result<bool>> {
        let name = name.to_owned();
        self.submit(move |store| store.restore_backup(&name, target.as_deref()))
    }

    pub fn delete_backup_async(self: &Arc<Self>, name: &str) -> TaskHandle<Result<bool>> {
        let name = name.to_owned();
        self.submit(move |store| store.delete_backup(&name))
    }

    pub fn list_backups_async(self: &Arc<Self>) -> TaskHandle<Result<Vec<String>>> {
        self.submit(|store| Ok(store.list_backups()))
    }

    pub fn clear_cache_async(self: &Arc<Self>) -> TaskHandle<Result<()>> {
        self.submit(|store| {
            store.clear_cache();
            Ok(())
        })
    }

    pub fn set_cache_policy_async(
        self: &Arc<Self>,
        policy: EvictionPolicy,
    ) -> TaskHandle<Result<()>> {
        self.submit(move |store| {
            store.set_cache_policy(policy);
            Ok(())
        })
    }

    pub fn resize_cache_async(self: &Arc<Self>, capacity: usize) -> TaskHandle<Result<()>> {
        self.submit(move |store| {
            store.resize_cache(capacity);
            Ok(())
        })
    }

    pub fn pin_file_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<()>> {
        let path = path.to_owned();
        self.submit(move |store| store.pin_file(&path))
    }

    pub fn unpin_file_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<()>> {
        let path = path.to_owned();
        self.submit(move |store| {
            store.unpin_file(&path);
            Ok(())
        })
    }

    pub fn is_file_pinned_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<bool>> {
        let path = path.to_owned();
        self.submit(move |store| Ok(store.is_file_pinned(&path)))
    }

    pub fn prefetch_file_async(self: &Arc<Self>, path: &str) -> TaskHandle<Result<()>> {
        let path = path.to_owned();
        self.submit(move |store| store.prefetch_file(&path))
    }

    pub fn cache_statistics_async(self: &Arc<Self>) -> TaskHandle<Result<CacheStatistics>> {
        self.submit(|store| Ok(store.cache_statistics()))
    }

    pub fn hot_files_async(self: &Arc<Self>, count: usize) -> TaskHandle<Result<Vec<String>>> {
        self.submit(move |store| Ok(store.hot_files(count)))
    }

    /// Fan out one copy per pair; results collect in input order.
    pub fn batch_copy_async(
        self: &Arc<Self>,
        operations: Vec<(String, String)>,
    ) -> TaskHandle<Vec<Result<bool>>> {
        let handles = operations
            .into_iter()
            .map(|(source, destination)| self.copy_file_async(&source, &destination))
            .collect();
        join_all_flatten(handles)
    }

    /// Fan out one delete per path; results collect in input order.
    pub fn batch_delete_async(self: &Arc<Self>, paths: Vec<String>) -> TaskHandle<Vec<Result<bool>>> {
        let handles = paths
            .into_iter()
            .map(|path| self.delete_file_async(&path))
            .collect();
        join_all_flatten(handles)
    }

    // ── Metadata sidecar ────────────────────────────────────────────────

    fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_SIDECAR)
    }

    /// Persist the table as `path\towner\tperms\tsize\tis_dir` rows.
    fn save_metadata(&self) -> Result<()> {
        use std::fmt::Write as _;
        let table = self.metadata.lock();
        let mut out = String::new();
        for (path, meta) in table.iter() {
            let _ = writeln!(
                out,
                "{path}\t{}\t{}\t{}\t{}",
                meta.owner,
                meta.permissions,
                meta.size,
                u8::from(meta.is_directory)
            );
        }
        fs::write(self.metadata_path(), out)?;
        Ok(())
    }

    /// Reload the table from the sidecar; malformed rows are skipped.
    fn load_metadata(&self) -> Result<()> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&path)?;
        let mut table = self.metadata.lock();
        table.clear();
        for line in data.lines() {
            let fields: Vec<&str> = line.split('\t').collect();
            let [name, owner, perms, size, is_dir] = fields.as_slice() else {
                continue;
            };
            table.insert(
                (*name).to_owned(),
                FileMetadata {
                    name: (*name).to_owned(),
                    size: size.parse().unwrap_or(0),
                    is_directory: *is_dir == "1",
                    created_at: 0,
                    modified_at: 0,
                    permissions: perms.parse().unwrap_or(0o644),
                    owner: (*owner).to_owned(),
                    group: None,
                },
            );
        }
        debug!(entries = table.len(), "metadata table loaded");
        Ok(())
    }
}

fn backup_root_for(root: &Path) -> PathBuf {
    root.with_file_name(format!(
        "{}_backups",
        root.file_name()
            .map_or_else(|| "store".to_owned(), |n| n.to_string_lossy().into_owned())
    ))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn system_time_secs(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_root_is_a_sibling() {
        let root = backup_root_for(Path::new("/tmp/demo/store"));
        assert_eq!(root, Path::new("/tmp/demo/store_backups"));
    }

    #[test]
    fn config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.cache_capacity, 1000);
        assert_eq!(config.cache_policy, EvictionPolicy::Lru);
        assert_eq!(config.shard_count, DEFAULT_SHARDS);
    }
}

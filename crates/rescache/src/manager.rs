//! High-level fetch-and-cache facade.
//!
//! A [`ResourceManager`] maintains a local download directory that
//! mirrors a remote source tree. `get` returns a local path for a
//! resource, downloading only when the cached copy is missing or
//! stale; `put` uploads a local file back to the remote side.
//!
//! Failures that leave a usable local file (an unobtainable remote
//! hash, a failed refresh of an already cached file) are recorded in
//! the exception history instead of raised, so callers can keep
//! working offline and inspect what went wrong afterwards.

use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use log::{debug, warn};
use tokio::fs;

use crate::auth::CredentialRouter;
use crate::cacher::ResourceCacher;
use crate::error::{FetchError, Result};
use crate::hash;
use crate::monitor::TransferMonitor;
use crate::uri::ResourceId;

/// Option bitmask controlling fetch behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions(u32);

impl FetchOptions {
    /// No options set.
    pub const NONE: FetchOptions = FetchOptions(0);
    /// Always fetch, regardless of the cached copy.
    pub const FORCE_REMOTE: FetchOptions = FetchOptions(0x01);
    /// Compare the cached copy against the remote hash sidecar.
    pub const CHECK_HASH: FetchOptions = FetchOptions(0x02);
    /// Materialize enclosing archives locally before reading entries.
    pub const DOWNLOAD_ZIP: FetchOptions = FetchOptions(0x10);

    pub fn contains(self, other: FetchOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FetchOptions {
    type Output = FetchOptions;

    fn bitor(self, rhs: FetchOptions) -> FetchOptions {
        FetchOptions(self.0 | rhs.0)
    }
}

impl BitOrAssign for FetchOptions {
    fn bitor_assign(&mut self, rhs: FetchOptions) {
        self.0 |= rhs.0;
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions::CHECK_HASH
    }
}

struct LastOp {
    file: Option<PathBuf>,
    was_remote: bool,
}

/// Fetch-and-cache coordinator over a download directory.
pub struct ResourceManager {
    download_dir: PathBuf,
    remote_source: Option<ResourceId>,
    options: FetchOptions,
    cacher: ResourceCacher,
    history: Mutex<Vec<FetchError>>,
    last: Mutex<LastOp>,
}

impl ResourceManager {
    pub fn new(download_dir: impl Into<PathBuf>, remote_source: Option<ResourceId>) -> Result<Self> {
        Ok(ResourceManager {
            download_dir: download_dir.into(),
            remote_source,
            options: FetchOptions::default(),
            cacher: ResourceCacher::new()?,
            history: Mutex::new(Vec::new()),
            last: Mutex::new(LastOp {
                file: None,
                was_remote: false,
            }),
        })
    }

    /// Manager rooted at the current directory with no remote source.
    pub fn with_defaults() -> Result<Self> {
        ResourceManager::new(".", None)
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn set_download_dir(&mut self, dir: impl Into<PathBuf>) {
        self.download_dir = dir.into();
    }

    pub fn remote_source(&self) -> Option<&ResourceId> {
        self.remote_source.as_ref()
    }

    pub fn set_remote_source(&mut self, source: &str) -> Result<()> {
        self.remote_source = Some(ResourceId::parse(source)?);
        Ok(())
    }

    pub fn options(&self) -> FetchOptions {
        self.options
    }

    pub fn set_options(&mut self, options: FetchOptions) {
        self.options = options;
    }

    pub fn set_router(&mut self, router: Arc<CredentialRouter>) {
        self.cacher.set_router(router);
    }

    pub fn set_monitor(&mut self, monitor: Arc<TransferMonitor>) {
        self.cacher.set_monitor(monitor);
    }

    pub fn cacher(&self) -> &ResourceCacher {
        &self.cacher
    }

    pub fn cacher_mut(&mut self) -> &mut ResourceCacher {
        &mut self.cacher
    }

    // --- exception history -------------------------------------------------

    fn record(&self, err: FetchError) {
        warn!("recorded fetch failure: {err}");
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push(err);
    }

    pub fn has_exceptions(&self) -> bool {
        !self.exceptions().is_empty()
    }

    /// Messages of every recorded failure, oldest first.
    pub fn exceptions(&self) -> Vec<String> {
        let history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.iter().map(|e| e.to_string()).collect()
    }

    pub fn last_exception(&self) -> Option<String> {
        self.exceptions().pop()
    }

    /// All recorded messages joined into one report.
    pub fn exception_stack(&self) -> String {
        self.exceptions().join("\n")
    }

    /// Drain the history, transferring ownership of the errors.
    pub fn take_exceptions(&self) -> Vec<FetchError> {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *history)
    }

    pub fn clear_exceptions(&self) {
        self.take_exceptions();
    }

    // --- last-operation bookkeeping ----------------------------------------

    fn set_last(&self, file: &Path, was_remote: bool) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.file = Some(file.to_path_buf());
        last.was_remote = was_remote;
    }

    /// Local file produced by the most recent `get`/`put`.
    pub fn last_file(&self) -> Option<PathBuf> {
        let last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.file.clone()
    }

    /// Whether the most recent `get` actually transferred bytes.
    pub fn last_was_remote(&self) -> bool {
        let last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.was_remote
    }

    // --- identifier plumbing -----------------------------------------------

    /// Resolve an input identifier against the remote source base.
    pub fn resolve_source(&self, source: &ResourceId) -> Result<ResourceId> {
        if !source.is_relative() {
            return Ok(source.clone());
        }
        match &self.remote_source {
            Some(base) => Ok(ResourceId::resolve(base, source)),
            None => Err(FetchError::syntax(
                source.to_string(),
                "relative identifier requires a remote source base",
            )),
        }
    }

    /// Default local destination for a (possibly relative) source.
    fn default_dest(&self, source: &ResourceId) -> PathBuf {
        let rel = if source.is_relative() {
            source.default_destination()
        } else {
            source.file_name()
        };
        self.download_dir.join(rel.trim_start_matches('/'))
    }

    fn effective_dest(&self, dest: Option<&Path>, source: &ResourceId) -> PathBuf {
        match dest {
            None => self.default_dest(source),
            Some(dir) if dir.is_dir() => dir.join(source.file_name()),
            Some(path) => path.to_path_buf(),
        }
    }

    // --- hashing -----------------------------------------------------------

    /// Digest advertised by the source's `.sha1` sidecar.
    pub async fn remote_hash(&self, source: &ResourceId) -> Result<String> {
        let resolved = self.resolve_source(source)?;
        let sidecar = hash::sidecar_id(&resolved);
        let bytes = self.cacher.fetch_bytes(&sidecar).await.map_err(|e| {
            FetchError::HashUnavailable {
                uri: resolved.to_string(),
                reason: e.to_string(),
            }
        })?;
        let content = String::from_utf8_lossy(&bytes);
        hash::parse_sidecar(&content).ok_or_else(|| FetchError::HashUnavailable {
            uri: resolved.to_string(),
            reason: "sidecar does not contain a SHA-1 digest".to_string(),
        })
    }

    /// Digest of a local file.
    pub async fn local_hash(&self, path: &Path) -> Result<String> {
        hash::hash_file(path).await
    }

    /// Whether the local file matches the source's advertised digest.
    pub async fn hashes_match(&self, source: &ResourceId, path: &Path) -> Result<bool> {
        let remote = self.remote_hash(source).await?;
        let local = hash::hash_file(path).await?;
        Ok(hash::hashes_equal(&remote, &local))
    }

    // --- operations --------------------------------------------------------

    /// Whether the resource exists at its (resolved) source.
    pub async fn exists(&self, source: &str) -> Result<bool> {
        let source = self.resolve_source(&ResourceId::parse(source)?)?;
        self.cacher.exists(&source).await
    }

    /// Fetch with the manager's default options and destination.
    pub async fn get(&self, source: &str) -> Result<PathBuf> {
        self.get_with(None, source, self.options).await
    }

    /// Fetch with explicit destination and options.
    pub async fn get_with(
        &self,
        dest: Option<&Path>,
        source: &str,
        options: FetchOptions,
    ) -> Result<PathBuf> {
        self.get_resource(dest, &ResourceId::parse(source)?, options)
            .await
    }

    /// Core fetch operation.
    ///
    /// The cached copy is reused unless `FORCE_REMOTE` is set, the
    /// destination is missing, or `CHECK_HASH` finds a digest mismatch.
    /// An unobtainable digest forces a conservative refetch and is
    /// recorded rather than raised. A failed transfer is fatal only
    /// when no previously cached file remains usable.
    pub async fn get_resource(
        &self,
        dest: Option<&Path>,
        source: &ResourceId,
        options: FetchOptions,
    ) -> Result<PathBuf> {
        let dest = self.effective_dest(dest, source);
        let resolved = self.resolve_source(source)?;
        self.get_boxed(resolved, dest, options).await
    }

    fn get_boxed(
        &self,
        source: ResourceId,
        dest: PathBuf,
        options: FetchOptions,
    ) -> BoxFuture<'_, Result<PathBuf>> {
        Box::pin(async move {
            let mut source = source;

            if options.contains(FetchOptions::DOWNLOAD_ZIP) && source.is_archive() {
                // only the deepest base is a real file; intermediate
                // archive layers are read in memory by the transport
                let base = source.base_archive().clone();
                if !base.is_archive() {
                    let base_dest = self.default_dest(&base);
                    let local = self.get_boxed(base, base_dest, options).await?;
                    source = source.with_new_base(&ResourceId::from_path(&local));
                }
            }

            let dest_exists = fs::metadata(&dest).await.is_ok();
            let mut fetch = options.contains(FetchOptions::FORCE_REMOTE) || !dest_exists;

            if !fetch && options.contains(FetchOptions::CHECK_HASH) {
                match self.hashes_match(&source, &dest).await {
                    Ok(equal) => fetch = !equal,
                    Err(e) => {
                        // cannot tell whether the copy is stale
                        self.record(e);
                        fetch = true;
                    }
                }
            }

            let mut was_remote = false;
            if fetch {
                match self.cacher.fetch_to(&source, &dest).await {
                    Ok(_) => was_remote = true,
                    Err(e) if dest_exists => {
                        // stale but usable local copy
                        self.record(e);
                    }
                    Err(e) => return Err(e),
                }
            } else {
                debug!("cache hit for {source} at {}", dest.display());
            }

            self.set_last(&dest, was_remote);
            Ok(dest)
        })
    }

    /// Upload the file cached at `dest` (relative to the download
    /// directory) back to the resolved remote location.
    pub async fn put(&self, dest: &str) -> Result<ResourceId> {
        let local = self.download_dir.join(dest.trim_start_matches('/'));
        self.put_file(&local, dest).await
    }

    /// Upload an explicit local file to the resolved remote location.
    pub async fn put_file(&self, source: &Path, dest: &str) -> Result<ResourceId> {
        let target = self.resolve_source(&ResourceId::parse(dest)?)?;
        self.cacher.store_from(source, &target).await?;
        self.set_last(source, true);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_for(dir: &Path, source_dir: &Path) -> ResourceManager {
        let base = ResourceId::from_path(source_dir);
        ResourceManager::new(dir, Some(base)).unwrap()
    }

    #[test]
    fn test_options_bitmask() {
        let opts = FetchOptions::FORCE_REMOTE | FetchOptions::CHECK_HASH;
        assert!(opts.contains(FetchOptions::FORCE_REMOTE));
        assert!(opts.contains(FetchOptions::CHECK_HASH));
        assert!(!opts.contains(FetchOptions::DOWNLOAD_ZIP));
        assert!(FetchOptions::default().contains(FetchOptions::CHECK_HASH));
    }

    #[tokio::test]
    async fn test_get_relative_source_into_cache() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(remote.path().join("data")).unwrap();
        std::fs::write(remote.path().join("data/file.txt"), b"content").unwrap();

        let manager = manager_for(cache.path(), remote.path());
        let path = manager.get("data/file.txt").await.unwrap();
        assert_eq!(path, cache.path().join("data/file.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"content");
        assert!(manager.last_was_remote());
        assert_eq!(manager.last_file(), Some(path));
    }

    #[tokio::test]
    async fn test_get_reuses_cache_without_check_hash() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("file.txt"), b"v1").unwrap();

        let mut manager = manager_for(cache.path(), remote.path());
        manager.set_options(FetchOptions::NONE);

        let path = manager.get("file.txt").await.unwrap();
        assert!(manager.last_was_remote());

        // source changes, but without CHECK_HASH the cached copy wins
        std::fs::write(remote.path().join("file.txt"), b"v2").unwrap();
        let path2 = manager.get("file.txt").await.unwrap();
        assert_eq!(path, path2);
        assert!(!manager.last_was_remote());
        assert_eq!(std::fs::read(&path2).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_force_remote_refetches() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("file.txt"), b"v1").unwrap();

        let manager = manager_for(cache.path(), remote.path());
        let path = manager
            .get_with(None, "file.txt", FetchOptions::NONE)
            .await
            .unwrap();
        std::fs::write(remote.path().join("file.txt"), b"v2").unwrap();

        let path2 = manager
            .get_with(None, "file.txt", FetchOptions::FORCE_REMOTE)
            .await
            .unwrap();
        assert_eq!(path, path2);
        assert!(manager.last_was_remote());
        assert_eq!(std::fs::read(&path2).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_check_hash_refetches_on_mismatch() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("file.txt"), b"v1").unwrap();
        std::fs::write(
            remote.path().join("file.txt.sha1"),
            crate::hash::hash_bytes(b"v1"),
        )
        .unwrap();

        let manager = manager_for(cache.path(), remote.path());
        let path = manager
            .get_with(None, "file.txt", FetchOptions::CHECK_HASH)
            .await
            .unwrap();
        assert!(manager.last_was_remote());

        // matching hash: second get is a cache hit
        manager
            .get_with(None, "file.txt", FetchOptions::CHECK_HASH)
            .await
            .unwrap();
        assert!(!manager.last_was_remote());

        // remote content and sidecar change: refetch
        std::fs::write(remote.path().join("file.txt"), b"v2").unwrap();
        std::fs::write(
            remote.path().join("file.txt.sha1"),
            crate::hash::hash_bytes(b"v2"),
        )
        .unwrap();
        manager
            .get_with(None, "file.txt", FetchOptions::CHECK_HASH)
            .await
            .unwrap();
        assert!(manager.last_was_remote());
        assert_eq!(std::fs::read(&path).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_recorded_and_refetches() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("file.txt"), b"v1").unwrap();

        let manager = manager_for(cache.path(), remote.path());
        manager
            .get_with(None, "file.txt", FetchOptions::NONE)
            .await
            .unwrap();
        assert!(!manager.has_exceptions());

        // no sidecar exists: conservative refetch, soft failure recorded
        manager
            .get_with(None, "file.txt", FetchOptions::CHECK_HASH)
            .await
            .unwrap();
        assert!(manager.last_was_remote());
        assert!(manager.has_exceptions());

        manager.clear_exceptions();
        assert!(!manager.has_exceptions());
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_cached_copy() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("file.txt"), b"v1").unwrap();

        let manager = manager_for(cache.path(), remote.path());
        let path = manager
            .get_with(None, "file.txt", FetchOptions::NONE)
            .await
            .unwrap();

        // source disappears; FORCE_REMOTE fails but the cache survives
        std::fs::remove_file(remote.path().join("file.txt")).unwrap();
        let path2 = manager
            .get_with(None, "file.txt", FetchOptions::FORCE_REMOTE)
            .await
            .unwrap();
        assert_eq!(path, path2);
        assert!(!manager.last_was_remote());
        assert!(manager.has_exceptions());
        assert_eq!(std::fs::read(&path2).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_get_missing_with_no_cache_raises() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let manager = manager_for(cache.path(), remote.path());
        let err = manager.get("absent.txt").await.unwrap_err();
        assert!(matches!(err, FetchError::Transfer(_)));
    }

    #[tokio::test]
    async fn test_relative_source_without_base_is_syntax_error() {
        let cache = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(cache.path(), None).unwrap();
        let err = manager.get("relative.txt").await.unwrap_err();
        assert!(matches!(err, FetchError::Syntax { .. }));
    }

    #[tokio::test]
    async fn test_exists() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("file.txt"), b"x").unwrap();

        let manager = manager_for(cache.path(), remote.path());
        assert!(manager.exists("file.txt").await.unwrap());
        assert!(!manager.exists("absent.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_roundtrip() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(cache.path().join("out")).unwrap();
        std::fs::write(cache.path().join("out/result.txt"), b"produced").unwrap();

        let manager = manager_for(cache.path(), remote.path());
        manager.put("out/result.txt").await.unwrap();
        assert_eq!(
            std::fs::read(remote.path().join("out/result.txt")).unwrap(),
            b"produced"
        );
    }

    #[tokio::test]
    async fn test_explicit_dest_directory_appends_filename() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("file.txt"), b"x").unwrap();

        let manager = manager_for(cache.path(), remote.path());
        let path = manager
            .get_with(Some(cache.path()), "file.txt", FetchOptions::NONE)
            .await
            .unwrap();
        assert_eq!(path, cache.path().join("file.txt"));
    }
}

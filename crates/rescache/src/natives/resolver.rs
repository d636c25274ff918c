//! Native library resolution over a managed directory.
//!
//! Layout: `<libraryRoot>/<PlatformDir>/<physicalFileName>`, where the
//! platform directory comes from [`SystemType::dir_name`]. With no
//! managed root configured, the platform's library search path is
//! consulted instead and nothing is downloaded.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{FetchError, Result};
use crate::manager::{FetchOptions, ResourceManager};
use crate::natives::desc::{LibDesc, SystemType};
use crate::uri::ResourceId;

/// Resolves generic library names to local files, downloading through
/// an injected [`ResourceManager`] when a managed directory is set.
pub struct NativeResolver {
    manager: ResourceManager,
    library_dir: Option<PathBuf>,
    sys: SystemType,
    search_path: Option<Vec<PathBuf>>,
}

impl NativeResolver {
    pub fn new(manager: ResourceManager) -> Self {
        NativeResolver {
            manager,
            library_dir: None,
            sys: SystemType::current(),
            search_path: None,
        }
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    /// Managed library root. Downloads happen only when this is set.
    pub fn set_library_dir(&mut self, dir: impl Into<PathBuf>) {
        self.library_dir = Some(dir.into());
    }

    /// Override the detected platform. Intended for cross-platform
    /// tooling and tests.
    pub fn set_system(&mut self, sys: SystemType) {
        self.sys = sys;
    }

    pub fn system(&self) -> SystemType {
        self.sys
    }

    /// Override the library search path consulted when no managed
    /// directory is configured.
    pub fn set_search_path(&mut self, dirs: Vec<PathBuf>) {
        self.search_path = Some(dirs);
    }

    /// Resolve a library name to a local file.
    ///
    /// Returns `Ok(None)` when the name targets a different platform.
    /// With `update` set, an already present exact file is refreshed
    /// through a hash-gated fetch. When the exact version cannot be
    /// obtained, a local file with the same basename/major and an
    /// equal-or-higher minor is selected as a fallback, smallest first.
    pub async fn resolve(&self, name: &str, update: bool) -> Result<Option<PathBuf>> {
        let desc = LibDesc::parse(name)?;
        if !self.sys.is_instance_of(desc.sys()) {
            debug!("library {name} targets {}, skipping on {}", desc.sys(), self.sys);
            return Ok(None);
        }
        let file = desc.file_name(self.sys)?;

        let Some(root) = &self.library_dir else {
            return match self.find_in_search_path(&desc, &file) {
                Some(path) => Ok(Some(path)),
                None => Err(FetchError::VersionResolution {
                    name: name.to_string(),
                    cause: None,
                }),
            };
        };

        let dir_name = self.sys.dir_name().ok_or_else(|| {
            FetchError::syntax(self.sys.to_string(), "not a concrete platform")
        })?;
        let dir = root.join(dir_name);
        let exact = dir.join(&file);

        if exact.exists() && !update {
            return Ok(Some(exact));
        }

        let options = if update {
            FetchOptions::CHECK_HASH
        } else {
            FetchOptions::NONE
        };
        let source = ResourceId::parse(&format!("{dir_name}/{file}"))?;
        match self.manager.get_resource(Some(exact.as_path()), &source, options).await {
            Ok(path) => Ok(Some(path)),
            Err(cause) => {
                if exact.exists() {
                    // refresh failed, the present copy stays usable
                    warn!("could not refresh {file}: {cause}");
                    return Ok(Some(exact));
                }
                match self.find_fallback(&dir, &desc) {
                    Some(path) => {
                        info!(
                            "using {} in place of unavailable {file}",
                            path.display()
                        );
                        Ok(Some(path))
                    }
                    None => Err(FetchError::VersionResolution {
                        name: name.to_string(),
                        cause: Some(Box::new(cause)),
                    }),
                }
            }
        }
    }

    /// Smallest compatible minor at or above the requested one.
    fn find_fallback(&self, dir: &Path, desc: &LibDesc) -> Option<PathBuf> {
        let requested = desc.minor().unwrap_or(0);
        let mut best: Option<(u32, PathBuf)> = None;
        let entries = std::fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(minor) = desc.compatible_minor(name, self.sys) else {
                continue;
            };
            if minor < requested {
                continue;
            }
            match &best {
                Some((m, _)) if *m <= minor => {}
                _ => best = Some((minor, entry.path())),
            }
        }
        best.map(|(_, path)| path)
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if let Some(dirs) = &self.search_path {
            return dirs.clone();
        }
        let var = match self.sys {
            SystemType::Linux | SystemType::Linux32 | SystemType::Linux64 => "LD_LIBRARY_PATH",
            SystemType::MacOS | SystemType::MacOS64 => "DYLD_LIBRARY_PATH",
            SystemType::Windows | SystemType::Windows32 | SystemType::Windows64 => "PATH",
            _ => return Vec::new(),
        };
        match std::env::var_os(var) {
            Some(value) => std::env::split_paths(&value).collect(),
            None => Vec::new(),
        }
    }

    fn find_in_search_path(&self, desc: &LibDesc, file: &str) -> Option<PathBuf> {
        for dir in self.search_dirs() {
            let exact = dir.join(file);
            if exact.exists() {
                return Some(exact);
            }
            if let Some(path) = self.find_fallback(&dir, desc) {
                return Some(path);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_resolver(sys: SystemType) -> NativeResolver {
        let manager = ResourceManager::with_defaults().unwrap();
        let mut resolver = NativeResolver::new(manager);
        resolver.set_system(sys);
        resolver
    }

    #[tokio::test]
    async fn test_foreign_platform_is_noop() {
        let resolver = offline_resolver(SystemType::Linux64);
        let result = resolver.resolve("solver.1.3.dll", false).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_exact_file_in_managed_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Linux64");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("libsolver.so.1.3"), b"elf").unwrap();

        let mut resolver = offline_resolver(SystemType::Linux64);
        resolver.set_library_dir(root.path());

        let path = resolver.resolve("solver.1.3", false).await.unwrap();
        assert_eq!(path, Some(dir.join("libsolver.so.1.3")));
    }

    #[tokio::test]
    async fn test_fallback_to_higher_minor_offline() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Linux64");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("libsolver.so.1.5"), b"elf").unwrap();

        let mut resolver = offline_resolver(SystemType::Linux64);
        resolver.set_library_dir(root.path());

        // no remote source configured: download fails, fallback selects 1.5
        let path = resolver.resolve("solver.1.3", false).await.unwrap();
        assert_eq!(path, Some(dir.join("libsolver.so.1.5")));
    }

    #[tokio::test]
    async fn test_fallback_prefers_smallest_sufficient_minor() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Linux64");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("libsolver.so.1.4"), b"elf").unwrap();
        std::fs::write(dir.join("libsolver.so.1.7"), b"elf").unwrap();
        // lower than requested, never selected
        std::fs::write(dir.join("libsolver.so.1.2"), b"elf").unwrap();

        let mut resolver = offline_resolver(SystemType::Linux64);
        resolver.set_library_dir(root.path());

        let path = resolver.resolve("solver.1.3", false).await.unwrap();
        assert_eq!(path, Some(dir.join("libsolver.so.1.4")));
    }

    #[tokio::test]
    async fn test_different_major_never_selected() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Linux64");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("libsolver.so.2.0"), b"elf").unwrap();

        let mut resolver = offline_resolver(SystemType::Linux64);
        resolver.set_library_dir(root.path());

        let err = resolver.resolve("solver.1.3", false).await.unwrap_err();
        assert!(matches!(err, FetchError::VersionResolution { .. }));
    }

    #[tokio::test]
    async fn test_download_into_managed_dir() {
        let remote = tempfile::tempdir().unwrap();
        let remote_dir = remote.path().join("Linux64");
        std::fs::create_dir_all(&remote_dir).unwrap();
        std::fs::write(remote_dir.join("libsolver.so.1.3"), b"elf").unwrap();

        let root = tempfile::tempdir().unwrap();
        let manager = ResourceManager::new(
            root.path(),
            Some(ResourceId::from_path(remote.path())),
        )
        .unwrap();
        let mut resolver = NativeResolver::new(manager);
        resolver.set_system(SystemType::Linux64);
        resolver.set_library_dir(root.path());

        let path = resolver.resolve("solver.1.3", false).await.unwrap().unwrap();
        assert_eq!(path, root.path().join("Linux64/libsolver.so.1.3"));
        assert_eq!(std::fs::read(&path).unwrap(), b"elf");
    }

    #[tokio::test]
    async fn test_update_keeps_existing_file_when_refresh_fails() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Linux64");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("libsolver.so.1.3"), b"elf").unwrap();

        let mut resolver = offline_resolver(SystemType::Linux64);
        resolver.set_library_dir(root.path());

        let path = resolver.resolve("solver.1.3", true).await.unwrap();
        assert_eq!(path, Some(dir.join("libsolver.so.1.3")));
    }

    #[tokio::test]
    async fn test_search_path_route_without_managed_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libsolver.so.1.5"), b"elf").unwrap();

        let mut resolver = offline_resolver(SystemType::Linux64);
        resolver.set_search_path(vec![dir.path().to_path_buf()]);

        let path = resolver.resolve("solver.1.3", false).await.unwrap();
        assert_eq!(path, Some(dir.path().join("libsolver.so.1.5")));

        let err = resolver.resolve("other.1.0", false).await.unwrap_err();
        assert!(matches!(err, FetchError::VersionResolution { .. }));
    }
}

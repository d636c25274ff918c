//! Transfer engine: transport dispatch, credential walking and atomic
//! installation of downloaded files.
//!
//! Downloads land in a `<dest>.part` staging file which is renamed over
//! the destination only after the transfer finishes and (when the
//! source reports one) the size checks out. A failed transfer removes
//! the staging file and leaves any previously cached destination
//! untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use tokio::fs;

use crate::auth::{Credential, CredentialRouter};
use crate::error::{FetchError, Result, TransferError};
use crate::monitor::TransferMonitor;
use crate::transport::{ArchiveTransport, HttpTransport, LocalTransport, ResourceTransport};
use crate::uri::{ResourceId, Scheme};

/// Extension of the staging file used during downloads.
pub const PART_EXTENSION: &str = ".part";

fn part_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_os_string();
    os.push(PART_EXTENSION);
    PathBuf::from(os)
}

/// Dispatches operations to scheme transports and walks credential
/// candidates on authentication failures.
pub struct ResourceCacher {
    transports: HashMap<Scheme, Arc<dyn ResourceTransport>>,
    router: Arc<CredentialRouter>,
    monitor: Option<Arc<TransferMonitor>>,
}

impl ResourceCacher {
    /// Cacher with the built-in transports (local, HTTP(S), archive)
    /// and no credential bindings.
    pub fn new() -> Result<Self> {
        let mut cacher = ResourceCacher {
            transports: HashMap::new(),
            router: Arc::new(CredentialRouter::new()),
            monitor: None,
        };
        cacher.add_transport(Arc::new(LocalTransport::new()));
        cacher.add_transport(Arc::new(HttpTransport::with_defaults()?));
        cacher.add_transport(Arc::new(ArchiveTransport::new()));
        Ok(cacher)
    }

    /// Register a transport for every scheme it serves, replacing any
    /// previous registration.
    pub fn add_transport(&mut self, transport: Arc<dyn ResourceTransport>) {
        for scheme in transport.schemes() {
            self.transports.insert(*scheme, Arc::clone(&transport));
        }
    }

    pub fn set_router(&mut self, router: Arc<CredentialRouter>) {
        self.router = router;
    }

    pub fn set_monitor(&mut self, monitor: Arc<TransferMonitor>) {
        self.monitor = Some(monitor);
    }

    pub fn monitor(&self) -> Option<&Arc<TransferMonitor>> {
        self.monitor.as_ref()
    }

    fn transport_for(&self, uri: &ResourceId) -> Result<&Arc<dyn ResourceTransport>> {
        let scheme = uri.scheme().ok_or_else(|| {
            FetchError::syntax(uri.to_string(), "relative identifier has no transport")
        })?;
        self.transports.get(&scheme).ok_or_else(|| {
            TransferError::UnsupportedScheme {
                scheme: scheme.to_string(),
            }
            .into()
        })
    }

    /// Whether the resource exists at its source.
    pub async fn exists(&self, uri: &ResourceId) -> Result<bool> {
        let transport = self.transport_for(uri)?;
        let mut last_auth = None;
        for cred in self.router.candidates(uri) {
            match transport.exists(uri, &cred).await {
                Ok(found) => return Ok(found),
                Err(FetchError::Transfer(e)) if e.is_auth() => {
                    debug!("credential rejected for {uri}: {e}");
                    last_auth = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(exhausted(uri, last_auth))
    }

    /// Reported source size, if any.
    pub async fn size(&self, uri: &ResourceId) -> Result<Option<u64>> {
        let transport = self.transport_for(uri)?;
        let mut last_auth = None;
        for cred in self.router.candidates(uri) {
            match transport.size(uri, &cred).await {
                Ok(size) => return Ok(size),
                Err(FetchError::Transfer(e)) if e.is_auth() => {
                    debug!("credential rejected for {uri}: {e}");
                    last_auth = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(exhausted(uri, last_auth))
    }

    /// Read a (small) resource fully into memory.
    pub async fn fetch_bytes(&self, uri: &ResourceId) -> Result<Vec<u8>> {
        let transport = self.transport_for(uri)?;
        let mut last_auth = None;
        for cred in self.router.candidates(uri) {
            match transport.fetch_bytes(uri, &cred).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::Transfer(e)) if e.is_auth() => {
                    debug!("credential rejected for {uri}: {e}");
                    last_auth = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(exhausted(uri, last_auth))
    }

    /// Download a resource into `dest` through a staging file,
    /// installing it atomically on success.
    pub async fn fetch_to(&self, uri: &ResourceId, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // advisory only; None disables the size check
        let expected = self.size(uri).await.unwrap_or(None);

        let part = part_path(dest);
        if let Some(monitor) = &self.monitor {
            monitor.track(&part, expected);
        }

        let outcome = self.fetch_part(uri, &part, expected).await;

        match outcome {
            Ok(written) => {
                if let Some(monitor) = &self.monitor {
                    monitor.complete(&part);
                }
                let install = fs::rename(&part, dest).await;
                if let Some(monitor) = &self.monitor {
                    monitor.release(&part);
                }
                if let Err(e) = install {
                    self.discard_part(&part).await;
                    return Err(FetchError::AtomicInstall {
                        dest: dest.display().to_string(),
                        reason: e.to_string(),
                    });
                }
                debug!("installed {uri} -> {} ({written} bytes)", dest.display());
                Ok(written)
            }
            Err(e) => {
                if let Some(monitor) = &self.monitor {
                    monitor.release(&part);
                }
                self.discard_part(&part).await;
                Err(e)
            }
        }
    }

    async fn fetch_part(&self, uri: &ResourceId, part: &Path, expected: Option<u64>) -> Result<u64> {
        let transport = self.transport_for(uri)?;
        let mut last_auth = None;
        let mut written = None;
        for cred in self.router.candidates(uri) {
            match transport.fetch_file(uri, &cred, part).await {
                Ok(n) => {
                    written = Some(n);
                    break;
                }
                Err(FetchError::Transfer(e)) if e.is_auth() => {
                    debug!("credential rejected for {uri}: {e}");
                    last_auth = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        let written = match written {
            Some(n) => n,
            None => return Err(exhausted(uri, last_auth)),
        };

        if let Some(expected) = expected {
            let actual = fs::metadata(part).await?.len();
            if actual != expected {
                return Err(FetchError::AtomicInstall {
                    dest: part.display().to_string(),
                    reason: format!("size mismatch, expected {expected} bytes, got {actual}"),
                });
            }
        }
        Ok(written)
    }

    async fn discard_part(&self, part: &Path) {
        if let Err(e) = fs::remove_file(part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove staging file {}: {e}", part.display());
            }
        }
    }

    /// Upload a local file to the identified location.
    pub async fn store_from(&self, src: &Path, uri: &ResourceId) -> Result<()> {
        let transport = self.transport_for(uri)?;
        let mut last_auth = None;
        for cred in self.router.candidates(uri) {
            match transport.store_file(src, uri, &cred).await {
                Ok(()) => return Ok(()),
                Err(FetchError::Transfer(e)) if e.is_auth() => {
                    debug!("credential rejected for {uri}: {e}");
                    last_auth = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(exhausted(uri, last_auth))
    }
}

fn exhausted(uri: &ResourceId, last_auth: Option<TransferError>) -> FetchError {
    match last_auth {
        Some(e) => e.into(),
        None => TransferError::Other {
            uri: uri.to_string(),
            reason: "no credential candidates".to_string(),
        }
        .into(),
    }
}

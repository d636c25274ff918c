//! Local filesystem transport for `file` identifiers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::auth::Credential;
use crate::error::{FetchError, Result, TransferError};
use crate::transport::ResourceTransport;
use crate::uri::{ResourceId, Scheme};

#[derive(Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        LocalTransport
    }

    fn local_path(uri: &ResourceId) -> Result<PathBuf> {
        uri.to_local_path().ok_or_else(|| {
            FetchError::syntax(uri.to_string(), "not a local file identifier")
        })
    }
}

#[async_trait]
impl ResourceTransport for LocalTransport {
    fn schemes(&self) -> &[Scheme] {
        &[Scheme::File]
    }

    async fn exists(&self, uri: &ResourceId, _cred: &Credential) -> Result<bool> {
        let path = Self::local_path(uri)?;
        Ok(fs::metadata(&path).await.is_ok())
    }

    async fn size(&self, uri: &ResourceId, _cred: &Credential) -> Result<Option<u64>> {
        let path = Self::local_path(uri)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(_) => Ok(None),
        }
    }

    async fn fetch_bytes(&self, uri: &ResourceId, _cred: &Credential) -> Result<Vec<u8>> {
        let path = Self::local_path(uri)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransferError::NotFound {
                    uri: uri.to_string(),
                }
                .into()
            } else {
                FetchError::Io(e)
            }
        })
    }

    async fn fetch_file(&self, uri: &ResourceId, _cred: &Credential, dest: &Path) -> Result<u64> {
        let path = Self::local_path(uri)?;
        fs::copy(&path, dest).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransferError::NotFound {
                    uri: uri.to_string(),
                }
                .into()
            } else {
                FetchError::Io(e)
            }
        })
    }

    async fn store_file(&self, src: &Path, uri: &ResourceId, _cred: &Credential) -> Result<()> {
        let path = Self::local_path(uri)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(src, &path).await?;
        Ok(())
    }
}

//! Read-only transport for entries inside zip and jar archives.
//!
//! Only local archives are opened. An archive identifier whose base is
//! still remote must first be materialized locally (the manager's
//! archive-recursion option does exactly that) before its entries can
//! be read. Nested archives are supported by loading the inner archive
//! bytes into memory.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use async_trait::async_trait;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::auth::Credential;
use crate::error::{FetchError, Result, TransferError};
use crate::transport::ResourceTransport;
use crate::uri::{ResourceId, Scheme};

#[derive(Default)]
pub struct ArchiveTransport;

trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

impl ArchiveTransport {
    pub fn new() -> Self {
        ArchiveTransport
    }

    fn entry_name(uri: &ResourceId) -> Result<String> {
        let frag = uri.fragment().ok_or_else(|| {
            FetchError::syntax(uri.to_string(), "archive identifier has no entry path")
        })?;
        Ok(frag.trim_start_matches('/').to_string())
    }

    fn open_archive(base: &ResourceId) -> Result<ZipArchive<Box<dyn ReadSeek>>> {
        if base.is_archive() {
            // inner archive, loaded into memory
            let bytes = Self::read_entry_sync(base)?;
            let reader: Box<dyn ReadSeek> = Box::new(Cursor::new(bytes));
            return ZipArchive::new(reader)
                .map_err(|e| Self::zip_error(&base.to_string(), e));
        }
        let path = base.to_local_path().ok_or_else(|| {
            FetchError::Transfer(TransferError::Other {
                uri: base.to_string(),
                reason: "enclosing archive is not local; fetch it before reading entries"
                    .to_string(),
            })
        })?;
        let file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::Transfer(TransferError::NotFound {
                    uri: base.to_string(),
                })
            } else {
                FetchError::Io(e)
            }
        })?;
        let reader: Box<dyn ReadSeek> = Box::new(file);
        ZipArchive::new(reader).map_err(|e| Self::zip_error(&base.to_string(), e))
    }

    fn zip_error(uri: &str, err: ZipError) -> FetchError {
        match err {
            ZipError::FileNotFound => TransferError::NotFound {
                uri: uri.to_string(),
            }
            .into(),
            other => TransferError::Other {
                uri: uri.to_string(),
                reason: other.to_string(),
            }
            .into(),
        }
    }

    fn read_entry_sync(uri: &ResourceId) -> Result<Vec<u8>> {
        let name = Self::entry_name(uri)?;
        let base = uri.nested().ok_or_else(|| {
            FetchError::syntax(uri.to_string(), "archive identifier has no base")
        })?;
        let mut archive = Self::open_archive(base)?;
        let mut entry = archive
            .by_name(&name)
            .map_err(|e| Self::zip_error(&uri.to_string(), e))?;
        let mut out = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut out)?;
        Ok(out)
    }

    fn entry_size_sync(uri: &ResourceId) -> Result<Option<u64>> {
        let name = Self::entry_name(uri)?;
        let base = uri.nested().ok_or_else(|| {
            FetchError::syntax(uri.to_string(), "archive identifier has no base")
        })?;
        let mut archive = Self::open_archive(base)?;
        let size = match archive.by_name(&name) {
            Ok(entry) => Some(entry.size()),
            Err(ZipError::FileNotFound) => None,
            Err(e) => return Err(Self::zip_error(&uri.to_string(), e)),
        };
        Ok(size)
    }
}

#[async_trait]
impl ResourceTransport for ArchiveTransport {
    fn schemes(&self) -> &[Scheme] {
        &[Scheme::Zip, Scheme::Jar]
    }

    async fn exists(&self, uri: &ResourceId, _cred: &Credential) -> Result<bool> {
        let uri = uri.clone();
        tokio::task::spawn_blocking(move || match Self::entry_size_sync(&uri) {
            Ok(size) => Ok(size.is_some()),
            Err(FetchError::Transfer(TransferError::NotFound { .. })) => Ok(false),
            Err(e) => Err(e),
        })
        .await
        .map_err(|e| FetchError::Io(std::io::Error::other(e)))?
    }

    async fn size(&self, uri: &ResourceId, _cred: &Credential) -> Result<Option<u64>> {
        let uri = uri.clone();
        tokio::task::spawn_blocking(move || Self::entry_size_sync(&uri))
            .await
            .map_err(|e| FetchError::Io(std::io::Error::other(e)))?
    }

    async fn fetch_bytes(&self, uri: &ResourceId, _cred: &Credential) -> Result<Vec<u8>> {
        let uri = uri.clone();
        tokio::task::spawn_blocking(move || Self::read_entry_sync(&uri))
            .await
            .map_err(|e| FetchError::Io(std::io::Error::other(e)))?
    }

    async fn fetch_file(&self, uri: &ResourceId, cred: &Credential, dest: &Path) -> Result<u64> {
        let bytes = self.fetch_bytes(uri, cred).await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn store_file(&self, _src: &Path, uri: &ResourceId, _cred: &Credential) -> Result<()> {
        Err(TransferError::Other {
            uri: uri.to_string(),
            reason: "archive entries are read-only".to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, data) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_fetch_entry() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("bundle.zip");
        build_zip(&zip_path, &[("models/arm.obj", b"vertices")]);

        let uri = ResourceId::parse(&format!(
            "zip:file://{}!/models/arm.obj",
            zip_path.display()
        ))
        .unwrap();

        let transport = ArchiveTransport::new();
        let cred = Credential::Anonymous;
        assert!(transport.exists(&uri, &cred).await.unwrap());
        assert_eq!(transport.size(&uri, &cred).await.unwrap(), Some(8));
        assert_eq!(transport.fetch_bytes(&uri, &cred).await.unwrap(), b"vertices");

        let dest = dir.path().join("arm.obj");
        let n = transport.fetch_file(&uri, &cred, &dest).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(std::fs::read(&dest).unwrap(), b"vertices");
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("bundle.zip");
        build_zip(&zip_path, &[("present.txt", b"x")]);

        let uri = ResourceId::parse(&format!(
            "zip:file://{}!/absent.txt",
            zip_path.display()
        ))
        .unwrap();

        let transport = ArchiveTransport::new();
        let cred = Credential::Anonymous;
        assert!(!transport.exists(&uri, &cred).await.unwrap());
        assert_eq!(transport.size(&uri, &cred).await.unwrap(), None);
        let err = transport.fetch_bytes(&uri, &cred).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Transfer(TransferError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_nested_archive_entry() {
        let dir = tempfile::tempdir().unwrap();

        let inner_path = dir.path().join("inner.zip");
        build_zip(&inner_path, &[("deep.txt", b"bottom")]);
        let inner_bytes = std::fs::read(&inner_path).unwrap();

        let outer_path = dir.path().join("outer.zip");
        build_zip(&outer_path, &[("inner.zip", &inner_bytes)]);

        let uri = ResourceId::parse(&format!(
            "zip:zip:file://{}!/inner.zip!/deep.txt",
            outer_path.display()
        ))
        .unwrap();

        let transport = ArchiveTransport::new();
        let bytes = transport
            .fetch_bytes(&uri, &Credential::Anonymous)
            .await
            .unwrap();
        assert_eq!(bytes, b"bottom");
    }

    #[tokio::test]
    async fn test_remote_base_rejected() {
        let uri = ResourceId::parse("zip:http://host/a.zip!/inner.txt").unwrap();
        let transport = ArchiveTransport::new();
        let err = transport
            .fetch_bytes(&uri, &Credential::Anonymous)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Transfer(TransferError::Other { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"x").unwrap();
        let uri = ResourceId::parse("zip:file:///a.zip!/e").unwrap();
        let transport = ArchiveTransport::new();
        assert!(transport
            .store_file(&src, &uri, &Credential::Anonymous)
            .await
            .is_err());
    }
}

//! Scheme-specific resource transports.
//!
//! A transport knows how to probe and move bytes for one family of
//! identifier schemes. Credentials arrive per call, routed by the
//! caller; transports hold connection machinery only.

mod archive;
mod http;
mod local;

pub use archive::ArchiveTransport;
pub use http::{HttpTransport, HttpTransportConfig};
pub use local::LocalTransport;

use std::path::Path;

use async_trait::async_trait;

use crate::auth::Credential;
use crate::error::Result;
use crate::uri::{ResourceId, Scheme};

/// Moves bytes for one or more identifier schemes.
#[async_trait]
pub trait ResourceTransport: Send + Sync {
    /// Schemes served by this transport.
    fn schemes(&self) -> &[Scheme];

    /// Whether the resource currently exists at the source.
    async fn exists(&self, uri: &ResourceId, cred: &Credential) -> Result<bool>;

    /// Size of the resource in bytes, if the source reports one.
    async fn size(&self, uri: &ResourceId, cred: &Credential) -> Result<Option<u64>>;

    /// Read the whole resource into memory. Intended for small
    /// auxiliary files such as hash sidecars.
    async fn fetch_bytes(&self, uri: &ResourceId, cred: &Credential) -> Result<Vec<u8>>;

    /// Stream the resource into `dest`, returning the number of bytes
    /// written. `dest`'s parent directory must already exist.
    async fn fetch_file(&self, uri: &ResourceId, cred: &Credential, dest: &Path) -> Result<u64>;

    /// Upload a local file to the identified location.
    async fn store_file(&self, src: &Path, uri: &ResourceId, cred: &Credential) -> Result<()>;
}

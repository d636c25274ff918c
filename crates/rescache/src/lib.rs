pub mod auth;
pub mod cacher;
pub mod error;
pub mod hash;
pub mod manager;
pub mod monitor;
pub mod natives;
pub mod transport;
pub mod uri;

pub use error::{FetchError, Result, TransferError};
pub use uri::{Authority, ResourceId, Scheme};
pub use auth::{
    Authenticator, Credential, CredentialCipher, CredentialRouter, Credentials, ExactMatcher,
    GlobMatcher, IdentityRepository, PlaintextCipher, UriMatcher,
};
pub use cacher::ResourceCacher;
pub use manager::{FetchOptions, ResourceManager};
pub use monitor::{TransferEvent, TransferEventKind, TransferListener, TransferMonitor};
pub use natives::{LibDesc, NativeResolver, SystemType};
pub use transport::{
    ArchiveTransport, HttpTransport, HttpTransportConfig, LocalTransport, ResourceTransport,
};

//! HTTP(S) transport built on reqwest.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::auth::Credential;
use crate::error::{Result, TransferError};
use crate::transport::ResourceTransport;
use crate::uri::{ResourceId, Scheme};

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        HttpTransportConfig {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            user_agent: format!("rescache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| TransferError::Other {
                uri: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(HttpTransport { client })
    }

    pub fn with_defaults() -> Result<Self> {
        HttpTransport::new(HttpTransportConfig::default())
    }

    fn apply_auth(builder: RequestBuilder, cred: &Credential) -> Result<RequestBuilder> {
        match cred {
            Credential::Identity(creds) => {
                Ok(builder.basic_auth(creds.user(), Some(creds.password()?)))
            }
            Credential::Anonymous => Ok(builder),
        }
    }

    async fn get(&self, uri: &ResourceId, cred: &Credential) -> Result<Response> {
        let url = uri.to_string();
        let builder = Self::apply_auth(self.client.get(&url), cred)?;
        let response = builder
            .send()
            .await
            .map_err(|e| TransferError::from_reqwest(&url, e))?;
        if !response.status().is_success() {
            return Err(TransferError::from_status(&url, response.status()).into());
        }
        Ok(response)
    }

    async fn head(&self, uri: &ResourceId, cred: &Credential) -> Result<Response> {
        let url = uri.to_string();
        let builder = Self::apply_auth(self.client.head(&url), cred)?;
        builder
            .send()
            .await
            .map_err(|e| TransferError::from_reqwest(&url, e).into())
    }
}

#[async_trait]
impl ResourceTransport for HttpTransport {
    fn schemes(&self) -> &[Scheme] {
        &[Scheme::Http, Scheme::Https]
    }

    async fn exists(&self, uri: &ResourceId, cred: &Credential) -> Result<bool> {
        let response = self.head(uri, cred).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        match TransferError::from_status(&uri.to_string(), status) {
            TransferError::NotFound { .. } => Ok(false),
            other => Err(other.into()),
        }
    }

    async fn size(&self, uri: &ResourceId, cred: &Credential) -> Result<Option<u64>> {
        let response = self.head(uri, cred).await?;
        if !response.status().is_success() {
            return Err(TransferError::from_status(&uri.to_string(), response.status()).into());
        }
        Ok(response.content_length())
    }

    async fn fetch_bytes(&self, uri: &ResourceId, cred: &Credential) -> Result<Vec<u8>> {
        let url = uri.to_string();
        let response = self.get(uri, cred).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransferError::from_reqwest(&url, e))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_file(&self, uri: &ResourceId, cred: &Credential, dest: &Path) -> Result<u64> {
        let url = uri.to_string();
        debug!("downloading {url} -> {}", dest.display());

        let response = self.get(uri, cred).await?;
        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransferError::from_reqwest(&url, e))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn store_file(&self, src: &Path, uri: &ResourceId, cred: &Credential) -> Result<()> {
        let url = uri.to_string();
        debug!("uploading {} -> {url}", src.display());

        let body = tokio::fs::read(src).await?;
        let builder = Self::apply_auth(self.client.put(&url), cred)?.body(body);
        let response = builder
            .send()
            .await
            .map_err(|e| TransferError::from_reqwest(&url, e))?;
        if !response.status().is_success() {
            return Err(TransferError::from_status(&url, response.status()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HttpTransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("rescache/"));
    }

    #[test]
    fn test_schemes() {
        let transport = HttpTransport::with_defaults().unwrap();
        assert_eq!(transport.schemes(), &[Scheme::Http, Scheme::Https]);
    }

    // network tests live behind #[ignore] so offline builds stay green
    #[tokio::test]
    #[ignore]
    async fn test_fetch_bytes_from_network() {
        let transport = HttpTransport::with_defaults().unwrap();
        let uri = ResourceId::parse("https://example.com/").unwrap();
        let body = transport
            .fetch_bytes(&uri, &Credential::Anonymous)
            .await
            .unwrap();
        assert!(!body.is_empty());
    }
}

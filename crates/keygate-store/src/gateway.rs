//! HTTP pinning gateway backend.
//!
//! Uploads are `POST <endpoint>` with the raw bytes and the content address
//! in the `X-Content-Address` header. Fetches are `GET <endpoint>/<cid>`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use keygate_core::ContentAddress;

use crate::error::{Result, StorageError};
use crate::traits::BlobStore;

/// Configuration for a pinning gateway.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Base URL, e.g. `https://gateway.example.com/ipfs`.
    pub endpoint: String,

    /// Optional bearer token for uploads.
    pub api_key: Option<String>,

    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Blob store backed by an HTTP(S) pinning service.
#[derive(Clone)]
pub struct GatewayBlobStore {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewayBlobStore {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::StoreUnavailable(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn base(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    fn url_for(&self, address: &ContentAddress) -> String {
        format!("{}/{}", self.base(), address.to_cid())
    }

    fn prepare_request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(api_key) => builder.bearer_auth(api_key),
            None => builder,
        }
    }
}

#[async_trait]
impl BlobStore for GatewayBlobStore {
    async fn put_blob(&self, address: &ContentAddress, bytes: Bytes) -> Result<()> {
        let request = self.prepare_request(
            self.client
                .post(self.base())
                .header("X-Content-Address", address.to_cid())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes),
        );

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(StorageError::StoreUnavailable(format!(
                "upload failed with status {}",
                response.status()
            )));
        }

        debug!(cid = %address, "uploaded blob to gateway");
        Ok(())
    }

    async fn get_blob(&self, address: &ContentAddress) -> Result<Option<Bytes>> {
        let response = self.client.get(self.url_for(address)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.bytes().await?)),
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(StorageError::StoreUnavailable(format!(
                "fetch failed with status {status}"
            ))),
        }
    }

    fn gateway_url(&self, address: &ContentAddress) -> Option<String> {
        Some(self.url_for(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_url() {
        let store = GatewayBlobStore::new(GatewayConfig::new("https://gw.example.com/ipfs/")).unwrap();
        let address = ContentAddress::for_bytes(b"envelope");

        assert_eq!(
            store.gateway_url(&address).unwrap(),
            format!("https://gw.example.com/ipfs/{}", address.to_cid())
        );
    }

    #[tokio::test]
    async fn test_unreachable_gateway() {
        let store = GatewayBlobStore::new(
            GatewayConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        let address = ContentAddress::for_bytes(b"envelope");

        let result = store.put_blob(&address, Bytes::from_static(b"envelope")).await;
        assert!(matches!(result, Err(StorageError::StoreUnavailable(_))));
    }
}

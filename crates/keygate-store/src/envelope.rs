//! Encrypted document envelopes and their content-addressed store.

use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use keygate_core::{AccessPolicy, BindingHash, ContentAddress};

use crate::error::{Result, StorageError};
use crate::traits::BlobStore;

/// Everything needed to later decrypt a document, minus the key.
///
/// Serialized as JSON with the field names below; the content address is
/// computed over exactly those bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "cipherText", with = "base64_bytes")]
    pub ciphertext: Vec<u8>,

    #[serde(rename = "dataToEncryptHash")]
    pub binding_hash: BindingHash,

    #[serde(rename = "accessControlConditions")]
    pub policy: AccessPolicy,

    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(rename = "contentType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Envelope {
    pub fn new(ciphertext: Vec<u8>, binding_hash: BindingHash, policy: AccessPolicy) -> Self {
        Self {
            ciphertext,
            binding_hash,
            policy,
            file_name: None,
            content_type: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Wire JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StorageError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::MalformedEnvelope(e.to_string()))
    }

    /// Content address of the wire bytes.
    pub fn content_address(&self) -> Result<ContentAddress> {
        Ok(ContentAddress::for_bytes(&self.to_json_bytes()?))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Stores envelopes in a [`BlobStore`] under their content address.
pub struct EnvelopeStore<B> {
    blobs: Arc<B>,
}

impl<B> Clone for EnvelopeStore<B> {
    fn clone(&self) -> Self {
        Self {
            blobs: self.blobs.clone(),
        }
    }
}

impl<B: BlobStore> EnvelopeStore<B> {
    pub fn new(blobs: Arc<B>) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    /// Store an envelope. Identical envelopes map to the same address.
    pub async fn put(&self, envelope: &Envelope) -> Result<ContentAddress> {
        let bytes = envelope.to_json_bytes()?;
        let address = ContentAddress::for_bytes(&bytes);

        self.blobs.put_blob(&address, Bytes::from(bytes)).await?;
        debug!(cid = %address, "stored envelope");
        Ok(address)
    }

    /// Fetch and verify an envelope.
    ///
    /// The fetched bytes must hash to `address`.
    pub async fn get(&self, address: &ContentAddress) -> Result<Envelope> {
        let bytes = self
            .blobs
            .get_blob(address)
            .await?
            .ok_or_else(|| StorageError::NotFound(address.to_cid()))?;

        if !address.matches(&bytes) {
            warn!(cid = %address, "stored bytes do not match content address");
            return Err(StorageError::MalformedEnvelope(format!(
                "content does not hash to {address}"
            )));
        }

        Envelope::from_json_bytes(&bytes)
    }

    /// Public URL for `address`, if the backend serves one.
    pub fn gateway_url(&self, address: &ContentAddress) -> Option<String> {
        self.blobs.gateway_url(address)
    }
}

/// Base64 of `bytes`, as used in the `cipherText` field.
pub fn encode_ciphertext(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

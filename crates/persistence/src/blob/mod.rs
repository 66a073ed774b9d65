//! Blob storage for uploaded files.
//!
//! Files are stored under generated keys of the form
//! `{folder}/{owner_id}/{uuid}.{ext}` and addressed by a stable URL
//! (`{base_url}/files/{key}`). Reading a file requires a presigned URL that
//! carries an expiry and an HMAC-SHA256 signature over the key and expiry.

use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{BlobError, StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// Describes a file being stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Top-level folder (e.g. `medical-records`).
    pub folder: String,
    /// The entity that owns the file (e.g. a patient ID).
    pub owner_id: String,
    /// File extension without the dot.
    pub extension: String,
    /// MIME type of the content.
    pub content_type: String,
}

impl BlobMetadata {
    /// Creates metadata for a file.
    pub fn new(
        folder: impl Into<String>,
        owner_id: impl Into<String>,
        extension: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            folder: folder.into(),
            owner_id: owner_id.into(),
            extension: extension.into(),
            content_type: content_type.into(),
        }
    }

    /// Generates a fresh storage key for this file.
    pub fn generate_key(&self) -> String {
        format!(
            "{}/{}/{}.{}",
            self.folder,
            self.owner_id,
            Uuid::new_v4(),
            self.extension
        )
    }
}

/// Bytes read back from the blob store.
#[derive(Debug, Clone)]
pub struct Blob {
    /// File content.
    pub data: Bytes,
    /// MIME type derived from the key's extension.
    pub content_type: &'static str,
}

/// Opaque file storage keyed by URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes and returns the file's stable URL.
    async fn put(&self, data: Bytes, metadata: BlobMetadata) -> StorageResult<String>;

    /// Returns a time-limited download URL for a stored file.
    fn get(&self, url: &str) -> StorageResult<String>;

    /// Reads a file through a presigned URL's key, expiry and signature.
    async fn fetch(&self, key: &str, expires: i64, signature: &str) -> StorageResult<Blob>;

    /// Removes a stored file.
    async fn delete(&self, url: &str) -> StorageResult<()>;
}

/// Maps a file extension to the MIME type served for it.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// [`BlobStore`] over any `object_store` implementation.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    base_url: String,
    secret: Vec<u8>,
    presign_ttl: Duration,
}

impl std::fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("store", &self.store.to_string())
            .field("base_url", &self.base_url)
            .field("presign_ttl", &self.presign_ttl)
            .finish_non_exhaustive()
    }
}

impl ObjectBlobStore {
    /// Creates a blob store over an arbitrary object store.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        base_url: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            store,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            presign_ttl,
        }
    }

    /// Creates a blob store that keeps files in memory.
    pub fn in_memory(
        base_url: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        presign_ttl: Duration,
    ) -> Self {
        Self::new(Arc::new(InMemory::new()), base_url, secret, presign_ttl)
    }

    /// Creates a blob store rooted at a local directory, creating it if needed.
    pub fn local(
        root: impl AsRef<FsPath>,
        base_url: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        presign_ttl: Duration,
    ) -> StorageResult<Self> {
        std::fs::create_dir_all(root.as_ref()).map_err(|e| {
            StorageError::Blob(BlobError::Store {
                message: format!(
                    "Failed to create blob root {}: {}",
                    root.as_ref().display(),
                    e
                ),
            })
        })?;
        let store = LocalFileSystem::new_with_prefix(root.as_ref()).map_err(BlobError::from)?;
        Ok(Self::new(Arc::new(store), base_url, secret, presign_ttl))
    }

    fn files_prefix(&self) -> String {
        format!("{}/files/", self.base_url)
    }

    /// Returns the stable URL for a key.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}{}", self.files_prefix(), key)
    }

    /// Extracts the key from a URL issued by this store.
    pub fn key_for(&self, url: &str) -> StorageResult<String> {
        let key = url
            .strip_prefix(&self.files_prefix())
            .map(|rest| rest.split('?').next().unwrap_or_default())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BlobError::InvalidUrl {
                url: url.to_string(),
            })?;
        Ok(key.to_string())
    }

    fn mac(&self, key: &str, expires: i64) -> StorageResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| BlobError::Store {
            message: format!("Invalid signing key: {}", e),
        })?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Builds a presigned URL for `key` that expires at `expires_at`.
    pub fn presign(&self, key: &str, expires_at: DateTime<Utc>) -> StorageResult<String> {
        let expires = expires_at.timestamp();
        let signature = URL_SAFE_NO_PAD.encode(self.mac(key, expires)?.finalize().into_bytes());
        Ok(format!(
            "{}?expires={}&signature={}",
            self.url_for(key),
            expires,
            signature
        ))
    }

    /// Checks a presigned URL's signature and expiry at the given instant.
    pub fn verify(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let invalid = || {
            StorageError::Blob(BlobError::InvalidSignature {
                key: key.to_string(),
            })
        };
        let provided = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
        self.mac(key, expires)?
            .verify_slice(&provided)
            .map_err(|_| invalid())?;
        if now.timestamp() >= expires {
            return Err(invalid());
        }
        Ok(())
    }

    fn location(key: &str) -> StorageResult<Path> {
        Path::parse(key).map_err(|_| {
            StorageError::Blob(BlobError::InvalidUrl {
                url: key.to_string(),
            })
        })
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn put(&self, data: Bytes, metadata: BlobMetadata) -> StorageResult<String> {
        let key = metadata.generate_key();
        let location = Self::location(&key)?;
        let size = data.len();
        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(BlobError::from)?;
        tracing::debug!(key = %key, size, content_type = %metadata.content_type, "Stored blob");
        Ok(self.url_for(&key))
    }

    fn get(&self, url: &str) -> StorageResult<String> {
        let key = self.key_for(url)?;
        self.presign(&key, Utc::now() + self.presign_ttl)
    }

    async fn fetch(&self, key: &str, expires: i64, signature: &str) -> StorageResult<Blob> {
        self.verify(key, expires, signature, Utc::now())?;
        let location = Self::location(key)?;
        let data = self
            .store
            .get(&location)
            .await
            .map_err(BlobError::from)?
            .bytes()
            .await
            .map_err(BlobError::from)?;
        Ok(Blob {
            data,
            content_type: content_type_for(key),
        })
    }

    async fn delete(&self, url: &str) -> StorageResult<()> {
        let key = self.key_for(url)?;
        let location = Self::location(&key)?;
        self.store
            .delete(&location)
            .await
            .map_err(BlobError::from)?;
        Ok(())
    }
}

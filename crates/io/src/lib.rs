#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![forbid(unsafe_code)]

use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;

mod error;
pub use error::{InvalidObjectKey, StorageError};
#[cfg(feature = "storage-in-memory")]
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;

/// Opaque key addressing an object in the storage backend.
///
/// Keys are plain `/`-separated paths relative to the bucket root, e.g.
/// `media/0193e5f2-6f1a-7c32-a3c1-1f2e3d4c5b6a.jpg`.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    derive_more::Display,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidObjectKey> {
        let key = key.into();
        if key.is_empty() || key.starts_with('/') || key.contains("..") {
            return Err(InvalidObjectKey { key });
        }
        Ok(Self(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key-value tags attached to an object at write time.
///
/// Tags are informational only. The reconciler relies on the relational
/// store, never on tags, to decide whether an object is referenced.
pub type ObjectTags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: ObjectKey,
    pub size_bytes: u64,
    pub last_modified: chrono::DateTime<chrono::Utc>,
}

/// One page of a bucket listing. `next_token` is an opaque continuation
/// token; `None` means the listing is exhausted.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub next_token: Option<String>,
}

/// Handle for an in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub key: ObjectKey,
    pub upload_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Storage backend abstraction over an S3-compatible object store.
///
/// Implementations must make `delete` and `abort_multipart` idempotent:
/// deleting an absent key or aborting an already-aborted upload is a no-op,
/// not an error. Cleanup paths are re-run after partial failures and must
/// not trip over work that already happened.
#[async_trait::async_trait]
pub trait ObjectStorage: std::fmt::Debug + Send + Sync + 'static {
    /// Write `bytes` under `key`, replacing any existing object.
    async fn put(
        &self,
        key: &ObjectKey,
        bytes: Bytes,
        content_type: &str,
        tags: &ObjectTags,
    ) -> Result<(), StorageError>;

    async fn get(&self, key: &ObjectKey) -> Result<Bytes, StorageError>;

    /// Delete `key`. Absent keys are a no-op.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StorageError>;

    /// Delete up to 1000 keys in one round trip. Absent keys are a no-op.
    async fn delete_batch(&self, keys: &[ObjectKey]) -> Result<(), StorageError>;

    /// List a page of objects, resuming from `continuation` if given.
    async fn list(
        &self,
        continuation: Option<String>,
        page_size: i32,
    ) -> Result<ListPage, StorageError>;

    async fn initiate_multipart(
        &self,
        key: &ObjectKey,
        content_type: &str,
        tags: &ObjectTags,
    ) -> Result<MultipartUpload, StorageError>;

    /// Presign a single part upload URL. Part numbers start at 1.
    async fn presign_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<url::Url, StorageError>;

    /// Upload one part directly through the backend client.
    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        bytes: Bytes,
    ) -> Result<CompletedPart, StorageError>;

    /// Assemble previously uploaded parts into the final object.
    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError>;

    /// Release backend resources held by an in-progress upload.
    ///
    /// Must succeed when called twice for the same upload and when no part
    /// was ever uploaded, and must leave no object at the target key.
    async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<(), StorageError>;
}

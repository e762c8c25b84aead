//! In-memory [`ObjectStorage`] used by tests and embedded setups.
//!
//! Semantics mirror the S3 backend where it matters for callers: deletes of
//! absent keys succeed, multipart aborts are idempotent, listings are
//! key-ordered and paginated with an opaque continuation token.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{
    CompletedPart, ListPage, MultipartUpload, ObjectInfo, ObjectKey, ObjectStorage, ObjectTags,
    StorageError,
};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
    tags: ObjectTags,
    last_modified: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default)]
struct PendingUpload {
    content_type: String,
    tags: ObjectTags,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    upload_seq: u64,
}

/// Per-operation call counters, for asserting side-effect-freedom in tests.
#[derive(Debug, Default)]
pub struct OpCounters {
    pub put: AtomicUsize,
    pub get: AtomicUsize,
    pub delete: AtomicUsize,
    pub list: AtomicUsize,
    pub initiate_multipart: AtomicUsize,
    pub abort_multipart: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<Inner>>,
    counters: Arc<OpCounters>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counters(&self) -> &OpCounters {
        &self.counters
    }

    /// Number of objects currently stored.
    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.objects.is_empty()
    }

    pub async fn contains(&self, key: &ObjectKey) -> bool {
        self.inner.read().await.objects.contains_key(key)
    }

    /// Backdate an object's `last_modified`, for reconciler threshold tests.
    pub async fn set_last_modified(
        &self,
        key: &ObjectKey,
        last_modified: chrono::DateTime<chrono::Utc>,
    ) {
        if let Some(object) = self.inner.write().await.objects.get_mut(key) {
            object.last_modified = last_modified;
        }
    }

    pub async fn tags_of(&self, key: &ObjectKey) -> Option<ObjectTags> {
        self.inner
            .read()
            .await
            .objects
            .get(key)
            .map(|o| o.tags.clone())
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(
        &self,
        key: &ObjectKey,
        bytes: Bytes,
        content_type: &str,
        tags: &ObjectTags,
    ) -> Result<(), StorageError> {
        self.counters.put.fetch_add(1, Ordering::Relaxed);
        self.inner.write().await.objects.insert(
            key.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                tags: tags.clone(),
                last_modified: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Bytes, StorageError> {
        self.counters.get.fetch_add(1, Ordering::Relaxed);
        self.inner
            .read()
            .await
            .objects
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::NotFound { key: key.clone() })
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StorageError> {
        self.counters.delete.fetch_add(1, Ordering::Relaxed);
        self.inner.write().await.objects.remove(key);
        Ok(())
    }

    async fn delete_batch(&self, keys: &[ObjectKey]) -> Result<(), StorageError> {
        self.counters.delete.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        for key in keys {
            inner.objects.remove(key);
        }
        Ok(())
    }

    async fn list(
        &self,
        continuation: Option<String>,
        page_size: i32,
    ) -> Result<ListPage, StorageError> {
        self.counters.list.fetch_add(1, Ordering::Relaxed);
        let page_size = usize::try_from(page_size.max(1)).unwrap_or(1);
        let inner = self.inner.read().await;

        let objects: Vec<ObjectInfo> = inner
            .objects
            .iter()
            .filter(|(key, _)| {
                continuation
                    .as_deref()
                    .is_none_or(|after| key.as_str() > after)
            })
            .take(page_size)
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size_bytes: object.bytes.len() as u64,
                last_modified: object.last_modified,
            })
            .collect();

        let next_token = if objects.len() == page_size {
            objects.last().map(|o| o.key.as_str().to_string())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn initiate_multipart(
        &self,
        key: &ObjectKey,
        content_type: &str,
        tags: &ObjectTags,
    ) -> Result<MultipartUpload, StorageError> {
        self.counters
            .initiate_multipart
            .fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        inner.upload_seq += 1;
        let upload_id = format!("mem-upload-{}", inner.upload_seq);
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                content_type: content_type.to_string(),
                tags: tags.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(MultipartUpload {
            key: key.clone(),
            upload_id,
        })
    }

    async fn presign_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        _expires_in: Duration,
    ) -> Result<url::Url, StorageError> {
        // Not resolvable over HTTP; callers exercising presigned flows in
        // tests inspect the URL instead of fetching it.
        let url = format!(
            "memory://{}/{}?partNumber={part_number}",
            upload.upload_id,
            upload.key.as_str()
        );
        url::Url::parse(&url).map_err(|e| StorageError::backend("presign_part", &upload.key, e))
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        bytes: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        let mut inner = self.inner.write().await;
        let pending = inner.uploads.get_mut(&upload.upload_id).ok_or_else(|| {
            StorageError::UnknownUpload {
                key: upload.key.clone(),
                upload_id: upload.upload_id.clone(),
            }
        })?;
        let etag = format!("\"etag-{}-{part_number}\"", upload.upload_id);
        pending.parts.insert(part_number, bytes);
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let pending = inner.uploads.remove(&upload.upload_id).ok_or_else(|| {
            StorageError::UnknownUpload {
                key: upload.key.clone(),
                upload_id: upload.upload_id.clone(),
            }
        })?;
        let mut assembled = Vec::new();
        for part in parts {
            let Some(bytes) = pending.parts.get(&part.part_number) else {
                return Err(StorageError::UnknownUpload {
                    key: upload.key.clone(),
                    upload_id: upload.upload_id.clone(),
                });
            };
            assembled.extend_from_slice(bytes);
        }
        inner.objects.insert(
            upload.key.clone(),
            StoredObject {
                bytes: Bytes::from(assembled),
                content_type: pending.content_type,
                tags: pending.tags,
                last_modified: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<(), StorageError> {
        self.counters
            .abort_multipart
            .fetch_add(1, Ordering::Relaxed);
        // Absent upload ids are fine: abort must be idempotent.
        self.inner.write().await.uploads.remove(&upload.upload_id);
        Ok(())
    }
}

//! Shared fixtures for the operation tests.

use std::{
    collections::HashSet,
    io::Cursor,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use galleria_io::{
    memory::MemoryStorage, CompletedPart, ListPage, MultipartUpload, ObjectKey, ObjectStorage,
    ObjectTags, StorageError,
};
use tokio::sync::Mutex;

use crate::{
    implementations::MemoryContentStore,
    service::{
        EventId, EventRecord, MediaId, MediaRecord, SeriesId, SeriesRecord, SessionUser, UserId,
        UserRecord, Visibility,
    },
};

#[cfg(test)]
mod deletion_ops;
#[cfg(test)]
mod policy_ops;
#[cfg(test)]
mod reconciler_ops;

#[must_use]
pub fn user_record(session: SessionUser) -> UserRecord {
    UserRecord {
        id: session.id,
        display_name: format!("user-{}", session.id),
        email: format!("{}@example.com", session.id.simple()),
        handle: format!("handle_{}", &session.id.simple().to_string()[..8]),
        is_global_admin: session.is_global_admin,
        is_banned: session.is_banned,
        avatar_key: None,
    }
}

#[must_use]
pub fn event_record(visibility: Visibility, created_by: UserId) -> EventRecord {
    let id = EventId::new_random();
    EventRecord {
        id,
        series_id: None,
        slug: format!("event-{}", id.simple()),
        name: "Company Offsite".to_string(),
        visibility,
        created_by,
        requires_invite: false,
        invite_code: None,
        banner_key: None,
    }
}

#[must_use]
pub fn series_record(visibility: Visibility, created_by: UserId) -> SeriesRecord {
    SeriesRecord {
        id: SeriesId::new_random(),
        name: "Summer Tour".to_string(),
        visibility,
        created_by,
        banner_key: None,
    }
}

#[must_use]
pub fn media_record(event_id: EventId, uploader_id: UserId) -> MediaRecord {
    let id = MediaId::new_random();
    MediaRecord {
        id,
        event_id,
        uploader_id,
        api_key_id: None,
        original_key: ObjectKey::new(format!("media/{id}.jpg")).unwrap(),
        thumbnail_key: Some(ObjectKey::new(format!("thumbs/{id}.jpg")).unwrap()),
        content_type: "image/jpeg".to_string(),
        size_bytes: 1024,
        width: Some(800),
        height: Some(600),
        metadata: None,
        created_at: chrono::Utc::now(),
    }
}

/// Stores the objects a record references so cascade tests start from a
/// consistent storage state.
pub async fn store_record_objects(storage: &MemoryStorage, record: &MediaRecord) {
    for key in record.object_keys() {
        storage
            .put(
                &key,
                Bytes::from_static(b"payload"),
                &record.content_type,
                &ObjectTags::new(),
            )
            .await
            .unwrap();
    }
}

/// A real, tiny PNG payload.
#[must_use]
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 140, 160]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

/// Storage wrapper that fails `delete` for a configured set of keys,
/// for exercising partial cascade failures.
#[derive(Debug)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_deletes: Mutex<HashSet<ObjectKey>>,
}

impl FlakyStorage {
    #[must_use]
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            fail_deletes: Mutex::new(HashSet::new()),
        }
    }

    pub async fn fail_delete_of(&self, key: ObjectKey) {
        self.fail_deletes.lock().await.insert(key);
    }
}

#[async_trait]
impl ObjectStorage for FlakyStorage {
    async fn put(
        &self,
        key: &ObjectKey,
        bytes: Bytes,
        content_type: &str,
        tags: &ObjectTags,
    ) -> Result<(), StorageError> {
        self.inner.put(key, bytes, content_type, tags).await
    }

    async fn get(&self, key: &ObjectKey) -> Result<Bytes, StorageError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StorageError> {
        if self.fail_deletes.lock().await.contains(key) {
            return Err(StorageError::backend(
                "delete",
                key,
                std::io::Error::other("injected delete failure"),
            ));
        }
        self.inner.delete(key).await
    }

    async fn delete_batch(&self, keys: &[ObjectKey]) -> Result<(), StorageError> {
        self.inner.delete_batch(keys).await
    }

    async fn list(
        &self,
        continuation: Option<String>,
        page_size: i32,
    ) -> Result<ListPage, StorageError> {
        self.inner.list(continuation, page_size).await
    }

    async fn initiate_multipart(
        &self,
        key: &ObjectKey,
        content_type: &str,
        tags: &ObjectTags,
    ) -> Result<MultipartUpload, StorageError> {
        self.inner.initiate_multipart(key, content_type, tags).await
    }

    async fn presign_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        expires_in: std::time::Duration,
    ) -> Result<url::Url, StorageError> {
        self.inner.presign_part(upload, part_number, expires_in).await
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        bytes: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        self.inner.upload_part(upload, part_number, bytes).await
    }

    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        self.inner.complete_multipart(upload, parts).await
    }

    async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<(), StorageError> {
        self.inner.abort_multipart(upload).await
    }
}

/// Store plus storage, seeded together.
#[derive(Debug, Default)]
pub struct TestWorld {
    pub store: Arc<MemoryContentStore>,
    pub storage: Arc<MemoryStorage>,
}

impl TestWorld {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_media(&self, event_id: EventId, uploader_id: UserId) -> MediaRecord {
        let record = media_record(event_id, uploader_id);
        store_record_objects(&self.storage, &record).await;
        self.store.put_media(record.clone()).await;
        record
    }
}

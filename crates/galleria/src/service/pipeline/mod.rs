//! Asset ingestion pipeline.
//!
//! One upload passes through four stages: validate, quota, upload, derive,
//! then the media record is persisted. Derivation is best-effort; a missing
//! thumbnail or missing metadata never fails an upload. What must not
//! happen is a stored object without a record, so a failed persist rolls
//! the uploaded objects back.

pub mod exif;
pub mod heic;
pub mod multipart;
pub mod thumbnail;
pub mod validate;
pub mod video;

pub use multipart::{presign_upload_parts, MultipartError};
pub use validate::{ValidatedUpload, ValidationError};

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use galleria_io::{InvalidObjectKey, ObjectKey, ObjectStorage, ObjectTags, StorageError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::{
    events::EventsPublisher,
    ratelimit::{RateLimitError, RateLimiter},
    ApiKeyId, ContentStore, EventId, MediaId, MediaKind, MediaRecord, SessionUser, StoreError,
};
use crate::{error::ErrorModel, CONFIG};

/// Decimal WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("storage quota exhausted: {used} of {quota} bytes used, upload of {attempted} bytes rejected")]
    QuotaExceeded { used: u64, attempted: u64, quota: u64 },
    #[error(transparent)]
    InvalidKey(#[from] InvalidObjectKey),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("upload canceled")]
    Canceled,
    #[error("persisting the media record failed: {source}")]
    Persist {
        #[source]
        source: StoreError,
    },
}

impl From<MultipartError> for IngestError {
    fn from(value: MultipartError) -> Self {
        match value {
            MultipartError::Storage(e) => Self::Storage(e),
            MultipartError::Canceled => Self::Canceled,
        }
    }
}

impl From<IngestError> for ErrorModel {
    fn from(value: IngestError) -> Self {
        let message = value.to_string();
        match value {
            IngestError::Validation(e) => {
                ErrorModel::bad_request(message, "InvalidUpload", Some(Box::new(e)))
            }
            IngestError::RateLimited(RateLimitError::Limited { .. }) => {
                ErrorModel::too_many_requests(message, "UploadRateLimited", None)
            }
            IngestError::RateLimited(e @ RateLimitError::Unavailable(_)) => {
                ErrorModel::service_unavailable(message, "RateLimitUnavailable", Some(Box::new(e)))
            }
            IngestError::QuotaExceeded { .. } => {
                ErrorModel::payload_too_large(message, "QuotaExceeded", None)
            }
            IngestError::InvalidKey(e) => {
                ErrorModel::internal(message, "InvalidObjectKey", Some(Box::new(e)))
            }
            IngestError::Storage(e) => {
                ErrorModel::bad_gateway(message, "StorageFailure", Some(Box::new(e)))
            }
            IngestError::Canceled => ErrorModel::new(message, "UploadCanceled", 408, None),
            IngestError::Persist { source } => {
                ErrorModel::internal(message, "PersistFailure", Some(Box::new(source)))
            }
        }
    }
}

/// Everything the caller must supply for one upload. Authorization has
/// already happened; the pipeline trusts the event id it is given.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewUpload {
    pub bytes: Bytes,
    #[builder(setter(into))]
    pub content_type: String,
    pub uploader: SessionUser,
    pub event_id: EventId,
    #[builder(default)]
    pub api_key_id: Option<ApiKeyId>,
}

/// Tunables of the pipeline, snapshotted from [`CONFIG`] by default so a
/// long-running pipeline is immune to config reloads mid-upload.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PipelineLimits {
    pub user_quota_bytes: i64,
    pub image_max_bytes: u64,
    pub video_max_bytes: u64,
    pub multipart_threshold_bytes: u64,
    pub multipart_part_bytes: u64,
    pub multipart_max_concurrency: usize,
    pub presign_batch_size: usize,
    pub presign_expiry: std::time::Duration,
    pub thumbnail_max_edge: u32,
    #[builder(setter(into))]
    pub ffmpeg_bin: String,
    #[builder(setter(into))]
    pub ffprobe_bin: String,
    pub heic_timeout: std::time::Duration,
}

impl PipelineLimits {
    #[must_use]
    pub fn from_config() -> Self {
        Self {
            user_quota_bytes: CONFIG.user_quota_bytes,
            image_max_bytes: CONFIG.image_max_bytes,
            video_max_bytes: CONFIG.video_max_bytes,
            multipart_threshold_bytes: CONFIG.multipart_threshold_bytes,
            multipart_part_bytes: CONFIG.multipart_part_bytes,
            multipart_max_concurrency: CONFIG.multipart_max_concurrency,
            presign_batch_size: CONFIG.presign_batch_size,
            presign_expiry: CONFIG.presign_expiry(),
            thumbnail_max_edge: CONFIG.thumbnail_max_edge,
            ffmpeg_bin: CONFIG.ffmpeg_bin.clone(),
            ffprobe_bin: CONFIG.ffprobe_bin.clone(),
            heic_timeout: CONFIG.heic_timeout(),
        }
    }
}

#[derive(Debug, TypedBuilder)]
pub struct AssetPipeline<S> {
    store: Arc<S>,
    storage: Arc<dyn ObjectStorage>,
    #[builder(default = PipelineLimits::from_config())]
    limits: PipelineLimits,
    #[builder(default)]
    rate_limiter: Option<RateLimiter>,
    #[builder(default)]
    publisher: Option<EventsPublisher>,
}

/// What derivation managed to produce. All fields optional by design.
#[derive(Debug, Default)]
struct Derived {
    thumbnail_jpeg: Option<Vec<u8>>,
    width: Option<u32>,
    height: Option<u32>,
    metadata: Option<serde_json::Value>,
}

impl<S: ContentStore> AssetPipeline<S> {
    /// Runs one upload through the full pipeline and returns the persisted
    /// record.
    pub async fn ingest(
        &self,
        upload: NewUpload,
        cancel: &CancellationToken,
    ) -> Result<MediaRecord, IngestError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.check(&format!("upload:{}", upload.uploader.id)).await?;
        }

        let validated = validate::validate(
            &upload.content_type,
            &upload.bytes,
            self.limits.image_max_bytes,
            self.limits.video_max_bytes,
        )?;

        self.check_quota(&upload).await?;

        let media_id = MediaId::new_random();
        let original_key = ObjectKey::new(format!("media/{media_id}.{}", validated.extension))?;
        let tags = self.object_tags(&upload);

        self.upload_original(&upload, &original_key, validated.content_type, &tags, cancel)
            .await?;

        let derived = self.derive(validated.kind, validated.content_type, &upload.bytes).await;

        let thumbnail_key = self
            .store_thumbnail(media_id, derived.thumbnail_jpeg.as_deref(), &tags)
            .await;

        let record = MediaRecord {
            id: media_id,
            event_id: upload.event_id,
            uploader_id: upload.uploader.id,
            api_key_id: upload.api_key_id,
            original_key: original_key.clone(),
            thumbnail_key,
            content_type: validated.content_type.to_string(),
            size_bytes: upload.bytes.len() as u64,
            width: derived.width,
            height: derived.height,
            metadata: derived.metadata,
            created_at: Utc::now(),
        };

        if let Err(source) = self.store.insert_media(&record).await {
            self.rollback_objects(&record).await;
            return Err(IngestError::Persist { source });
        }

        if let Some(publisher) = &self.publisher {
            publisher.media_ingested(&record, upload.uploader.id).await;
        }

        tracing::info!(
            media_id = %record.id,
            event_id = %record.event_id,
            size_bytes = record.size_bytes,
            content_type = %record.content_type,
            "Media ingested"
        );
        Ok(record)
    }

    /// Quota is recomputed from the store on every upload rather than kept
    /// as a counter, trading a query for immunity to drift. Global admins
    /// are exempt, as is a negative configured quota.
    async fn check_quota(&self, upload: &NewUpload) -> Result<(), IngestError> {
        if upload.uploader.is_global_admin || self.limits.user_quota_bytes < 0 {
            return Ok(());
        }
        #[allow(clippy::cast_sign_loss)]
        let quota = self.limits.user_quota_bytes as u64;
        let used = self
            .store
            .media_bytes_used(upload.uploader.id)
            .await
            .map_err(|source| IngestError::Persist { source })?;
        let attempted = upload.bytes.len() as u64;
        if used.saturating_add(attempted) > quota {
            return Err(IngestError::QuotaExceeded {
                used,
                attempted,
                quota,
            });
        }
        Ok(())
    }

    fn object_tags(&self, upload: &NewUpload) -> ObjectTags {
        ObjectTags::from([
            ("uploader".to_string(), upload.uploader.id.to_string()),
            ("event".to_string(), upload.event_id.to_string()),
        ])
    }

    async fn upload_original(
        &self,
        upload: &NewUpload,
        key: &ObjectKey,
        content_type: &str,
        tags: &ObjectTags,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        if upload.bytes.len() as u64 >= self.limits.multipart_threshold_bytes {
            multipart::upload_multipart(
                self.storage.as_ref(),
                key,
                upload.bytes.clone(),
                content_type,
                tags,
                self.limits.multipart_part_bytes,
                self.limits.multipart_max_concurrency,
                cancel,
            )
            .await?;
        } else {
            self.storage
                .put(key, upload.bytes.clone(), content_type, tags)
                .await?;
        }
        Ok(())
    }

    /// Presigns part upload URLs for a client-direct multipart upload,
    /// batching the presign calls per the configured limits.
    pub async fn presign_upload_parts(
        &self,
        upload: &galleria_io::MultipartUpload,
        part_count: usize,
    ) -> Result<Vec<url::Url>, StorageError> {
        multipart::presign_upload_parts(
            self.storage.as_ref(),
            upload,
            part_count,
            self.limits.presign_batch_size,
            self.limits.presign_expiry,
        )
        .await
    }

    async fn derive(&self, kind: MediaKind, content_type: &str, bytes: &Bytes) -> Derived {
        match kind {
            MediaKind::Image => self.derive_image(content_type, bytes).await,
            MediaKind::Video => self.derive_video(bytes).await,
        }
    }

    async fn derive_image(&self, content_type: &str, bytes: &Bytes) -> Derived {
        let mut derived = Derived::default();

        let exif_bytes = bytes.clone();
        let metadata = tokio::task::spawn_blocking(move || exif::extract(&exif_bytes))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "EXIF extraction task failed");
                None
            });
        let orientation = metadata.as_ref().and_then(|m| m.orientation);
        if let Some(metadata) = &metadata {
            derived.metadata = serde_json::to_value(metadata).ok();
        }

        let is_heic = matches!(content_type, "image/heic" | "image/heif");
        let (source, orientation) = if is_heic {
            match heic::convert_to_jpeg(&self.limits.ffmpeg_bin, bytes, self.limits.heic_timeout)
                .await
            {
                // ffmpeg bakes the orientation into the decoded frame.
                Ok(converted) => (converted, None),
                Err(e) => {
                    tracing::warn!(error = %e, "HEIC conversion failed, storing without thumbnail");
                    return derived;
                }
            }
        } else {
            (bytes.clone(), orientation)
        };

        let max_edge = self.limits.thumbnail_max_edge;
        match tokio::task::spawn_blocking(move || {
            thumbnail::derive_image(&source, max_edge, orientation)
        })
        .await
        {
            Ok(Ok(image)) => {
                derived.thumbnail_jpeg = Some(image.thumbnail_jpeg);
                derived.width = Some(image.width);
                derived.height = Some(image.height);
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Image derivation failed, storing without thumbnail");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Image derivation task failed");
            }
        }
        derived
    }

    async fn derive_video(&self, bytes: &Bytes) -> Derived {
        let mut derived = Derived::default();

        match video::probe(&self.limits.ffprobe_bin, bytes).await {
            Ok(metadata) => {
                derived.width = metadata.width;
                derived.height = metadata.height;
                derived.metadata = serde_json::to_value(&metadata).ok();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Video probe failed, storing without metadata");
            }
        }

        match video::extract_poster_frame(&self.limits.ffmpeg_bin, bytes).await {
            Ok(frame) => {
                let max_edge = self.limits.thumbnail_max_edge;
                match tokio::task::spawn_blocking(move || {
                    thumbnail::derive_image(&frame, max_edge, None)
                })
                .await
                {
                    Ok(Ok(image)) => derived.thumbnail_jpeg = Some(image.thumbnail_jpeg),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Poster frame thumbnailing failed");
                    }
                    Err(e) => tracing::warn!(error = %e, "Poster frame task failed"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Poster frame extraction failed, storing without thumbnail");
            }
        }
        derived
    }

    /// Thumbnail storage is best-effort like the rest of derivation.
    async fn store_thumbnail(
        &self,
        media_id: MediaId,
        thumbnail_jpeg: Option<&[u8]>,
        tags: &ObjectTags,
    ) -> Option<ObjectKey> {
        let thumbnail_jpeg = thumbnail_jpeg?;
        let key = match ObjectKey::new(format!("thumbs/{media_id}.jpg")) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid thumbnail key");
                return None;
            }
        };
        match self
            .storage
            .put(
                &key,
                Bytes::from(thumbnail_jpeg.to_vec()),
                "image/jpeg",
                tags,
            )
            .await
        {
            Ok(()) => Some(key),
            Err(e) => {
                tracing::warn!(media_id = %media_id, error = %e, "Failed to store thumbnail");
                None
            }
        }
    }

    /// Removes the objects belonging to a record whose insert failed.
    async fn rollback_objects(&self, record: &MediaRecord) {
        for key in record.object_keys() {
            if let Err(e) = self.storage.delete(&key).await {
                tracing::error!(
                    key = %key,
                    error = %e,
                    "Rollback delete failed, object will be collected by the ghost sweep"
                );
            }
        }
    }
}

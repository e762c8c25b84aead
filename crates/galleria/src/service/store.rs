use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use galleria_io::ObjectKey;
use serde::{Deserialize, Serialize};

use super::{ApiKeyId, EventId, MediaId, SeriesId, UserId, Visibility};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("content store backend failed during `{operation}`: {source}")]
    Backend {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("`{entity}` with id `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("media record `{id}` already exists")]
    DuplicateMedia { id: MediaId },
}

impl StoreError {
    pub fn backend(
        operation: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            operation,
            source: Box::new(source),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    pub handle: String,
    pub is_global_admin: bool,
    pub is_banned: bool,
    pub avatar_key: Option<ObjectKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: SeriesId,
    pub name: String,
    pub visibility: Visibility,
    pub created_by: UserId,
    pub banner_key: Option<ObjectKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub series_id: Option<SeriesId>,
    pub slug: String,
    pub name: String,
    pub visibility: Visibility,
    pub created_by: UserId,
    pub requires_invite: bool,
    pub invite_code: Option<String>,
    pub banner_key: Option<ObjectKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: MediaId,
    pub event_id: EventId,
    pub uploader_id: UserId,
    /// Set when the upload came in through an API key rather than a session.
    pub api_key_id: Option<ApiKeyId>,
    pub original_key: ObjectKey,
    pub thumbnail_key: Option<ObjectKey>,
    pub content_type: String,
    pub size_bytes: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Extracted technical metadata (camera, GPS, duration, ...).
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl MediaRecord {
    /// All object keys owned by this record.
    #[must_use]
    pub fn object_keys(&self) -> Vec<ObjectKey> {
        let mut keys = vec![self.original_key.clone()];
        keys.extend(self.thumbnail_key.clone());
        keys
    }
}

/// Admin relations of one user, fetched in a constant number of queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminMemberships {
    pub series: HashSet<SeriesId>,
    pub events: HashSet<EventId>,
}

/// Relational backing store for users, series, events and media records.
///
/// The store only persists metadata; object payloads live in
/// [`galleria_io::ObjectStorage`]. Implementations must make
/// [`insert_media`](ContentStore::insert_media) atomic so a failed insert
/// never leaves a partial row behind.
#[async_trait]
pub trait ContentStore: std::fmt::Debug + Send + Sync + 'static {
    /// Series and events the user administers. Events the user created and
    /// series the user created count as administered.
    async fn admin_memberships(&self, user: UserId) -> Result<AdminMemberships, StoreError>;

    /// Which of `candidates` the user participates in, resolved in a single
    /// batched lookup.
    async fn participations(
        &self,
        user: UserId,
        candidates: &[EventId],
    ) -> Result<HashSet<EventId>, StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    async fn get_series(&self, id: SeriesId) -> Result<Option<SeriesRecord>, StoreError>;

    async fn get_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError>;

    async fn get_event_by_slug(&self, slug: &str) -> Result<Option<EventRecord>, StoreError>;

    async fn event_participants(&self, event: EventId) -> Result<HashSet<UserId>, StoreError>;

    async fn insert_media(&self, record: &MediaRecord) -> Result<(), StoreError>;

    async fn get_media(&self, id: MediaId) -> Result<Option<MediaRecord>, StoreError>;

    /// Deletes the given media rows. Missing ids are ignored.
    async fn delete_media(&self, ids: &[MediaId]) -> Result<(), StoreError>;

    async fn media_for_event(&self, event: EventId) -> Result<Vec<MediaRecord>, StoreError>;

    async fn media_for_user(&self, user: UserId) -> Result<Vec<MediaRecord>, StoreError>;

    /// Total bytes of stored originals attributed to the user.
    async fn media_bytes_used(&self, user: UserId) -> Result<u64, StoreError>;

    async fn events_in_series(&self, series: SeriesId) -> Result<Vec<EventRecord>, StoreError>;

    async fn events_created_by(&self, user: UserId) -> Result<Vec<EventRecord>, StoreError>;

    async fn series_created_by(&self, user: UserId) -> Result<Vec<SeriesRecord>, StoreError>;

    /// Deletes the event row along with its participations and share links.
    async fn delete_event(&self, id: EventId) -> Result<(), StoreError>;

    async fn delete_series(&self, id: SeriesId) -> Result<(), StoreError>;

    /// Replaces personal fields of the user row with deterministic
    /// placeholders. The row itself survives so foreign keys stay valid.
    async fn anonymize_user(&self, id: UserId) -> Result<(), StoreError>;

    /// Which of `candidates` are referenced by any media original or
    /// thumbnail, user avatar, event banner, series banner or pending
    /// export archive.
    async fn referenced_keys(
        &self,
        candidates: &[ObjectKey],
    ) -> Result<HashSet<ObjectKey>, StoreError>;
}

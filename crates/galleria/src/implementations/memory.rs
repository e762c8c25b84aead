//! In-memory [`ContentStore`], used by the test suite and by single
//! process deployments that do not need a relational database.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use galleria_io::ObjectKey;
use tokio::sync::RwLock;

use crate::service::{
    AdminMemberships, ContentStore, EventId, EventRecord, MediaId, MediaRecord, SeriesId,
    SeriesRecord, StoreError, UserId, UserRecord,
};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<UserId, UserRecord>,
    series: HashMap<SeriesId, SeriesRecord>,
    events: HashMap<EventId, EventRecord>,
    media: HashMap<MediaId, MediaRecord>,
    series_admins: HashMap<SeriesId, HashSet<UserId>>,
    event_admins: HashMap<EventId, HashSet<UserId>>,
    participants: HashMap<EventId, HashSet<UserId>>,
    export_archives: HashMap<EventId, ObjectKey>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryContentStore {
    inner: Arc<RwLock<Inner>>,
    fail_next_insert: Arc<AtomicBool>,
}

impl MemoryContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_user(&self, user: UserRecord) {
        self.inner.write().await.users.insert(user.id, user);
    }

    pub async fn put_series(&self, series: SeriesRecord) {
        self.inner.write().await.series.insert(series.id, series);
    }

    pub async fn put_event(&self, event: EventRecord) {
        self.inner.write().await.events.insert(event.id, event);
    }

    /// Inserts a media row directly, bypassing the failure toggle.
    pub async fn put_media(&self, media: MediaRecord) {
        self.inner.write().await.media.insert(media.id, media);
    }

    pub async fn add_series_admin(&self, series: SeriesId, user: UserId) {
        self.inner
            .write()
            .await
            .series_admins
            .entry(series)
            .or_default()
            .insert(user);
    }

    pub async fn add_event_admin(&self, event: EventId, user: UserId) {
        self.inner
            .write()
            .await
            .event_admins
            .entry(event)
            .or_default()
            .insert(user);
    }

    pub async fn add_participant(&self, event: EventId, user: UserId) {
        self.inner
            .write()
            .await
            .participants
            .entry(event)
            .or_default()
            .insert(user);
    }

    /// Records a pending bulk-export archive for an event. The archive key
    /// counts as referenced until the row is replaced or dropped.
    pub async fn put_export_archive(&self, event: EventId, key: ObjectKey) {
        self.inner.write().await.export_archives.insert(event, key);
    }

    /// Makes the next [`ContentStore::insert_media`] fail, for exercising
    /// the pipeline's rollback path.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    pub async fn media_count(&self) -> usize {
        self.inner.read().await.media.len()
    }

    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn admin_memberships(&self, user: UserId) -> Result<AdminMemberships, StoreError> {
        let inner = self.inner.read().await;
        let mut memberships = AdminMemberships::default();
        for (series_id, admins) in &inner.series_admins {
            if admins.contains(&user) {
                memberships.series.insert(*series_id);
            }
        }
        for (event_id, admins) in &inner.event_admins {
            if admins.contains(&user) {
                memberships.events.insert(*event_id);
            }
        }
        // Creators administer what they created.
        for series in inner.series.values() {
            if series.created_by == user {
                memberships.series.insert(series.id);
            }
        }
        for event in inner.events.values() {
            if event.created_by == user {
                memberships.events.insert(event.id);
            }
        }
        Ok(memberships)
    }

    async fn participations(
        &self,
        user: UserId,
        candidates: &[EventId],
    ) -> Result<HashSet<EventId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(candidates
            .iter()
            .filter(|event| {
                inner
                    .participants
                    .get(event)
                    .is_some_and(|p| p.contains(&user))
            })
            .copied()
            .collect())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn get_series(&self, id: SeriesId) -> Result<Option<SeriesRecord>, StoreError> {
        Ok(self.inner.read().await.series.get(&id).cloned())
    }

    async fn get_event(&self, id: EventId) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.inner.read().await.events.get(&id).cloned())
    }

    async fn get_event_by_slug(&self, slug: &str) -> Result<Option<EventRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .values()
            .find(|e| e.slug == slug)
            .cloned())
    }

    async fn event_participants(&self, event: EventId) -> Result<HashSet<UserId>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .participants
            .get(&event)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_media(&self, record: &MediaRecord) -> Result<(), StoreError> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::backend(
                "insert_media",
                std::io::Error::other("injected insert failure"),
            ));
        }
        let mut inner = self.inner.write().await;
        if inner.media.contains_key(&record.id) {
            return Err(StoreError::DuplicateMedia { id: record.id });
        }
        inner.media.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_media(&self, id: MediaId) -> Result<Option<MediaRecord>, StoreError> {
        Ok(self.inner.read().await.media.get(&id).cloned())
    }

    async fn delete_media(&self, ids: &[MediaId]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for id in ids {
            inner.media.remove(id);
        }
        Ok(())
    }

    async fn media_for_event(&self, event: EventId) -> Result<Vec<MediaRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .media
            .values()
            .filter(|m| m.event_id == event)
            .cloned()
            .collect())
    }

    async fn media_for_user(&self, user: UserId) -> Result<Vec<MediaRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .media
            .values()
            .filter(|m| m.uploader_id == user)
            .cloned()
            .collect())
    }

    async fn media_bytes_used(&self, user: UserId) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .media
            .values()
            .filter(|m| m.uploader_id == user)
            .map(|m| m.size_bytes)
            .sum())
    }

    async fn events_in_series(&self, series: SeriesId) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .values()
            .filter(|e| e.series_id == Some(series))
            .cloned()
            .collect())
    }

    async fn events_created_by(&self, user: UserId) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .values()
            .filter(|e| e.created_by == user)
            .cloned()
            .collect())
    }

    async fn series_created_by(&self, user: UserId) -> Result<Vec<SeriesRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .series
            .values()
            .filter(|s| s.created_by == user)
            .cloned()
            .collect())
    }

    async fn delete_event(&self, id: EventId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.events.remove(&id);
        inner.event_admins.remove(&id);
        inner.participants.remove(&id);
        Ok(())
    }

    async fn delete_series(&self, id: SeriesId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.series.remove(&id);
        inner.series_admins.remove(&id);
        Ok(())
    }

    async fn anonymize_user(&self, id: UserId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("user", id))?;
        let short = id.simple().to_string()[..8].to_string();
        user.display_name = "Deleted User".to_string();
        user.email = format!("deleted+{short}@example.invalid");
        user.handle = format!("deleted_{short}");
        user.is_global_admin = false;
        user.avatar_key = None;
        Ok(())
    }

    async fn referenced_keys(
        &self,
        candidates: &[ObjectKey],
    ) -> Result<HashSet<ObjectKey>, StoreError> {
        let inner = self.inner.read().await;
        let mut referenced: HashSet<&ObjectKey> = HashSet::new();
        for media in inner.media.values() {
            referenced.insert(&media.original_key);
            referenced.extend(media.thumbnail_key.as_ref());
        }
        referenced.extend(inner.users.values().filter_map(|u| u.avatar_key.as_ref()));
        referenced.extend(inner.events.values().filter_map(|e| e.banner_key.as_ref()));
        referenced.extend(inner.series.values().filter_map(|s| s.banner_key.as_ref()));
        referenced.extend(inner.export_archives.values());

        Ok(candidates
            .iter()
            .filter(|key| referenced.contains(key))
            .cloned()
            .collect())
    }
}

//! Cascade deletion of entities and their stored assets.
//!
//! Storage is the source of truth for "gone": a database row is only
//! pruned once its objects are confirmed deleted, and an entity is only
//! deleted once every dependent asset is. The failure modes are explicit:
//! if nothing could be deleted the operation aborts with the entity fully
//! intact, and a partial outcome deletes what succeeded, reports counts
//! and leaves the entity for a retry.

use std::sync::Arc;

use galleria_io::ObjectStorage;
use typed_builder::TypedBuilder;

use super::{
    events::EventsPublisher, ContentStore, EventId, MediaId, MediaRecord, SeriesId, StoreError,
    UserId,
};
use crate::error::ErrorModel;

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("none of the {attempted} dependent assets of {entity} could be deleted; nothing was changed")]
    NothingDeleted { entity: String, attempted: usize },
    #[error("deleted {deleted} of {attempted} dependent assets of {entity}; the entity was kept for retry")]
    Partial {
        entity: String,
        deleted: usize,
        attempted: usize,
        failed_media: Vec<MediaId>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CascadeError> for ErrorModel {
    fn from(value: CascadeError) -> Self {
        let message = value.to_string();
        match value {
            CascadeError::NothingDeleted { .. } => {
                ErrorModel::bad_gateway(message, "CascadeAborted", None)
            }
            CascadeError::Partial { .. } => {
                ErrorModel::bad_gateway(message, "CascadePartialFailure", None)
            }
            CascadeError::Store(e) => {
                ErrorModel::internal(message, "StoreFailure", Some(Box::new(e)))
            }
        }
    }
}

/// Summary of a fully successful cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub deleted_media: Vec<MediaId>,
    pub deleted_events: Vec<EventId>,
    pub deleted_series: Vec<SeriesId>,
}

#[derive(Debug, TypedBuilder)]
pub struct CascadeDeleter<S> {
    store: Arc<S>,
    storage: Arc<dyn ObjectStorage>,
    #[builder(default)]
    publisher: Option<EventsPublisher>,
}

impl<S: ContentStore> CascadeDeleter<S> {
    /// Deletes a batch of media: objects first, then only the rows whose
    /// objects are gone.
    pub async fn delete_media(
        &self,
        media: &[MediaRecord],
        actor: UserId,
    ) -> Result<CascadeOutcome, CascadeError> {
        let (succeeded, failed) = self.delete_assets(media).await;
        self.store.delete_media(&succeeded).await?;

        if let Some(publisher) = &self.publisher {
            for record in media.iter().filter(|m| succeeded.contains(&m.id)) {
                publisher.media_deleted(record.id, record.event_id, actor).await;
            }
        }

        if succeeded.is_empty() && !media.is_empty() {
            return Err(CascadeError::NothingDeleted {
                entity: "media batch".to_string(),
                attempted: media.len(),
            });
        }
        if !failed.is_empty() {
            return Err(CascadeError::Partial {
                entity: "media batch".to_string(),
                deleted: succeeded.len(),
                attempted: media.len(),
                failed_media: failed,
            });
        }
        Ok(CascadeOutcome {
            deleted_media: succeeded,
            ..CascadeOutcome::default()
        })
    }

    /// Deletes an event with all its media and its banner. The event row
    /// goes last, only after every dependent object is confirmed gone.
    pub async fn delete_event(
        &self,
        event_id: EventId,
        actor: UserId,
    ) -> Result<CascadeOutcome, CascadeError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| StoreError::not_found("event", event_id))?;
        let media = self.store.media_for_event(event_id).await?;

        let entity = format!("event {event_id}");
        let (succeeded, failed) = self.delete_assets(&media).await;

        if succeeded.is_empty() && !media.is_empty() {
            // Zero progress: abort with rows and entity untouched.
            return Err(CascadeError::NothingDeleted {
                entity,
                attempted: media.len(),
            });
        }
        self.store.delete_media(&succeeded).await?;
        if !failed.is_empty() {
            return Err(CascadeError::Partial {
                entity,
                deleted: succeeded.len(),
                attempted: media.len(),
                failed_media: failed,
            });
        }

        if let Some(banner) = &event.banner_key {
            if let Err(e) = self.storage.delete(banner).await {
                tracing::warn!(key = %banner, error = %e, "Failed to delete event banner");
                return Err(CascadeError::Partial {
                    entity,
                    deleted: succeeded.len(),
                    attempted: media.len() + 1,
                    failed_media: Vec::new(),
                });
            }
        }

        self.store.delete_event(event_id).await?;
        if let Some(publisher) = &self.publisher {
            publisher.event_deleted(event_id, succeeded.len(), actor).await;
        }
        tracing::info!(event_id = %event_id, media = succeeded.len(), "Event deleted");
        Ok(CascadeOutcome {
            deleted_media: succeeded,
            deleted_events: vec![event_id],
            ..CascadeOutcome::default()
        })
    }

    /// Deletes a series by cascading through its events. The series row
    /// survives unless every event cascade succeeded.
    pub async fn delete_series(
        &self,
        series_id: SeriesId,
        actor: UserId,
    ) -> Result<CascadeOutcome, CascadeError> {
        let series = self
            .store
            .get_series(series_id)
            .await?
            .ok_or_else(|| StoreError::not_found("series", series_id))?;
        let events = self.store.events_in_series(series_id).await?;

        let mut outcome = CascadeOutcome::default();
        let mut failures = 0usize;
        for event in &events {
            match self.delete_event(event.id, actor).await {
                Ok(event_outcome) => {
                    outcome.deleted_media.extend(event_outcome.deleted_media);
                    outcome.deleted_events.extend(event_outcome.deleted_events);
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "Event cascade failed");
                    failures += 1;
                }
            }
        }

        let entity = format!("series {series_id}");
        if failures == events.len() && !events.is_empty() {
            return Err(CascadeError::NothingDeleted {
                entity,
                attempted: events.len(),
            });
        }
        if failures > 0 {
            return Err(CascadeError::Partial {
                entity,
                deleted: events.len() - failures,
                attempted: events.len(),
                failed_media: Vec::new(),
            });
        }

        if let Some(banner) = &series.banner_key {
            if let Err(e) = self.storage.delete(banner).await {
                tracing::warn!(key = %banner, error = %e, "Failed to delete series banner");
                return Err(CascadeError::Partial {
                    entity,
                    deleted: events.len(),
                    attempted: events.len() + 1,
                    failed_media: Vec::new(),
                });
            }
        }

        self.store.delete_series(series_id).await?;
        if let Some(publisher) = &self.publisher {
            publisher
                .series_deleted(series_id, outcome.deleted_events.len(), actor)
                .await;
        }
        outcome.deleted_series.push(series_id);
        Ok(outcome)
    }

    /// Deletes everything a user owns: their media, the events and series
    /// they created, and their avatar. The user row is anonymized only
    /// when every prior step fully succeeded, so a retry after a partial
    /// failure still finds the content to finish the job.
    pub async fn delete_user_content(
        &self,
        user_id: UserId,
        actor: UserId,
    ) -> Result<CascadeOutcome, CascadeError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| StoreError::not_found("user", user_id))?;

        let mut outcome = CascadeOutcome::default();
        let entity = format!("user {user_id}");

        let media = self.store.media_for_user(user_id).await?;
        if !media.is_empty() {
            match self.delete_media(&media, actor).await {
                Ok(media_outcome) => outcome.deleted_media.extend(media_outcome.deleted_media),
                Err(CascadeError::Store(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "User media cascade incomplete");
                    return Err(retag(e, entity));
                }
            }
        }

        let own_series = self.store.series_created_by(user_id).await?;
        let own_series_ids: std::collections::HashSet<_> =
            own_series.iter().map(|series| series.id).collect();

        for event in self.store.events_created_by(user_id).await? {
            // Skip events covered by the series cascade below. Events the
            // user created inside someone else's series are still theirs.
            if event
                .series_id
                .is_some_and(|id| own_series_ids.contains(&id))
            {
                continue;
            }
            let event_outcome = self.delete_event(event.id, actor).await.map_err(|e| {
                tracing::warn!(user_id = %user_id, event_id = %event.id, error = %e, "User event cascade incomplete");
                retag(e, entity.clone())
            })?;
            outcome.deleted_media.extend(event_outcome.deleted_media);
            outcome.deleted_events.extend(event_outcome.deleted_events);
        }

        for series in own_series {
            let series_outcome = self.delete_series(series.id, actor).await.map_err(|e| {
                tracing::warn!(user_id = %user_id, series_id = %series.id, error = %e, "User series cascade incomplete");
                retag(e, entity.clone())
            })?;
            outcome.deleted_media.extend(series_outcome.deleted_media);
            outcome.deleted_events.extend(series_outcome.deleted_events);
            outcome.deleted_series.extend(series_outcome.deleted_series);
        }

        if let Some(avatar) = &user.avatar_key {
            if let Err(e) = self.storage.delete(avatar).await {
                tracing::warn!(key = %avatar, error = %e, "Failed to delete avatar");
                return Err(CascadeError::Partial {
                    entity,
                    deleted: 0,
                    attempted: 1,
                    failed_media: Vec::new(),
                });
            }
        }

        self.store.anonymize_user(user_id).await?;
        if let Some(publisher) = &self.publisher {
            publisher.user_content_deleted(user_id, actor).await;
        }
        tracing::info!(user_id = %user_id, "User content deleted and user anonymized");
        Ok(outcome)
    }

    /// Deletes the stored objects of each record individually and splits
    /// the batch into confirmed-gone and failed. Absent objects count as
    /// deleted; the objects of one record are all-or-nothing.
    async fn delete_assets(&self, media: &[MediaRecord]) -> (Vec<MediaId>, Vec<MediaId>) {
        let mut succeeded = Vec::with_capacity(media.len());
        let mut failed = Vec::new();
        for record in media {
            let mut ok = true;
            for key in record.object_keys() {
                if let Err(e) = self.storage.delete(&key).await {
                    tracing::warn!(media_id = %record.id, key = %key, error = %e, "Asset delete failed");
                    ok = false;
                    break;
                }
            }
            if ok {
                succeeded.push(record.id);
            } else {
                failed.push(record.id);
            }
        }
        (succeeded, failed)
    }
}

fn retag(error: CascadeError, entity: String) -> CascadeError {
    match error {
        CascadeError::NothingDeleted { attempted, .. } => {
            CascadeError::NothingDeleted { entity, attempted }
        }
        CascadeError::Partial {
            deleted,
            attempted,
            failed_media,
            ..
        } => CascadeError::Partial {
            entity,
            deleted,
            attempted,
            failed_media,
        },
        other => other,
    }
}

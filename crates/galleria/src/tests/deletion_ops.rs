use std::sync::Arc;

use bytes::Bytes;
use galleria_io::{memory::MemoryStorage, ObjectKey, ObjectStorage, ObjectTags};
use pretty_assertions::assert_eq;

use crate::{
    implementations::MemoryContentStore,
    service::{
        deletion::{CascadeDeleter, CascadeError},
        ContentStore, EventId, SessionUser, UserId, Visibility,
    },
    tests::{event_record, media_record, series_record, user_record, FlakyStorage, TestWorld},
};

fn deleter(world: &TestWorld) -> CascadeDeleter<MemoryContentStore> {
    CascadeDeleter::builder()
        .store(world.store.clone())
        .storage(world.storage.clone())
        .build()
}

/// Seeds a record's objects through the trait, for storages without the
/// in-memory test helpers.
async fn put_objects(storage: &dyn ObjectStorage, record: &crate::service::MediaRecord) {
    for key in record.object_keys() {
        storage
            .put(&key, Bytes::from_static(b"payload"), "image/jpeg", &ObjectTags::new())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn event_cascade_removes_media_objects_rows_and_event() {
    let world = TestWorld::new();
    let actor = UserId::new_random();
    let mut event = event_record(Visibility::Public, actor);
    let banner = ObjectKey::new(format!("banners/{}.jpg", event.id)).unwrap();
    world
        .storage
        .put(&banner, Bytes::from_static(b"banner"), "image/jpeg", &ObjectTags::new())
        .await
        .unwrap();
    event.banner_key = Some(banner.clone());
    let event_id = event.id;
    world.store.put_event(event).await;
    let first = world.seed_media(event_id, actor).await;
    let second = world.seed_media(event_id, actor).await;

    let outcome = deleter(&world).delete_event(event_id, actor).await.unwrap();

    assert_eq!(outcome.deleted_events, vec![event_id]);
    assert_eq!(outcome.deleted_media.len(), 2);
    assert!(world.storage.is_empty().await);
    assert!(!world.storage.contains(&banner).await);
    assert_eq!(world.store.media_count().await, 0);
    assert_eq!(world.store.event_count().await, 0);
    for record in [first, second] {
        assert!(world.store.get_media(record.id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn cascade_aborts_when_no_asset_could_be_deleted() {
    let store = Arc::new(MemoryContentStore::default());
    let storage = Arc::new(FlakyStorage::new(MemoryStorage::new()));
    let actor = UserId::new_random();
    let event = event_record(Visibility::Public, actor);
    let event_id = event.id;
    store.put_event(event).await;

    let record = media_record(event_id, actor);
    put_objects(storage.as_ref(), &record).await;
    storage.fail_delete_of(record.original_key.clone()).await;
    store.put_media(record.clone()).await;

    let deleter: CascadeDeleter<MemoryContentStore> = CascadeDeleter::builder()
        .store(store.clone())
        .storage(storage.clone())
        .build();
    let result = deleter.delete_event(event_id, actor).await;

    match result {
        Err(CascadeError::NothingDeleted { attempted, .. }) => assert_eq!(attempted, 1),
        other => panic!("expected abort, got {other:?}"),
    }
    // Entity and rows untouched, the retry still finds everything.
    assert!(store.get_event(event_id).await.unwrap().is_some());
    assert!(store.get_media(record.id).await.unwrap().is_some());
    assert!(storage.get(&record.original_key).await.is_ok());
}

#[tokio::test]
async fn partial_cascade_prunes_successes_and_keeps_the_event() {
    let store = Arc::new(MemoryContentStore::default());
    let storage = Arc::new(FlakyStorage::new(MemoryStorage::new()));
    let actor = UserId::new_random();
    let event = event_record(Visibility::Public, actor);
    let event_id = event.id;
    store.put_event(event).await;

    let good = media_record(event_id, actor);
    let bad = media_record(event_id, actor);
    for record in [&good, &bad] {
        put_objects(storage.as_ref(), record).await;
        store.put_media((*record).clone()).await;
    }
    storage.fail_delete_of(bad.original_key.clone()).await;

    let deleter: CascadeDeleter<MemoryContentStore> = CascadeDeleter::builder()
        .store(store.clone())
        .storage(storage.clone())
        .build();
    let result = deleter.delete_event(event_id, actor).await;

    match result {
        Err(CascadeError::Partial {
            deleted,
            attempted,
            failed_media,
            ..
        }) => {
            assert_eq!(deleted, 1);
            assert_eq!(attempted, 2);
            assert_eq!(failed_media, vec![bad.id]);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    // The succeeded record is gone for good, the failed one stays whole.
    assert!(store.get_media(good.id).await.unwrap().is_none());
    assert!(storage.get(&good.original_key).await.is_err());
    assert!(store.get_media(bad.id).await.unwrap().is_some());
    assert!(storage.get(&bad.original_key).await.is_ok());
    assert!(store.get_event(event_id).await.unwrap().is_some());
}

#[tokio::test]
async fn series_cascade_walks_every_event() {
    let world = TestWorld::new();
    let actor = UserId::new_random();
    let series = series_record(Visibility::Public, actor);
    let series_id = series.id;
    world.store.put_series(series).await;

    let mut event_ids = Vec::new();
    for _ in 0..2 {
        let mut event = event_record(Visibility::Public, actor);
        event.series_id = Some(series_id);
        event_ids.push(event.id);
        world.store.put_event(event.clone()).await;
        world.seed_media(event.id, actor).await;
    }

    let outcome = deleter(&world).delete_series(series_id, actor).await.unwrap();

    assert_eq!(outcome.deleted_series, vec![series_id]);
    assert_eq!(outcome.deleted_events.len(), 2);
    assert_eq!(outcome.deleted_media.len(), 2);
    assert!(world.store.get_series(series_id).await.unwrap().is_none());
    for event_id in event_ids {
        assert!(world.store.get_event(event_id).await.unwrap().is_none());
    }
    assert!(world.storage.is_empty().await);
}

#[tokio::test]
async fn user_content_deletion_anonymizes_only_on_full_success() {
    let world = TestWorld::new();
    let actor = UserId::new_random();
    let session = SessionUser::regular(UserId::new_random());
    let mut user = user_record(session);
    let avatar = ObjectKey::new(format!("avatars/{}.jpg", user.id)).unwrap();
    world
        .storage
        .put(&avatar, Bytes::from_static(b"avatar"), "image/jpeg", &ObjectTags::new())
        .await
        .unwrap();
    user.avatar_key = Some(avatar.clone());
    let original_email = user.email.clone();
    world.store.put_user(user).await;

    let series = series_record(Visibility::Public, session.id);
    let series_id = series.id;
    world.store.put_series(series).await;
    let mut series_event = event_record(Visibility::Public, session.id);
    series_event.series_id = Some(series_id);
    world.store.put_event(series_event.clone()).await;
    let standalone = event_record(Visibility::Public, session.id);
    world.store.put_event(standalone.clone()).await;
    world.seed_media(standalone.id, session.id).await;

    let outcome = deleter(&world)
        .delete_user_content(session.id, actor)
        .await
        .unwrap();

    assert_eq!(outcome.deleted_series, vec![series_id]);
    assert_eq!(outcome.deleted_events.len(), 2);
    assert!(!world.storage.contains(&avatar).await);
    assert!(world.storage.is_empty().await);

    let anonymized = world.store.get_user(session.id).await.unwrap().unwrap();
    assert_eq!(anonymized.display_name, "Deleted User");
    assert!(anonymized.email.ends_with("@example.invalid"));
    assert_ne!(anonymized.email, original_email);
    assert!(anonymized.avatar_key.is_none());
}

#[tokio::test]
async fn user_stays_intact_when_their_media_cascade_fails() {
    let store = Arc::new(MemoryContentStore::default());
    let storage = Arc::new(FlakyStorage::new(MemoryStorage::new()));
    let actor = UserId::new_random();
    let session = SessionUser::regular(UserId::new_random());
    let user = user_record(session);
    let original_name = user.display_name.clone();
    store.put_user(user).await;

    let record = media_record(EventId::new_random(), session.id);
    put_objects(storage.as_ref(), &record).await;
    storage.fail_delete_of(record.original_key.clone()).await;
    store.put_media(record.clone()).await;

    let deleter: CascadeDeleter<MemoryContentStore> = CascadeDeleter::builder()
        .store(store.clone())
        .storage(storage.clone())
        .build();
    let result = deleter.delete_user_content(session.id, actor).await;

    assert!(matches!(result, Err(CascadeError::NothingDeleted { .. })));
    let user = store.get_user(session.id).await.unwrap().unwrap();
    assert_eq!(user.display_name, original_name);
    assert!(store.get_media(record.id).await.unwrap().is_some());
}

#[tokio::test]
async fn user_event_inside_a_foreign_series_is_still_deleted() {
    let world = TestWorld::new();
    let actor = UserId::new_random();
    let session = SessionUser::regular(UserId::new_random());
    world.store.put_user(user_record(session)).await;

    let owner = UserId::new_random();
    let foreign_series = series_record(Visibility::Public, owner);
    let foreign_series_id = foreign_series.id;
    world.store.put_series(foreign_series).await;

    // The user's own event, hosted under someone else's series.
    let mut guest_event = event_record(Visibility::Public, session.id);
    guest_event.series_id = Some(foreign_series_id);
    let guest_event_id = guest_event.id;
    world.store.put_event(guest_event).await;
    world.seed_media(guest_event_id, session.id).await;

    // A sibling event by the series owner must survive.
    let mut owner_event = event_record(Visibility::Public, owner);
    owner_event.series_id = Some(foreign_series_id);
    let owner_event_id = owner_event.id;
    world.store.put_event(owner_event).await;

    let outcome = deleter(&world)
        .delete_user_content(session.id, actor)
        .await
        .unwrap();

    assert_eq!(outcome.deleted_events, vec![guest_event_id]);
    assert!(outcome.deleted_series.is_empty());
    assert!(world.store.get_event(guest_event_id).await.unwrap().is_none());
    assert!(world.store.get_event(owner_event_id).await.unwrap().is_some());
    assert!(world
        .store
        .get_series(foreign_series_id)
        .await
        .unwrap()
        .is_some());
    assert!(world.storage.is_empty().await);
}

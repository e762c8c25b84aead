use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use galleria_io::{ObjectKey, ObjectStorage, ObjectTags};
use pretty_assertions::assert_eq;

use crate::{
    implementations::MemoryContentStore,
    service::{
        reconciler::{GhostFileReconciler, SweepOptions},
        EventId, UserId,
    },
    tests::TestWorld,
};

fn reconciler(
    world: &TestWorld,
    min_age_hours: i64,
    page_size: i32,
) -> GhostFileReconciler<MemoryContentStore> {
    GhostFileReconciler::builder()
        .store(world.store.clone())
        .storage(world.storage.clone())
        .time_budget(Duration::from_secs(15))
        .min_age_hours(min_age_hours)
        .page_size(page_size)
        .build()
}

async fn put_ghost(world: &TestWorld, key: &str, age_hours: i64) -> ObjectKey {
    let key = ObjectKey::new(key).unwrap();
    world
        .storage
        .put(&key, Bytes::from_static(b"orphan"), "image/jpeg", &ObjectTags::new())
        .await
        .unwrap();
    world
        .storage
        .set_last_modified(&key, Utc::now() - chrono::Duration::hours(age_hours))
        .await;
    key
}

#[tokio::test]
async fn sweep_deletes_old_unreferenced_objects_only() {
    let world = TestWorld::new();
    let referenced = world
        .seed_media(EventId::new_random(), UserId::new_random())
        .await;
    for key in referenced.object_keys() {
        world
            .storage
            .set_last_modified(&key, Utc::now() - chrono::Duration::hours(48))
            .await;
    }
    let old_ghost = put_ghost(&world, "media/ghost-old.jpg", 48).await;
    let young_ghost = put_ghost(&world, "media/ghost-young.jpg", 1).await;

    let outcome = reconciler(&world, 24, 1000)
        .sweep(SweepOptions::default())
        .await
        .unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.deleted, 1);
    assert!(!world.storage.contains(&old_ghost).await);
    assert!(world.storage.contains(&young_ghost).await);
    assert!(world.storage.contains(&referenced.original_key).await);
}

#[tokio::test]
async fn force_sweep_ignores_the_age_threshold() {
    let world = TestWorld::new();
    let young_ghost = put_ghost(&world, "media/ghost-young.jpg", 1).await;

    let outcome = reconciler(&world, 24, 1000)
        .sweep(SweepOptions {
            cursor: None,
            force: true,
        })
        .await
        .unwrap();

    assert_eq!(outcome.deleted, 1);
    assert!(!world.storage.contains(&young_ghost).await);
}

#[tokio::test]
async fn exhausted_budget_returns_a_cursor_that_resumes() {
    let world = TestWorld::new();
    for i in 0..10 {
        put_ghost(&world, &format!("media/ghost-{i:02}.jpg"), 48).await;
    }

    // Page size 3 with a zero budget stops after the first page.
    let reconciler = GhostFileReconciler::builder()
        .store(world.store.clone())
        .storage(world.storage.clone())
        .time_budget(Duration::ZERO)
        .min_age_hours(24)
        .page_size(3)
        .build();

    let first = reconciler.sweep(SweepOptions::default()).await.unwrap();
    assert!(!first.completed);
    assert_eq!(first.checked, 3);
    assert_eq!(first.deleted, 3);
    let cursor = first.next_cursor.clone().expect("continuation cursor");

    let second = reconciler
        .sweep(SweepOptions {
            cursor: Some(cursor),
            force: false,
        })
        .await
        .unwrap();
    assert_eq!(second.checked, 3);
    assert!(world.storage.len().await > 0);
}

#[tokio::test]
async fn sweep_to_completion_drains_every_page() {
    let world = TestWorld::new();
    for i in 0..10 {
        put_ghost(&world, &format!("media/ghost-{i:02}.jpg"), 48).await;
    }
    let referenced = world
        .seed_media(EventId::new_random(), UserId::new_random())
        .await;
    for key in referenced.object_keys() {
        world
            .storage
            .set_last_modified(&key, Utc::now() - chrono::Duration::hours(48))
            .await;
    }

    let reconciler = GhostFileReconciler::builder()
        .store(world.store.clone())
        .storage(world.storage.clone())
        .time_budget(Duration::ZERO)
        .min_age_hours(24)
        .page_size(3)
        .build();

    let outcome = reconciler.sweep_to_completion(false).await.unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.deleted, 10);
    assert_eq!(world.storage.len().await, 2);
    assert!(world.storage.contains(&referenced.original_key).await);
}

#[tokio::test]
async fn empty_storage_completes_immediately() {
    let world = TestWorld::new();
    let outcome = reconciler(&world, 24, 1000)
        .sweep(SweepOptions::default())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        crate::service::reconciler::SweepOutcome {
            checked: 0,
            deleted: 0,
            next_cursor: None,
            completed: true,
        }
    );
}

#[tokio::test]
async fn export_archive_keys_are_never_swept() {
    let world = TestWorld::new();
    let archive = ObjectKey::new("exports/event-album.zip").unwrap();
    world
        .storage
        .put(&archive, Bytes::from_static(b"zip"), "application/zip", &ObjectTags::new())
        .await
        .unwrap();
    world
        .storage
        .set_last_modified(&archive, Utc::now() - chrono::Duration::hours(48))
        .await;
    world
        .store
        .put_export_archive(EventId::new_random(), archive.clone())
        .await;
    let ghost = put_ghost(&world, "exports/stale.zip", 48).await;

    let outcome = reconciler(&world, 24, 1000)
        .sweep(SweepOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.deleted, 1);
    assert!(world.storage.contains(&archive).await);
    assert!(!world.storage.contains(&ghost).await);
}

use std::collections::HashSet;

use pretty_assertions::assert_eq;

use crate::{
    service::{
        authz::{
            accessible_event_ids, can, get_user_context, Action, EventResource,
            EventVisibilityInfo, Resource,
        },
        ContentStore, EventId, SessionUser, UserId, Visibility,
    },
    tests::{event_record, series_record, TestWorld},
};

struct Candidates {
    public: EventId,
    auth_required: EventId,
    unlisted: EventId,
    unlisted_in_series: EventId,
    all: Vec<EventVisibilityInfo>,
}

async fn seed_candidates(world: &TestWorld, series_owner: UserId) -> Candidates {
    let series = series_record(Visibility::Public, series_owner);
    let series_id = series.id;
    world.store.put_series(series).await;

    let owner = UserId::new_random();
    let public = event_record(Visibility::Public, owner);
    let auth_required = event_record(Visibility::AuthRequired, owner);
    let unlisted = event_record(Visibility::Unlisted, owner);
    let mut unlisted_in_series = event_record(Visibility::Unlisted, owner);
    unlisted_in_series.series_id = Some(series_id);

    let candidates = Candidates {
        public: public.id,
        auth_required: auth_required.id,
        unlisted: unlisted.id,
        unlisted_in_series: unlisted_in_series.id,
        all: [&public, &auth_required, &unlisted, &unlisted_in_series]
            .iter()
            .map(|e| EventVisibilityInfo {
                id: e.id,
                visibility: e.visibility,
                series_id: e.series_id,
            })
            .collect(),
    };
    for event in [public, auth_required, unlisted, unlisted_in_series] {
        world.store.put_event(event).await;
    }
    candidates
}

#[tokio::test]
async fn anonymous_bulk_listing_contains_only_public() {
    let world = TestWorld::new();
    let candidates = seed_candidates(&world, UserId::new_random()).await;

    let visible = accessible_event_ids(world.store.as_ref(), None, &candidates.all)
        .await
        .unwrap();
    assert_eq!(visible, HashSet::from_iter([candidates.public]));
}

#[tokio::test]
async fn banned_user_gets_the_anonymous_result_set() {
    let world = TestWorld::new();
    let candidates = seed_candidates(&world, UserId::new_random()).await;
    let mut banned = SessionUser::regular(UserId::new_random());
    banned.is_banned = true;

    let visible = accessible_event_ids(world.store.as_ref(), Some(&banned), &candidates.all)
        .await
        .unwrap();
    assert_eq!(visible, HashSet::from_iter([candidates.public]));
}

#[tokio::test]
async fn authenticated_user_adds_auth_required_events() {
    let world = TestWorld::new();
    let candidates = seed_candidates(&world, UserId::new_random()).await;
    let user = SessionUser::regular(UserId::new_random());

    let visible = accessible_event_ids(world.store.as_ref(), Some(&user), &candidates.all)
        .await
        .unwrap();
    assert_eq!(
        visible,
        HashSet::from_iter([candidates.public, candidates.auth_required])
    );
}

#[tokio::test]
async fn participant_sees_their_unlisted_event_in_bulk() {
    let world = TestWorld::new();
    let candidates = seed_candidates(&world, UserId::new_random()).await;
    let user = SessionUser::regular(UserId::new_random());
    world
        .store
        .add_participant(candidates.unlisted, user.id)
        .await;

    let visible = accessible_event_ids(world.store.as_ref(), Some(&user), &candidates.all)
        .await
        .unwrap();
    assert!(visible.contains(&candidates.unlisted));
    assert!(!visible.contains(&candidates.unlisted_in_series));
}

#[tokio::test]
async fn series_admin_sees_nested_unlisted_events() {
    let world = TestWorld::new();
    let series_owner = UserId::new_random();
    let candidates = seed_candidates(&world, series_owner).await;
    let owner_session = SessionUser::regular(series_owner);

    let visible =
        accessible_event_ids(world.store.as_ref(), Some(&owner_session), &candidates.all)
            .await
            .unwrap();
    assert!(visible.contains(&candidates.unlisted_in_series));
    assert!(!visible.contains(&candidates.unlisted));
}

#[tokio::test]
async fn global_admin_sees_every_candidate() {
    let world = TestWorld::new();
    let candidates = seed_candidates(&world, UserId::new_random()).await;
    let admin = SessionUser::global_admin(UserId::new_random());

    let visible = accessible_event_ids(world.store.as_ref(), Some(&admin), &candidates.all)
        .await
        .unwrap();
    assert_eq!(visible.len(), candidates.all.len());
}

/// Single-item `can(view)` decisions and the bulk resolver must agree:
/// every event `can` grants is in the bulk set and vice versa.
#[tokio::test]
async fn bulk_listing_agrees_with_single_item_checks() {
    let world = TestWorld::new();
    let series_owner = UserId::new_random();
    let candidates = seed_candidates(&world, series_owner).await;

    let participant = SessionUser::regular(UserId::new_random());
    world
        .store
        .add_participant(candidates.unlisted, participant.id)
        .await;

    let sessions = [
        SessionUser::regular(UserId::new_random()),
        SessionUser::regular(series_owner),
        participant,
        SessionUser::global_admin(UserId::new_random()),
    ];

    for session in sessions {
        let context = get_user_context(world.store.as_ref(), session).await.unwrap();
        let bulk = accessible_event_ids(world.store.as_ref(), Some(&session), &candidates.all)
            .await
            .unwrap();
        for info in &candidates.all {
            let record = world.store.get_event(info.id).await.unwrap().unwrap();
            let participants = world.store.event_participants(info.id).await.unwrap();
            let resource =
                Resource::Event(EventResource::from_record(&record, participants));
            let single = can(Some(&context), Action::View, &resource);
            assert_eq!(
                single,
                bulk.contains(&info.id),
                "single and bulk disagree for event {} and user {}",
                info.id,
                session.id
            );
        }
    }
}

#[tokio::test]
async fn user_context_resolves_created_entities_as_administered() {
    let world = TestWorld::new();
    let creator = SessionUser::regular(UserId::new_random());
    let event = event_record(Visibility::Unlisted, creator.id);
    let event_id = event.id;
    world.store.put_event(event).await;

    let context = get_user_context(world.store.as_ref(), creator).await.unwrap();
    assert!(context.administers_event(event_id));
    assert!(!context.is_global_admin());
}

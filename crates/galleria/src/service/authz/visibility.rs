use std::collections::HashSet;

use crate::service::{ContentStore, EventId, SeriesId, SessionUser, StoreError, Visibility};

/// Visibility tuple of one candidate event, as loaded by a listing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventVisibilityInfo {
    pub id: EventId,
    pub visibility: Visibility,
    pub series_id: Option<SeriesId>,
}

/// Filters `candidates` down to the events the actor may see in bulk
/// listings.
///
/// Agrees with the single-item view rule: any event for which
/// [`can`](super::can) grants `view` is included. The whole resolution
/// costs a constant number of store queries regardless of candidate count;
/// participation is fetched in one batched lookup.
///
/// Banned actors are reduced to the anonymous result set. Unlisted events
/// reachable only through an invite code never show up here; the direct
/// link is the way in.
pub async fn accessible_event_ids<S: ContentStore + ?Sized>(
    store: &S,
    actor: Option<&SessionUser>,
    candidates: &[EventVisibilityInfo],
) -> Result<HashSet<EventId>, StoreError> {
    let public: HashSet<EventId> = candidates
        .iter()
        .filter(|c| c.visibility == Visibility::Public)
        .map(|c| c.id)
        .collect();

    let Some(actor) = actor else {
        return Ok(public);
    };
    if actor.is_banned {
        return Ok(public);
    }
    if actor.is_global_admin {
        return Ok(candidates.iter().map(|c| c.id).collect());
    }

    let memberships = store.admin_memberships(actor.id).await?;
    let candidate_ids: Vec<EventId> = candidates
        .iter()
        .filter(|c| c.visibility == Visibility::Unlisted)
        .map(|c| c.id)
        .collect();
    let joined = store.participations(actor.id, &candidate_ids).await?;

    Ok(candidates
        .iter()
        .filter(|c| match c.visibility {
            Visibility::Public | Visibility::AuthRequired => true,
            Visibility::Unlisted => {
                memberships.events.contains(&c.id)
                    || c.series_id
                        .is_some_and(|series| memberships.series.contains(&series))
                    || joined.contains(&c.id)
            }
        })
        .map(|c| c.id)
        .collect())
}

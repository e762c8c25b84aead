use std::collections::HashSet;

use crate::service::{ContentStore, EventId, SeriesId, SessionUser, StoreError, UserId};

/// A session user enriched with their admin relations.
///
/// Built once per request via [`get_user_context`] so that every subsequent
/// [`can`](super::can) call answers membership questions in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    session: SessionUser,
    series_admin: HashSet<SeriesId>,
    event_admin: HashSet<EventId>,
}

impl UserContext {
    #[must_use]
    pub fn new(
        session: SessionUser,
        series_admin: HashSet<SeriesId>,
        event_admin: HashSet<EventId>,
    ) -> Self {
        Self {
            session,
            series_admin,
            event_admin,
        }
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.session.id
    }

    #[must_use]
    pub fn is_global_admin(&self) -> bool {
        self.session.is_global_admin
    }

    #[must_use]
    pub fn is_banned(&self) -> bool {
        self.session.is_banned
    }

    #[must_use]
    pub fn administers_series(&self, series: SeriesId) -> bool {
        self.series_admin.contains(&series)
    }

    #[must_use]
    pub fn administers_event(&self, event: EventId) -> bool {
        self.event_admin.contains(&event)
    }

    #[must_use]
    pub fn session(&self) -> &SessionUser {
        &self.session
    }
}

/// Resolves the admin memberships of the session user in a constant number
/// of store queries.
pub async fn get_user_context<S: ContentStore + ?Sized>(
    store: &S,
    session: SessionUser,
) -> Result<UserContext, StoreError> {
    let memberships = store.admin_memberships(session.id).await?;
    Ok(UserContext::new(
        session,
        memberships.series,
        memberships.events,
    ))
}

//! Central authorization policy.
//!
//! Every permission decision in the platform goes through [`can`]. The
//! policy is default-deny: an action is allowed only when a rule explicitly
//! grants it, and unknown combinations of action and resource fall through
//! to `false`.

mod context;
mod visibility;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::EnumIter;
use strum_macros::EnumString;

pub use context::{get_user_context, UserContext};
pub use visibility::{accessible_event_ids, EventVisibilityInfo};

use super::{ApiKeyId, EventId, EventRecord, MediaId, MediaRecord, SeriesId, UserId, Visibility};
use crate::error::ErrorModel;

#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    strum_macros::Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
    /// Administrative control over the resource, implies all of the above.
    Manage,
    Join,
    Leave,
    Upload,
}

/// Everything the event authorization rules need, resolved by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct EventResource {
    pub id: EventId,
    pub series_id: Option<SeriesId>,
    pub visibility: Visibility,
    pub created_by: UserId,
    pub requires_invite: bool,
    /// The code stored on the event, if invites are configured.
    pub invite_code: Option<String>,
    /// The code the caller supplied with a join request, if any.
    pub supplied_invite_code: Option<String>,
    pub participants: HashSet<UserId>,
}

impl EventResource {
    #[must_use]
    pub fn from_record(record: &EventRecord, participants: HashSet<UserId>) -> Self {
        Self {
            id: record.id,
            series_id: record.series_id,
            visibility: record.visibility,
            created_by: record.created_by,
            requires_invite: record.requires_invite,
            invite_code: record.invite_code.clone(),
            supplied_invite_code: None,
            participants,
        }
    }

    #[must_use]
    pub fn with_supplied_invite_code(mut self, code: impl Into<String>) -> Self {
        self.supplied_invite_code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesResource {
    pub id: SeriesId,
    pub visibility: Visibility,
    pub created_by: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaResource {
    pub id: MediaId,
    pub uploader_id: UserId,
    pub api_key_id: Option<ApiKeyId>,
    /// The event the media belongs to; media inherit its visibility.
    pub event: EventResource,
}

impl MediaResource {
    #[must_use]
    pub fn from_record(record: &MediaRecord, event: EventResource) -> Self {
        Self {
            id: record.id,
            uploader_id: record.uploader_id,
            api_key_id: record.api_key_id,
            event,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiKeyResource {
    pub id: ApiKeyId,
    pub owner_id: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShareLinkResource {
    pub event: EventResource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MentionResource {
    pub mentioned_user: UserId,
    pub media: MediaResource,
}

/// The closed set of things [`can`] knows how to authorize.
///
/// Each variant carries exactly the fields its rules consume, so call sites
/// cannot pass an under-specified resource and a new resource kind forces
/// every match in this module to be extended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Series(SeriesResource),
    Event(EventResource),
    Media(MediaResource),
    ApiKey(ApiKeyResource),
    ShareLink(ShareLinkResource),
    Mention(MentionResource),
    /// Content reports; individual report rows carry no per-row rule inputs.
    Report,
    /// The global tag vocabulary.
    Tag,
    /// Storage administration (quota overviews, sweeps).
    Storage,
}

impl Resource {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Series(_) => "series",
            Resource::Event(_) => "event",
            Resource::Media(_) => "media",
            Resource::ApiKey(_) => "api_key",
            Resource::ShareLink(_) => "share_link",
            Resource::Mention(_) => "mention",
            Resource::Report => "report",
            Resource::Tag => "tag",
            Resource::Storage => "storage",
        }
    }
}

/// Single entry point for permission checks.
///
/// `actor` is `None` for anonymous visitors. Banned users are denied
/// everything, checked once before any rule runs.
#[must_use]
pub fn can(actor: Option<&UserContext>, action: Action, resource: &Resource) -> bool {
    if actor.is_some_and(UserContext::is_banned) {
        return false;
    }
    match resource {
        Resource::Series(series) => series_allows(actor, action, series),
        Resource::Event(event) => event_allows(actor, action, event),
        Resource::Media(media) => media_allows(actor, action, media),
        Resource::ApiKey(key) => api_key_allows(actor, action, key),
        Resource::ShareLink(link) => share_link_allows(actor, action, link),
        Resource::Mention(mention) => mention_allows(actor, action, mention),
        Resource::Report => report_allows(actor, action),
        Resource::Tag => tag_allows(actor, action),
        Resource::Storage => actor.is_some_and(UserContext::is_global_admin),
    }
}

/// [`can`] with the 401/403 distinction the API layer needs.
///
/// Error messages stay generic on purpose so a denied caller cannot probe
/// for resource existence.
pub fn require(
    actor: Option<&UserContext>,
    action: Action,
    resource: &Resource,
) -> Result<(), ErrorModel> {
    if can(actor, action, resource) {
        return Ok(());
    }
    let message = format!("Not authorized to {action} {}", resource.kind());
    if actor.is_none() {
        Err(ErrorModel::unauthorized(message, "Unauthenticated", None))
    } else {
        Err(ErrorModel::forbidden(message, "Forbidden", None))
    }
}

/// Whether the actor has administrative control over the event: global
/// admin, admin of the parent series, event admin or event creator.
#[must_use]
pub fn manages_event(actor: &UserContext, event: &EventResource) -> bool {
    actor.is_global_admin()
        || actor.administers_event(event.id)
        || event
            .series_id
            .is_some_and(|series| actor.administers_series(series))
        || event.created_by == actor.id()
}

fn manages_series(actor: &UserContext, series: &SeriesResource) -> bool {
    actor.is_global_admin()
        || actor.administers_series(series.id)
        || series.created_by == actor.id()
}

fn can_view_event(actor: Option<&UserContext>, event: &EventResource) -> bool {
    match event.visibility {
        Visibility::Public => true,
        Visibility::AuthRequired => actor.is_some(),
        Visibility::Unlisted => actor.is_some_and(|actor| {
            manages_event(actor, event) || event.participants.contains(&actor.id())
        }),
    }
}

fn event_allows(actor: Option<&UserContext>, action: Action, event: &EventResource) -> bool {
    match action {
        Action::View => can_view_event(actor, event),
        Action::Create => actor.is_some(),
        Action::Update | Action::Delete | Action::Manage => {
            actor.is_some_and(|actor| manages_event(actor, event))
        }
        Action::Join => actor.is_some_and(|actor| join_allowed(actor, event)),
        Action::Leave => actor.is_some_and(|actor| event.participants.contains(&actor.id())),
        Action::Upload => actor.is_some_and(|actor| {
            manages_event(actor, event) || event.participants.contains(&actor.id())
        }),
    }
}

/// Possession of a direct reference is the gate for unlisted events, so
/// joining is decided by the invite rule alone. The stored and supplied
/// codes must match exactly; an event that requires an invite but has no
/// code configured is unjoinable except for its admins.
fn join_allowed(actor: &UserContext, event: &EventResource) -> bool {
    if !event.requires_invite || manages_event(actor, event) {
        return true;
    }
    match (&event.invite_code, &event.supplied_invite_code) {
        (Some(stored), Some(supplied)) => stored == supplied,
        _ => false,
    }
}

fn series_allows(actor: Option<&UserContext>, action: Action, series: &SeriesResource) -> bool {
    match action {
        Action::View => match series.visibility {
            Visibility::Public => true,
            Visibility::AuthRequired => actor.is_some(),
            Visibility::Unlisted => actor.is_some_and(|actor| manages_series(actor, series)),
        },
        Action::Create => actor.is_some(),
        Action::Update | Action::Delete | Action::Manage => {
            actor.is_some_and(|actor| manages_series(actor, series))
        }
        Action::Join | Action::Leave | Action::Upload => false,
    }
}

fn media_allows(actor: Option<&UserContext>, action: Action, media: &MediaResource) -> bool {
    match action {
        // Media inherit the visibility of their event.
        Action::View => can_view_event(actor, &media.event),
        Action::Update | Action::Delete => actor.is_some_and(|actor| {
            media.uploader_id == actor.id() || manages_event(actor, &media.event)
        }),
        Action::Manage => actor.is_some_and(|actor| manages_event(actor, &media.event)),
        Action::Create | Action::Join | Action::Leave | Action::Upload => false,
    }
}

fn api_key_allows(actor: Option<&UserContext>, action: Action, key: &ApiKeyResource) -> bool {
    match action {
        Action::View | Action::Create | Action::Update | Action::Delete | Action::Manage => {
            actor.is_some_and(|actor| actor.id() == key.owner_id || actor.is_global_admin())
        }
        Action::Join | Action::Leave | Action::Upload => false,
    }
}

fn share_link_allows(
    actor: Option<&UserContext>,
    action: Action,
    link: &ShareLinkResource,
) -> bool {
    match action {
        Action::View => can_view_event(actor, &link.event),
        Action::Create | Action::Delete | Action::Manage => {
            actor.is_some_and(|actor| manages_event(actor, &link.event))
        }
        _ => false,
    }
}

fn mention_allows(actor: Option<&UserContext>, action: Action, mention: &MentionResource) -> bool {
    match action {
        Action::View => can_view_event(actor, &mention.media.event),
        Action::Create => actor.is_some_and(|actor| {
            can_view_event(Some(actor), &mention.media.event)
                && mention.media.event.participants.contains(&actor.id())
        }),
        Action::Delete => actor.is_some_and(|actor| {
            actor.id() == mention.mentioned_user
                || actor.id() == mention.media.uploader_id
                || manages_event(actor, &mention.media.event)
        }),
        _ => false,
    }
}

fn report_allows(actor: Option<&UserContext>, action: Action) -> bool {
    match action {
        Action::Create => actor.is_some(),
        Action::View | Action::Update | Action::Delete | Action::Manage => {
            actor.is_some_and(UserContext::is_global_admin)
        }
        _ => false,
    }
}

fn tag_allows(actor: Option<&UserContext>, action: Action) -> bool {
    match action {
        Action::View => true,
        Action::Create | Action::Update | Action::Delete | Action::Manage => {
            actor.is_some_and(UserContext::is_global_admin)
        }
        _ => false,
    }
}

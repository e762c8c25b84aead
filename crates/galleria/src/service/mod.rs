pub mod authz;
pub mod deletion;
pub mod events;
pub mod pipeline;
pub mod ratelimit;
pub mod reconciler;
mod store;

pub use store::{
    AdminMemberships, ContentStore, EventRecord, MediaRecord, SeriesRecord, StoreError, UserRecord,
};

use std::{fmt::Display, ops::Deref, str::FromStr};

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::ErrorModel;

macro_rules! define_id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            #[must_use]
            pub fn new(id: uuid::Uuid) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn new_random() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// Parses the ID from a string
            ///
            /// # Errors
            /// Returns `ErrorModel` with `BAD_REQUEST` status code if the string is not a valid
            /// UUID
            pub fn from_str_or_bad_request(s: &str) -> Result<Self, ErrorModel> {
                Ok($name(uuid::Uuid::from_str(s).map_err(|e| {
                    ErrorModel::builder()
                        .code(StatusCode::BAD_REQUEST.into())
                        .message(format!(
                            concat!("Provided ", stringify!($name), " is not a valid UUID: {}"),
                            s
                        ))
                        .r#type(concat!(stringify!($name), "IsNotUUID"))
                        .source(Some(Box::new(e)))
                        .build()
                })?))
            }
        }

        impl Deref for $name {
            type Target = uuid::Uuid;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(value: uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id_type!(UserId);
define_id_type!(SeriesId);
define_id_type!(EventId);
define_id_type!(MediaId);
define_id_type!(ApiKeyId);

/// Who can see an entity without further relationship to it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Visibility {
    /// Anyone, including anonymous visitors.
    Public,
    /// Any authenticated user.
    AuthRequired,
    /// Only admins, participants and the creator.
    Unlisted,
}

/// The authenticated caller as established by the session layer.
///
/// Carries only what authentication can assert on its own; relationship
/// data (admin memberships, participations) is resolved separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub is_global_admin: bool,
    pub is_banned: bool,
}

impl SessionUser {
    #[must_use]
    pub fn regular(id: UserId) -> Self {
        Self {
            id,
            is_global_admin: false,
            is_banned: false,
        }
    }

    #[must_use]
    pub fn global_admin(id: UserId) -> Self {
        Self {
            id,
            is_global_admin: true,
            is_banned: false,
        }
    }
}

/// Broad media category, derived from the declared content type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

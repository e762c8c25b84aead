#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::large_enum_variant,
    clippy::missing_errors_doc
)]
#![forbid(unsafe_code)]

mod config;
pub mod error;
pub mod service;

pub use config::{DynAppConfig, CONFIG};
pub use error::ErrorModel;
pub use galleria_io as io;
pub use service::{ApiKeyId, EventId, MediaId, SeriesId, SessionUser, UserId, Visibility};

pub mod implementations;

pub use async_trait;
pub use tokio;
pub use tokio_util::sync::CancellationToken;
pub use tracing;

#[cfg(any(test, feature = "test-utils"))]
pub mod tests;

//! Runtime configuration, sourced from environment variables prefixed with
//! `GALLERIA__`. Nested keys use `__` as separator, e.g.
//! `GALLERIA__USER_QUOTA_BYTES=1073741824`.

use std::{sync::LazyLock, time::Duration};

use serde::{Deserialize, Serialize};

use crate::service::ratelimit::FailurePolicy;

const MIB: u64 = 1024 * 1024;

pub static CONFIG: LazyLock<DynAppConfig> = LazyLock::new(get_config);

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
pub struct DynAppConfig {
    /// Per-user storage quota in bytes. `-1` disables the quota.
    pub user_quota_bytes: i64,
    /// Maximum accepted size for a single image upload.
    pub image_max_bytes: u64,
    /// Maximum accepted size for a single video upload.
    pub video_max_bytes: u64,
    /// Uploads at or above this size go through the multipart path.
    pub multipart_threshold_bytes: u64,
    /// Fixed multipart part size.
    pub multipart_part_bytes: u64,
    /// Maximum number of part uploads in flight per asset.
    pub multipart_max_concurrency: usize,
    /// Maximum number of part URLs presigned per round trip.
    pub presign_batch_size: usize,
    pub presign_expiry_secs: u64,
    /// Longest edge of generated thumbnails, in pixels.
    pub thumbnail_max_edge: u32,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Wall-clock limit for a single HEIC conversion.
    pub heic_timeout_secs: u64,
    /// Time budget of a single ghost-file sweep invocation.
    pub sweep_time_budget_secs: u64,
    /// Objects younger than this are never considered ghosts.
    pub sweep_min_age_hours: i64,
    /// Storage listing page size used by the sweep.
    pub sweep_page_size: i32,
    pub rate_limit_max_requests: u64,
    pub rate_limit_window_secs: u64,
    /// What to do when the rate-limit backend is unreachable.
    pub rate_limit_failure_policy: FailurePolicy,
}

impl Default for DynAppConfig {
    fn default() -> Self {
        Self {
            user_quota_bytes: 2 * 1024 * 1024 * 1024,
            image_max_bytes: 50 * MIB,
            video_max_bytes: 5 * 1024 * MIB,
            multipart_threshold_bytes: 50 * MIB,
            multipart_part_bytes: 10 * MIB,
            multipart_max_concurrency: 4,
            presign_batch_size: 100,
            presign_expiry_secs: 900,
            thumbnail_max_edge: 512,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            heic_timeout_secs: 30,
            sweep_time_budget_secs: 15,
            sweep_min_age_hours: 24,
            sweep_page_size: 1000,
            rate_limit_max_requests: 30,
            rate_limit_window_secs: 60,
            rate_limit_failure_policy: FailurePolicy::Closed,
        }
    }
}

impl DynAppConfig {
    #[must_use]
    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }

    #[must_use]
    pub fn heic_timeout(&self) -> Duration {
        Duration::from_secs(self.heic_timeout_secs)
    }

    #[must_use]
    pub fn sweep_time_budget(&self) -> Duration {
        Duration::from_secs(self.sweep_time_budget_secs)
    }

    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

fn get_config() -> DynAppConfig {
    let defaults = figment::providers::Serialized::defaults(DynAppConfig::default());

    #[cfg(not(test))]
    let prefixes = &["GALLERIA__"];
    #[cfg(test)]
    let prefixes = &["GALLERIA_TEST__"];

    let mut config = figment::Figment::from(defaults);
    for prefix in prefixes {
        let env = figment::providers::Env::prefixed(prefix).split("__");
        config = config.merge(env);
    }

    match config.extract::<DynAppConfig>() {
        Ok(c) => c,
        Err(e) => {
            panic!("Failed to extract config: {e}");
        }
    }
}

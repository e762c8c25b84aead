//! Ghost-file reconciliation.
//!
//! A ghost is an object in storage that no row in the content store
//! references anymore, typically left behind by a crash between upload and
//! persist or by a failed rollback. The sweep walks the storage listing
//! page by page, checks candidates against the store in one batched query
//! per page and deletes confirmed ghosts.
//!
//! A single invocation is bounded by a wall-clock budget and returns a
//! cursor when it runs out, so callers on short-lived workers can resume
//! where they stopped.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use galleria_io::{ObjectKey, ObjectStorage, StorageError};
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use super::{ContentStore, StoreError};
use crate::CONFIG;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Caller-supplied knobs for one sweep invocation.
#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Continuation cursor from a previous, incomplete invocation.
    pub cursor: Option<String>,
    /// Ignore the minimum-age threshold and consider every object.
    /// In-flight uploads can be deleted under force; use it only while no
    /// uploads are running.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Objects examined during this invocation.
    pub checked: usize,
    /// Ghosts deleted during this invocation.
    pub deleted: usize,
    /// Set when the time budget ran out before the listing was exhausted.
    pub next_cursor: Option<String>,
    pub completed: bool,
}

#[derive(Debug, TypedBuilder)]
pub struct GhostFileReconciler<S> {
    store: Arc<S>,
    storage: Arc<dyn ObjectStorage>,
    #[builder(default = CONFIG.sweep_time_budget())]
    time_budget: std::time::Duration,
    #[builder(default = CONFIG.sweep_min_age_hours)]
    min_age_hours: i64,
    #[builder(default = CONFIG.sweep_page_size)]
    page_size: i32,
}

impl<S: ContentStore> GhostFileReconciler<S> {
    /// Runs one time-boxed sweep.
    ///
    /// The age threshold keeps uploads that are mid-flight (object stored,
    /// record not yet inserted) out of reach: only objects older than the
    /// threshold are ever candidates. Every candidate is re-checked
    /// against the store in the same invocation that deletes it.
    pub async fn sweep(&self, options: SweepOptions) -> Result<SweepOutcome, SweepError> {
        let deadline = Instant::now() + self.time_budget;
        let cutoff = if options.force {
            Utc::now()
        } else {
            Utc::now() - ChronoDuration::hours(self.min_age_hours)
        };

        let mut cursor = options.cursor;
        let mut checked = 0usize;
        let mut deleted = 0usize;

        loop {
            let page = self.storage.list(cursor.clone(), self.page_size).await?;
            checked += page.objects.len();

            let candidates: Vec<ObjectKey> = page
                .objects
                .into_iter()
                .filter(|o| o.last_modified < cutoff)
                .map(|o| o.key)
                .collect();

            if !candidates.is_empty() {
                let referenced = self.store.referenced_keys(&candidates).await?;
                let ghosts: Vec<ObjectKey> = candidates
                    .into_iter()
                    .filter(|key| !referenced.contains(key))
                    .collect();
                if !ghosts.is_empty() {
                    self.storage.delete_batch(&ghosts).await?;
                    deleted += ghosts.len();
                    tracing::info!(
                        count = ghosts.len(),
                        "Deleted unreferenced objects from storage"
                    );
                }
            }

            cursor = page.next_token;
            if cursor.is_none() {
                return Ok(SweepOutcome {
                    checked,
                    deleted,
                    next_cursor: None,
                    completed: true,
                });
            }
            if Instant::now() >= deadline {
                tracing::info!(
                    checked,
                    deleted,
                    "Sweep time budget exhausted, returning continuation cursor"
                );
                return Ok(SweepOutcome {
                    checked,
                    deleted,
                    next_cursor: cursor,
                    completed: false,
                });
            }
        }
    }

    /// Chains sweeps until the listing is exhausted. Meant for operator
    /// tooling, not for time-boxed workers.
    pub async fn sweep_to_completion(&self, force: bool) -> Result<SweepOutcome, SweepError> {
        let mut totals = SweepOutcome {
            checked: 0,
            deleted: 0,
            next_cursor: None,
            completed: false,
        };
        let mut cursor = None;
        loop {
            let outcome = self
                .sweep(SweepOptions {
                    cursor: cursor.take(),
                    force,
                })
                .await?;
            totals.checked += outcome.checked;
            totals.deleted += outcome.deleted;
            if outcome.completed {
                totals.completed = true;
                return Ok(totals);
            }
            cursor = outcome.next_cursor;
        }
    }
}

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::anyhow;
use shared::{
    domain::{JobId, PositionKey},
    protocol::{JobPosition, JobSummary, ListJobsQuery},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    mutation::{MoveError, MoveOutcome, MutationStatus, PendingMutation},
    position::{self, AllocError},
    snapshot::Snapshot,
    JobDirectory, Notice, NotificationSink, SilentNotifications, REMOTE_WRITE_TIMEOUT,
};

/// Optimistic drag-reorder controller for the jobs board.
///
/// The collection is always rendered from local state; the remote store is
/// consulted only at mutation boundaries. At most one mutation is in
/// flight per controller, and a second gesture arriving during that window
/// is dropped rather than queued.
pub struct JobBoardController {
    directory: Arc<dyn JobDirectory>,
    notifications: Arc<dyn NotificationSink>,
    inner: Mutex<BoardState>,
    generation: AtomicU64,
}

struct BoardState {
    jobs: Vec<JobSummary>,
    query: ListJobsQuery,
    pending: Option<PendingMutation<JobId, PositionKey, JobSummary>>,
}

impl JobBoardController {
    pub fn new(directory: Arc<dyn JobDirectory>) -> Arc<Self> {
        Self::new_with_notifications(directory, Arc::new(SilentNotifications))
    }

    pub fn new_with_notifications(
        directory: Arc<dyn JobDirectory>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            notifications,
            inner: Mutex::new(BoardState {
                jobs: Vec::new(),
                query: ListJobsQuery::default(),
                pending: None,
            }),
            generation: AtomicU64::new(0),
        })
    }

    /// Fetches the authoritative board for `query` and replaces local
    /// state with it.
    pub async fn load(&self, query: ListJobsQuery) -> anyhow::Result<()> {
        {
            let mut state = self.inner.lock().await;
            state.query = query;
        }
        self.refresh().await
    }

    /// Reconciliation refetch. Skipped silently when a mutation started
    /// while the fetch was in flight; the pending mutation owns the
    /// collection until it resolves.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let query = {
            let state = self.inner.lock().await;
            state.query.clone()
        };
        let page = self.directory.fetch_jobs(&query).await?;

        let mut state = self.inner.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation || state.pending.is_some() {
            return Ok(());
        }
        state.jobs = page.jobs;
        Ok(())
    }

    /// Current render order.
    pub async fn jobs(&self) -> Vec<JobSummary> {
        self.inner.lock().await.jobs.clone()
    }

    /// True while a mutation is awaiting its remote write.
    pub async fn is_busy(&self) -> bool {
        self.inner.lock().await.pending.is_some()
    }

    /// Disowns the controller: in-flight results are discarded instead of
    /// being applied to a collection that no longer exists.
    pub async fn detach(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.lock().await;
        state.pending = None;
        state.jobs.clear();
    }

    /// Moves `job_id` to `to_index`, updating the visible order
    /// immediately and reconciling with the remote store afterwards.
    pub async fn move_job(
        &self,
        job_id: JobId,
        to_index: usize,
    ) -> Result<MoveOutcome, MoveError> {
        let generation = self.generation.load(Ordering::SeqCst);

        let (from_position, to_position, rebalanced, moved_title) = {
            let mut state = self.inner.lock().await;
            if state.pending.is_some() {
                return Ok(MoveOutcome::Busy);
            }

            let len = state.jobs.len();
            let from_index = state
                .jobs
                .iter()
                .position(|job| job.job_id == job_id)
                .ok_or(MoveError::UnknownItem(job_id.0))?;
            if to_index >= len {
                return Err(MoveError::InvalidDestination {
                    index: to_index,
                    len,
                });
            }
            if from_index == to_index {
                return Ok(MoveOutcome::NoOp);
            }

            let snapshot = Snapshot::capture(&state.jobs);
            let from_position = state.jobs[from_index].position;
            let moved_title = state.jobs[from_index].title.clone();

            let moved = state.jobs.remove(from_index);
            state.jobs.insert(to_index, moved);

            let (to_position, rebalanced) =
                match allocate_at(&state.jobs, to_index) {
                    Ok(key) => (key, None),
                    Err(AllocError::RenormalizationRequired) => {
                        // Rebalance the optimistic order and retry; the full
                        // assignment ships with the write so the remote store
                        // commits it together with the move, and the snapshot
                        // covers it on rollback.
                        let keys = position::evenly_spaced(state.jobs.len());
                        for (job, key) in state.jobs.iter_mut().zip(&keys) {
                            job.position = *key;
                        }
                        let assignment: Vec<JobPosition> = state
                            .jobs
                            .iter()
                            .map(|job| JobPosition {
                                job_id: job.job_id,
                                position: job.position,
                            })
                            .collect();
                        let key = allocate_at(&state.jobs, to_index).map_err(|_| {
                            state.jobs = snapshot.to_items();
                            MoveError::KeySpaceExhausted
                        })?;
                        (key, Some(assignment))
                    }
                };
            state.jobs[to_index].position = to_position;

            state.pending = Some(PendingMutation {
                item_id: job_id,
                previous: from_position,
                desired: to_position,
                status: MutationStatus::AppliedLocally,
                snapshot,
            });

            (from_position, to_position, rebalanced, moved_title)
        };

        let write = self
            .directory
            .reorder_job(job_id, from_position, to_position, rebalanced);
        let result = match tokio::time::timeout(REMOTE_WRITE_TIMEOUT, write).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "reorder timed out after {}s",
                REMOTE_WRITE_TIMEOUT.as_secs()
            )),
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            return Ok(MoveOutcome::Detached);
        }

        match result {
            Ok(()) => {
                {
                    let mut state = self.inner.lock().await;
                    if let Some(pending) = state.pending.as_mut() {
                        pending.status = MutationStatus::Confirmed;
                    }
                    state.pending = None;
                }
                self.notifications.notify(Notice::success(
                    "Job reordered",
                    format!("\"{moved_title}\" has been moved."),
                ));
                if let Err(err) = self.refresh().await {
                    warn!(%err, "reconciliation refetch failed after reorder");
                }
                Ok(MoveOutcome::Completed)
            }
            Err(err) => {
                {
                    let mut state = self.inner.lock().await;
                    if let Some(mut pending) = state.pending.take() {
                        pending.status = MutationStatus::RolledBack;
                        state.jobs = pending.snapshot.to_items();
                    }
                }
                self.notifications.notify(Notice::failure(
                    "Reorder failed",
                    format!("Unable to reorder \"{moved_title}\": {err}"),
                ));
                if let Err(err) = self.refresh().await {
                    warn!(%err, "reconciliation refetch failed after rollback");
                }
                Ok(MoveOutcome::RolledBack)
            }
        }
    }
}

fn allocate_at(jobs: &[JobSummary], index: usize) -> Result<PositionKey, AllocError> {
    let lower = index.checked_sub(1).map(|i| jobs[i].position);
    let upper = jobs.get(index + 1).map(|job| job.position);
    position::allocate(lower, upper)
}

#[cfg(test)]
#[path = "tests/ordered_tests.rs"]
mod tests;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::anyhow;
use shared::{
    domain::{CandidateId, Stage},
    protocol::{CandidateSummary, ListCandidatesQuery},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    mutation::{MoveError, MoveOutcome, MutationStatus, PendingMutation},
    snapshot::Snapshot,
    CandidateDirectory, Notice, NotificationSink, SilentNotifications, REMOTE_WRITE_TIMEOUT,
};

/// Optimistic kanban controller for the candidate pipeline. Same executor
/// discipline as the jobs board, minus position keys: a bucket move only
/// rewrites the candidate's stage.
pub struct PipelineController {
    directory: Arc<dyn CandidateDirectory>,
    notifications: Arc<dyn NotificationSink>,
    inner: Mutex<PipelineState>,
    generation: AtomicU64,
}

struct PipelineState {
    candidates: Vec<CandidateSummary>,
    query: ListCandidatesQuery,
    pending: Option<PendingMutation<CandidateId, Stage, CandidateSummary>>,
}

impl PipelineController {
    pub fn new(directory: Arc<dyn CandidateDirectory>) -> Arc<Self> {
        Self::new_with_notifications(directory, Arc::new(SilentNotifications))
    }

    pub fn new_with_notifications(
        directory: Arc<dyn CandidateDirectory>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            notifications,
            inner: Mutex::new(PipelineState {
                candidates: Vec::new(),
                query: ListCandidatesQuery::default(),
                pending: None,
            }),
            generation: AtomicU64::new(0),
        })
    }

    pub async fn load(&self, query: ListCandidatesQuery) -> anyhow::Result<()> {
        {
            let mut state = self.inner.lock().await;
            state.query = query;
        }
        self.refresh().await
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let query = {
            let state = self.inner.lock().await;
            state.query.clone()
        };
        let page = self.directory.fetch_candidates(&query).await?;

        let mut state = self.inner.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation || state.pending.is_some() {
            return Ok(());
        }
        state.candidates = page.candidates;
        Ok(())
    }

    /// Board grouping for the render surface: every stage, in board
    /// order, with its candidates in collection order.
    pub async fn lanes(&self) -> Vec<(Stage, Vec<CandidateSummary>)> {
        let state = self.inner.lock().await;
        Stage::ALL
            .iter()
            .map(|stage| {
                let lane: Vec<CandidateSummary> = state
                    .candidates
                    .iter()
                    .filter(|candidate| candidate.stage == *stage)
                    .cloned()
                    .collect();
                (*stage, lane)
            })
            .collect()
    }

    pub async fn candidates(&self) -> Vec<CandidateSummary> {
        self.inner.lock().await.candidates.clone()
    }

    pub async fn is_busy(&self) -> bool {
        self.inner.lock().await.pending.is_some()
    }

    pub async fn detach(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.lock().await;
        state.pending = None;
        state.candidates.clear();
    }

    /// Moves a candidate to another stage, updating the board immediately
    /// and reconciling with the remote store afterwards.
    pub async fn move_candidate(
        &self,
        candidate_id: CandidateId,
        to_stage: Stage,
    ) -> Result<MoveOutcome, MoveError> {
        let generation = self.generation.load(Ordering::SeqCst);

        let (from_stage, moved_name) = {
            let mut state = self.inner.lock().await;
            if state.pending.is_some() {
                return Ok(MoveOutcome::Busy);
            }

            let index = state
                .candidates
                .iter()
                .position(|candidate| candidate.candidate_id == candidate_id)
                .ok_or(MoveError::UnknownItem(candidate_id.0))?;
            let from_stage = state.candidates[index].stage;
            if from_stage == to_stage {
                return Ok(MoveOutcome::NoOp);
            }

            let snapshot = Snapshot::capture(&state.candidates);
            let moved_name = state.candidates[index].name.clone();
            state.candidates[index].stage = to_stage;

            state.pending = Some(PendingMutation {
                item_id: candidate_id,
                previous: from_stage,
                desired: to_stage,
                status: MutationStatus::AppliedLocally,
                snapshot,
            });

            (from_stage, moved_name)
        };

        let write = self.directory.change_stage(candidate_id, to_stage);
        let result = match tokio::time::timeout(REMOTE_WRITE_TIMEOUT, write).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "stage change timed out after {}s",
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
                    "Candidate moved",
                    format!("{moved_name} moved to {}.", to_stage.title()),
                ));
                if let Err(err) = self.refresh().await {
                    warn!(%err, "reconciliation refetch failed after stage change");
                }
                Ok(MoveOutcome::Completed)
            }
            Err(err) => {
                {
                    let mut state = self.inner.lock().await;
                    if let Some(mut pending) = state.pending.take() {
                        pending.status = MutationStatus::RolledBack;
                        state.candidates = pending.snapshot.to_items();
                    }
                }
                self.notifications.notify(Notice::failure(
                    "Stage change failed",
                    format!(
                        "Unable to move {moved_name} from {} to {}: {err}",
                        from_stage.title(),
                        to_stage.title()
                    ),
                ));
                if let Err(err) = self.refresh().await {
                    warn!(%err, "reconciliation refetch failed after rollback");
                }
                Ok(MoveOutcome::RolledBack)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/staged_tests.rs"]
mod tests;

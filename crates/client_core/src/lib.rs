use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{CandidateId, JobId, PositionKey, Stage},
    protocol::{CandidatePage, JobPage, JobPosition, ListCandidatesQuery, ListJobsQuery},
};

pub mod mutation;
pub mod ordered;
pub mod position;
pub mod rest;
pub mod snapshot;
pub mod staged;

pub use mutation::{MoveError, MoveOutcome, MutationStatus};
pub use ordered::JobBoardController;
pub use rest::RestApiClient;
pub use staged::PipelineController;

/// Upper bound on the applied-locally window: a write that neither
/// resolves nor fails within this bound is rolled back like a failure.
pub(crate) const REMOTE_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Authoritative store behind the jobs board: the list fetch used for
/// loading and reconciliation, and the reorder mutation endpoint.
#[async_trait]
pub trait JobDirectory: Send + Sync {
    async fn fetch_jobs(&self, query: &ListJobsQuery) -> Result<JobPage>;

    /// One reorder write. `rebalanced` carries a full evenly-spaced key
    /// assignment when the client had to renormalize; it commits or fails
    /// together with the move.
    async fn reorder_job(
        &self,
        job_id: JobId,
        from: PositionKey,
        to: PositionKey,
        rebalanced: Option<Vec<JobPosition>>,
    ) -> Result<()>;
}

/// Authoritative store behind the candidate pipeline.
#[async_trait]
pub trait CandidateDirectory: Send + Sync {
    async fn fetch_candidates(&self, query: &ListCandidatesQuery) -> Result<CandidatePage>;
    async fn change_stage(&self, candidate_id: CandidateId, stage: Stage) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
}

/// User-facing toast emitted once per resolved mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub description: String,
}

impl Notice {
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn failure(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Failure,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Fire-and-forget notification surface; the controllers never read
/// anything back from it.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Default sink for headless use: drops every notice.
pub struct SilentNotifications;

impl NotificationSink for SilentNotifications {
    fn notify(&self, _notice: Notice) {}
}

use super::*;
use std::sync::atomic::AtomicUsize;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{domain::JobStatus, protocol::JobPage};
use tokio::sync::Notify;

use crate::{NoticeKind, NotificationSink};

struct TestJobDirectory {
    jobs: Mutex<Vec<JobSummary>>,
    fail_with: Option<String>,
    gate: Option<Arc<Notify>>,
    fetch_calls: AtomicUsize,
    reorder_calls: Mutex<Vec<RecordedReorder>>,
}

#[derive(Debug, Clone)]
struct RecordedReorder {
    job_id: JobId,
    from: PositionKey,
    to: PositionKey,
    rebalanced: Option<Vec<JobPosition>>,
}

impl TestJobDirectory {
    fn seeded(jobs: Vec<JobSummary>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(jobs),
            fail_with: None,
            gate: None,
            fetch_calls: AtomicUsize::new(0),
            reorder_calls: Mutex::new(Vec::new()),
        })
    }

    fn failing(jobs: Vec<JobSummary>, err: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(jobs),
            fail_with: Some(err.into()),
            gate: None,
            fetch_calls: AtomicUsize::new(0),
            reorder_calls: Mutex::new(Vec::new()),
        })
    }

    fn gated(jobs: Vec<JobSummary>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(jobs),
            fail_with: None,
            gate: Some(gate),
            fetch_calls: AtomicUsize::new(0),
            reorder_calls: Mutex::new(Vec::new()),
        })
    }

    async fn recorded(&self) -> Vec<RecordedReorder> {
        self.reorder_calls.lock().await.clone()
    }

    fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobDirectory for TestJobDirectory {
    async fn fetch_jobs(&self, _query: &ListJobsQuery) -> Result<JobPage> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().await.clone();
        jobs.sort_by(|a, b| a.position.0.total_cmp(&b.position.0));
        let total = jobs.len() as i64;
        Ok(JobPage {
            jobs,
            total,
            total_pages: 1,
        })
    }

    async fn reorder_job(
        &self,
        job_id: JobId,
        from: PositionKey,
        to: PositionKey,
        rebalanced: Option<Vec<JobPosition>>,
    ) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        self.reorder_calls.lock().await.push(RecordedReorder {
            job_id,
            from,
            to,
            rebalanced: rebalanced.clone(),
        });

        if let Some(err) = &self.fail_with {
            bail!(err.clone());
        }

        let mut jobs = self.jobs.lock().await;
        if let Some(assignment) = &rebalanced {
            for entry in assignment {
                if let Some(job) = jobs.iter_mut().find(|j| j.job_id == entry.job_id) {
                    job.position = entry.position;
                }
            }
        }
        if let Some(job) = jobs.iter_mut().find(|j| j.job_id == job_id) {
            job.position = to;
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifications {
    notices: std::sync::Mutex<Vec<Notice>>,
}

impl RecordingNotifications {
    fn taken(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices lock").clone()
    }
}

impl NotificationSink for RecordingNotifications {
    fn notify(&self, notice: Notice) {
        self.notices.lock().expect("notices lock").push(notice);
    }
}

fn job(id: i64, title: &str, key: f64) -> JobSummary {
    JobSummary {
        job_id: JobId(id),
        title: title.to_string(),
        status: JobStatus::Active,
        tags: Vec::new(),
        location: None,
        job_type: None,
        description: None,
        position: PositionKey(key),
        created_at: Utc::now(),
    }
}

fn abc() -> Vec<JobSummary> {
    vec![job(1, "A", 1.0), job(2, "B", 2.0), job(3, "C", 3.0)]
}

async fn order(controller: &JobBoardController) -> Vec<i64> {
    controller
        .jobs()
        .await
        .iter()
        .map(|job| job.job_id.0)
        .collect()
}

#[tokio::test]
async fn move_to_front_allocates_below_the_first_key() {
    let directory = TestJobDirectory::seeded(abc());
    let notes = Arc::new(RecordingNotifications::default());
    let controller =
        JobBoardController::new_with_notifications(directory.clone(), notes.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");

    let outcome = controller.move_job(JobId(3), 0).await.expect("move");
    assert_eq!(outcome, MoveOutcome::Completed);
    assert_eq!(order(&controller).await, vec![3, 1, 2]);

    let calls = directory.recorded().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].job_id, JobId(3));
    assert_eq!(calls[0].from, PositionKey(3.0));
    assert!(calls[0].to.0 < 1.0);
    assert!(calls[0].rebalanced.is_none());

    let notices = notes.taken();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Success);
}

#[tokio::test]
async fn failed_write_rolls_back_bit_for_bit_and_notifies() {
    let directory = TestJobDirectory::failing(abc(), "remote store rejected the write");
    let notes = Arc::new(RecordingNotifications::default());
    let controller =
        JobBoardController::new_with_notifications(directory.clone(), notes.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");
    let before = controller.jobs().await;
    let fetches_before = directory.fetches();

    let outcome = controller.move_job(JobId(3), 0).await.expect("move");
    assert_eq!(outcome, MoveOutcome::RolledBack);

    let after = controller.jobs().await;
    assert_eq!(order(&controller).await, vec![1, 2, 3]);
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.job_id, b.job_id);
        assert_eq!(a.position, b.position);
    }

    let notices = notes.taken();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Failure);
    assert!(notices[0].description.contains("remote store rejected"));

    // Reconciliation refetch fires even on failure.
    assert_eq!(directory.fetches(), fetches_before + 1);
    assert!(!controller.is_busy().await);
}

#[tokio::test]
async fn second_gesture_while_pending_is_dropped() {
    let gate = Arc::new(Notify::new());
    let directory = TestJobDirectory::gated(abc(), gate.clone());
    let notes = Arc::new(RecordingNotifications::default());
    let controller =
        JobBoardController::new_with_notifications(directory.clone(), notes.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");

    let background = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.move_job(JobId(3), 0).await })
    };
    while !controller.is_busy().await {
        tokio::task::yield_now().await;
    }

    let during = order(&controller).await;
    let outcome = controller.move_job(JobId(2), 0).await.expect("move");
    assert_eq!(outcome, MoveOutcome::Busy);
    assert_eq!(order(&controller).await, during);

    gate.notify_one();
    let first = background.await.expect("join").expect("move");
    assert_eq!(first, MoveOutcome::Completed);
    assert_eq!(order(&controller).await, vec![3, 1, 2]);

    // Exactly one write and one notice: the dropped gesture left no trace.
    assert_eq!(directory.recorded().await.len(), 1);
    assert_eq!(notes.taken().len(), 1);
}

#[tokio::test]
async fn drop_at_current_index_is_a_silent_noop() {
    let directory = TestJobDirectory::seeded(abc());
    let notes = Arc::new(RecordingNotifications::default());
    let controller =
        JobBoardController::new_with_notifications(directory.clone(), notes.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");
    let fetches_before = directory.fetches();

    let outcome = controller.move_job(JobId(2), 1).await.expect("move");
    assert_eq!(outcome, MoveOutcome::NoOp);

    assert_eq!(order(&controller).await, vec![1, 2, 3]);
    assert!(directory.recorded().await.is_empty());
    assert!(notes.taken().is_empty());
    assert_eq!(directory.fetches(), fetches_before);
}

#[tokio::test]
async fn unknown_job_is_rejected_before_any_mutation() {
    let directory = TestJobDirectory::seeded(abc());
    let controller = JobBoardController::new(directory.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");

    let err = controller.move_job(JobId(99), 0).await.expect_err("move");
    assert!(matches!(err, MoveError::UnknownItem(99)));
    assert_eq!(order(&controller).await, vec![1, 2, 3]);
    assert!(directory.recorded().await.is_empty());
    assert!(!controller.is_busy().await);
}

#[tokio::test]
async fn destination_outside_bounds_is_rejected() {
    let directory = TestJobDirectory::seeded(abc());
    let controller = JobBoardController::new(directory.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");

    let err = controller.move_job(JobId(1), 3).await.expect_err("move");
    assert!(matches!(
        err,
        MoveError::InvalidDestination { index: 3, len: 3 }
    ));
    assert!(directory.recorded().await.is_empty());
}

#[tokio::test]
async fn exhausted_key_space_rebalances_and_ships_the_assignment() {
    // B sits one representable f64 above A; no midpoint fits between them.
    let tight = f64::from_bits(1.0f64.to_bits() + 1);
    let directory = TestJobDirectory::seeded(vec![
        job(1, "A", 1.0),
        job(2, "B", tight),
        job(3, "C", 100.0),
    ]);
    let controller = JobBoardController::new(directory.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");

    let outcome = controller.move_job(JobId(3), 1).await.expect("move");
    assert_eq!(outcome, MoveOutcome::Completed);
    assert_eq!(order(&controller).await, vec![1, 3, 2]);

    let calls = directory.recorded().await;
    assert_eq!(calls.len(), 1);
    let assignment = calls[0].rebalanced.as_ref().expect("rebalanced keys");
    assert_eq!(assignment.len(), 3);
    let mut keys: Vec<f64> = assignment.iter().map(|a| a.position.0).collect();
    keys.sort_by(f64::total_cmp);
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));

    // The rebalanced keys have headroom again.
    let jobs = controller.jobs().await;
    assert!(jobs.windows(2).all(|pair| {
        position::allocate(Some(pair[0].position), Some(pair[1].position)).is_ok()
    }));
}

#[tokio::test(start_paused = true)]
async fn write_that_never_resolves_times_out_and_rolls_back() {
    let gate = Arc::new(Notify::new());
    let directory = TestJobDirectory::gated(abc(), gate);
    let notes = Arc::new(RecordingNotifications::default());
    let controller =
        JobBoardController::new_with_notifications(directory.clone(), notes.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");

    // The gate never opens; virtual time runs past the write timeout.
    let outcome = controller.move_job(JobId(3), 0).await.expect("move");
    assert_eq!(outcome, MoveOutcome::RolledBack);
    assert_eq!(order(&controller).await, vec![1, 2, 3]);

    let notices = notes.taken();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Failure);
    assert!(notices[0].description.contains("timed out"));
}

#[tokio::test]
async fn detached_controller_discards_the_inflight_result() {
    let gate = Arc::new(Notify::new());
    let directory = TestJobDirectory::gated(abc(), gate.clone());
    let notes = Arc::new(RecordingNotifications::default());
    let controller =
        JobBoardController::new_with_notifications(directory.clone(), notes.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");

    let background = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.move_job(JobId(3), 0).await })
    };
    while !controller.is_busy().await {
        tokio::task::yield_now().await;
    }

    controller.detach().await;
    gate.notify_one();

    let outcome = background.await.expect("join").expect("move");
    assert_eq!(outcome, MoveOutcome::Detached);
    assert!(controller.jobs().await.is_empty());
    assert!(notes.taken().is_empty());
}

#[tokio::test]
async fn successful_moves_converge_on_the_server_order() {
    let directory = TestJobDirectory::seeded(abc());
    let controller = JobBoardController::new(directory.clone());
    controller.load(ListJobsQuery::default()).await.expect("load");

    controller.move_job(JobId(3), 0).await.expect("move");
    controller.move_job(JobId(2), 0).await.expect("move");

    let server = directory
        .fetch_jobs(&ListJobsQuery::default())
        .await
        .expect("server order");
    let server_order: Vec<i64> = server.jobs.iter().map(|job| job.job_id.0).collect();
    assert_eq!(order(&controller).await, server_order);
    assert_eq!(server_order, vec![2, 3, 1]);
}

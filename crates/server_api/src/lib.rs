use shared::{
    domain::{CandidateId, JobId, PositionKey},
    error::ApiError,
    protocol::{
        AssessmentDocument, CandidatePage, CandidateSummary, ChangeStageRequest, CreateCandidateRequest,
        CreateJobRequest, JobPage, JobSummary, ListCandidatesQuery, ListJobsQuery, ReorderJobRequest,
        StageChangeEvent, UpsertAssessmentRequest,
    },
};
use storage::{ReorderOutcome, Storage, StoredCandidate, StoredJob};
use tracing::warn;

const MAX_PAGE_SIZE: i64 = 100;
const MAX_TITLE_LEN: usize = 200;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn list_jobs(ctx: &ApiContext, query: &ListJobsQuery) -> Result<JobPage, ApiError> {
    let (limit, offset) = page_window(query.page, query.page_size)?;
    let search = non_empty(query.search.as_deref());

    let jobs = ctx
        .storage
        .list_jobs(search, query.status, limit, offset)
        .await
        .map_err(internal)?;
    let total = ctx
        .storage
        .count_jobs(search, query.status)
        .await
        .map_err(internal)?;

    Ok(JobPage {
        jobs: jobs.into_iter().map(job_summary).collect(),
        total,
        total_pages: total_pages(total, limit),
    })
}

pub async fn create_job(ctx: &ApiContext, req: &CreateJobRequest) -> Result<JobSummary, ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::validation("job title cannot be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(ApiError::validation("job title is too long"));
    }

    let job_id = ctx
        .storage
        .create_job(
            title,
            non_empty(req.description.as_deref()),
            non_empty(req.location.as_deref()),
            non_empty(req.job_type.as_deref()),
            &req.tags,
        )
        .await
        .map_err(internal)?;

    fetch_job(ctx, job_id).await
}

pub async fn update_job(
    ctx: &ApiContext,
    job_id: JobId,
    req: &shared::protocol::UpdateJobRequest,
) -> Result<JobSummary, ApiError> {
    if let Some(title) = &req.title {
        if title.trim().is_empty() {
            return Err(ApiError::validation("job title cannot be empty"));
        }
    }

    let updated = ctx
        .storage
        .update_job(
            job_id,
            req.title.as_deref().map(str::trim),
            req.status,
            req.description.as_deref(),
            req.location.as_deref(),
            req.job_type.as_deref(),
            req.tags.as_deref(),
        )
        .await
        .map_err(internal)?;

    updated
        .map(job_summary)
        .ok_or_else(|| ApiError::not_found("job not found"))
}

/// Authoritative side of the reorder contract: rejects stale clients via
/// the `from_position` check instead of recomputing order on their behalf.
pub async fn reorder_job(
    ctx: &ApiContext,
    job_id: JobId,
    req: &ReorderJobRequest,
) -> Result<(), ApiError> {
    if !req.to_position.is_finite() {
        return Err(ApiError::validation("target position must be finite"));
    }

    let rebalanced = match &req.rebalanced {
        Some(assignments) => Some(validated_rebalance(ctx, assignments).await?),
        None => None,
    };

    let outcome = ctx
        .storage
        .reorder_job(job_id, req.from_position, req.to_position, rebalanced.as_deref())
        .await
        .map_err(internal)?;

    match outcome {
        ReorderOutcome::Applied => Ok(()),
        ReorderOutcome::NotFound => Err(ApiError::not_found("job not found")),
        ReorderOutcome::StalePosition => {
            warn!(job_id = job_id.0, "reorder rejected: stale from_position");
            Err(ApiError::conflict(
                "job was reordered by someone else; refresh and retry",
            ))
        }
    }
}

pub async fn list_candidates(
    ctx: &ApiContext,
    query: &ListCandidatesQuery,
) -> Result<CandidatePage, ApiError> {
    let (limit, offset) = page_window(query.page, query.page_size)?;
    let search = non_empty(query.search.as_deref());

    let candidates = ctx
        .storage
        .list_candidates(search, query.stage, limit, offset)
        .await
        .map_err(internal)?;
    let total = ctx
        .storage
        .count_candidates(search, query.stage)
        .await
        .map_err(internal)?;

    Ok(CandidatePage {
        candidates: candidates.into_iter().map(candidate_summary).collect(),
        total,
        total_pages: total_pages(total, limit),
    })
}

pub async fn create_candidate(
    ctx: &ApiContext,
    req: &CreateCandidateRequest,
) -> Result<CandidateSummary, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::validation("candidate name cannot be empty"));
    }
    if !req.email.contains('@') {
        return Err(ApiError::validation("candidate email is invalid"));
    }
    ensure_job_exists(ctx, req.job_id).await?;

    let candidate_id = ctx
        .storage
        .create_candidate(req.job_id, req.name.trim(), req.email.trim())
        .await
        .map_err(internal)?;

    fetch_candidate(ctx, candidate_id).await
}

pub async fn change_candidate_stage(
    ctx: &ApiContext,
    candidate_id: CandidateId,
    req: &ChangeStageRequest,
) -> Result<CandidateSummary, ApiError> {
    let updated = ctx
        .storage
        .set_candidate_stage(candidate_id, req.stage)
        .await
        .map_err(internal)?;

    updated
        .map(candidate_summary)
        .ok_or_else(|| ApiError::not_found("candidate not found"))
}

pub async fn candidate_timeline(
    ctx: &ApiContext,
    candidate_id: CandidateId,
) -> Result<Vec<StageChangeEvent>, ApiError> {
    if ctx
        .storage
        .get_candidate(candidate_id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(ApiError::not_found("candidate not found"));
    }

    let events = ctx
        .storage
        .list_stage_events(candidate_id)
        .await
        .map_err(internal)?;

    Ok(events
        .into_iter()
        .map(|event| StageChangeEvent {
            candidate_id: event.candidate_id,
            from_stage: event.from_stage,
            to_stage: event.to_stage,
            changed_at: event.changed_at,
        })
        .collect())
}

pub async fn get_assessment(
    ctx: &ApiContext,
    job_id: JobId,
) -> Result<AssessmentDocument, ApiError> {
    ensure_job_exists(ctx, job_id).await?;

    let stored = ctx
        .storage
        .get_assessment(job_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("no assessment for this job"))?;

    let sections = serde_json::from_str(&stored.sections_json)
        .map_err(|e| ApiError::internal(format!("stored assessment is unreadable: {e}")))?;

    Ok(AssessmentDocument {
        job_id: stored.job_id,
        title: stored.title,
        description: stored.description,
        sections,
        updated_at: stored.updated_at,
    })
}

pub async fn upsert_assessment(
    ctx: &ApiContext,
    job_id: JobId,
    req: &UpsertAssessmentRequest,
) -> Result<AssessmentDocument, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::validation("assessment title cannot be empty"));
    }
    ensure_job_exists(ctx, job_id).await?;

    let sections_json = serde_json::to_string(&req.sections)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    ctx.storage
        .upsert_assessment(job_id, req.title.trim(), req.description.as_deref(), &sections_json)
        .await
        .map_err(internal)?;

    get_assessment(ctx, job_id).await
}

/// A rebalance must cover the whole collection with finite, pairwise
/// distinct keys; anything less would corrupt the strict total order.
async fn validated_rebalance(
    ctx: &ApiContext,
    assignments: &[shared::protocol::JobPosition],
) -> Result<Vec<(JobId, PositionKey)>, ApiError> {
    let total = ctx.storage.count_jobs(None, None).await.map_err(internal)?;
    if assignments.len() as i64 != total {
        return Err(ApiError::validation(format!(
            "rebalance must cover all {total} jobs, got {}",
            assignments.len()
        )));
    }

    let mut keys: Vec<f64> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        if !assignment.position.is_finite() {
            return Err(ApiError::validation("rebalanced position must be finite"));
        }
        keys.push(assignment.position.0);
    }
    keys.sort_by(f64::total_cmp);
    if keys.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(ApiError::validation("rebalanced positions must be distinct"));
    }

    Ok(assignments
        .iter()
        .map(|a| (a.job_id, a.position))
        .collect())
}

async fn ensure_job_exists(ctx: &ApiContext, job_id: JobId) -> Result<(), ApiError> {
    ctx.storage
        .get_job(job_id)
        .await
        .map_err(internal)?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("job not found"))
}

async fn fetch_job(ctx: &ApiContext, job_id: JobId) -> Result<JobSummary, ApiError> {
    ctx.storage
        .get_job(job_id)
        .await
        .map_err(internal)?
        .map(job_summary)
        .ok_or_else(|| ApiError::not_found("job not found"))
}

async fn fetch_candidate(
    ctx: &ApiContext,
    candidate_id: CandidateId,
) -> Result<CandidateSummary, ApiError> {
    ctx.storage
        .get_candidate(candidate_id)
        .await
        .map_err(internal)?
        .map(candidate_summary)
        .ok_or_else(|| ApiError::not_found("candidate not found"))
}

fn job_summary(job: StoredJob) -> JobSummary {
    JobSummary {
        job_id: job.job_id,
        title: job.title,
        status: job.status,
        tags: job.tags,
        location: job.location,
        job_type: job.job_type,
        description: job.description,
        position: job.position,
        created_at: job.created_at,
    }
}

fn candidate_summary(candidate: StoredCandidate) -> CandidateSummary {
    CandidateSummary {
        candidate_id: candidate.candidate_id,
        job_id: candidate.job_id,
        name: candidate.name,
        email: candidate.email,
        stage: candidate.stage,
        created_at: candidate.created_at,
    }
}

fn page_window(page: i64, page_size: i64) -> Result<(i64, i64), ApiError> {
    if page < 1 {
        return Err(ApiError::validation("page must be at least 1"));
    }
    let limit = page_size.clamp(1, MAX_PAGE_SIZE);
    Ok((limit, (page - 1) * limit))
}

fn total_pages(total: i64, page_size: i64) -> i64 {
    if total == 0 {
        0
    } else {
        (total + page_size - 1) / page_size
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::internal(err.to_string())
}

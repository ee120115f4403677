use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{CandidateId, JobId, PositionKey, Stage},
    protocol::{
        CandidatePage, ChangeStageRequest, JobPage, JobPosition, ListCandidatesQuery,
        ListJobsQuery, ReorderJobRequest,
    },
};

use crate::{CandidateDirectory, JobDirectory};

/// `reqwest`-backed implementation of both directory traits, speaking the
/// dashboard's REST protocol.
pub struct RestApiClient {
    http: Client,
    server_url: String,
}

impl RestApiClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
        }
    }

    /// Surfaces the response body on failure so the rollback notice can
    /// carry the server's diagnostic text.
    async fn expect_success(response: reqwest::Response, action: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        bail!("{action} rejected ({status}): {body}");
    }
}

#[async_trait]
impl JobDirectory for RestApiClient {
    async fn fetch_jobs(&self, query: &ListJobsQuery) -> Result<JobPage> {
        let page = self
            .http
            .get(format!("{}/jobs", self.server_url))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page)
    }

    async fn reorder_job(
        &self,
        job_id: JobId,
        from: PositionKey,
        to: PositionKey,
        rebalanced: Option<Vec<JobPosition>>,
    ) -> Result<()> {
        let response = self
            .http
            .patch(format!("{}/jobs/{}/reorder", self.server_url, job_id.0))
            .json(&ReorderJobRequest {
                from_position: from,
                to_position: to,
                rebalanced,
            })
            .send()
            .await?;
        Self::expect_success(response, "reorder").await
    }
}

#[async_trait]
impl CandidateDirectory for RestApiClient {
    async fn fetch_candidates(&self, query: &ListCandidatesQuery) -> Result<CandidatePage> {
        let page = self
            .http
            .get(format!("{}/candidates", self.server_url))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page)
    }

    async fn change_stage(&self, candidate_id: CandidateId, stage: Stage) -> Result<()> {
        let response = self
            .http
            .patch(format!("{}/candidates/{}", self.server_url, candidate_id.0))
            .json(&ChangeStageRequest { stage })
            .send()
            .await?;
        Self::expect_success(response, "stage change").await
    }
}

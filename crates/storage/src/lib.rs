use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{fs, path::Path, str::FromStr};

use shared::domain::{CandidateId, JobId, JobStatus, PositionKey, Stage};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredJob {
    pub job_id: JobId,
    pub title: String,
    pub status: JobStatus,
    pub description: Option<String>,
    pub location: Option<String>,
    pub job_type: Option<String>,
    pub tags: Vec<String>,
    pub position: PositionKey,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredCandidate {
    pub candidate_id: CandidateId,
    pub job_id: JobId,
    pub name: String,
    pub email: String,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredStageEvent {
    pub candidate_id: CandidateId,
    pub from_stage: Option<Stage>,
    pub to_stage: Stage,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredAssessment {
    pub job_id: JobId,
    pub title: String,
    pub description: Option<String>,
    pub sections_json: String,
    pub updated_at: DateTime<Utc>,
}

/// Result of the transactional reorder. `StalePosition` means the job's
/// stored position no longer matches what the client last saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOutcome {
    Applied,
    StalePosition,
    NotFound,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_job(
        &self,
        title: &str,
        description: Option<&str>,
        location: Option<&str>,
        job_type: Option<&str>,
        tags: &[String],
    ) -> Result<JobId> {
        let tags_json = serde_json::to_string(tags)?;
        let rec = sqlx::query(
            "INSERT INTO jobs (title, description, location, job_type, tags, position)
             VALUES (?, ?, ?, ?, ?, (SELECT COALESCE(MAX(position), 0.0) + ? FROM jobs))
             RETURNING id",
        )
        .bind(title)
        .bind(description)
        .bind(location)
        .bind(job_type)
        .bind(tags_json)
        .bind(PositionKey::STEP)
        .fetch_one(&self.pool)
        .await?;
        Ok(JobId(rec.get::<i64, _>(0)))
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<StoredJob>> {
        let row = sqlx::query(
            "SELECT id, title, status, description, location, job_type, tags, position, created_at
             FROM jobs WHERE id = ?",
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_job).transpose()
    }

    pub async fn list_jobs(
        &self,
        search: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredJob>> {
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(
            "SELECT id, title, status, description, location, job_type, tags, position, created_at
             FROM jobs
             WHERE (? IS NULL OR status = ?)
               AND (? IS NULL OR title LIKE '%' || ? || '%')
             ORDER BY position
             LIMIT ? OFFSET ?",
        )
        .bind(status)
        .bind(status)
        .bind(search)
        .bind(search)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn count_jobs(&self, search: Option<&str>, status: Option<JobStatus>) -> Result<i64> {
        let status = status.map(|s| s.as_str());
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs
             WHERE (? IS NULL OR status = ?)
               AND (? IS NULL OR title LIKE '%' || ? || '%')",
        )
        .bind(status)
        .bind(status)
        .bind(search)
        .bind(search)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    pub async fn update_job(
        &self,
        job_id: JobId,
        title: Option<&str>,
        status: Option<JobStatus>,
        description: Option<&str>,
        location: Option<&str>,
        job_type: Option<&str>,
        tags: Option<&[String]>,
    ) -> Result<Option<StoredJob>> {
        let tags_json = tags.map(serde_json::to_string).transpose()?;
        sqlx::query(
            "UPDATE jobs SET
                 title = COALESCE(?, title),
                 status = COALESCE(?, status),
                 description = COALESCE(?, description),
                 location = COALESCE(?, location),
                 job_type = COALESCE(?, job_type),
                 tags = COALESCE(?, tags)
             WHERE id = ?",
        )
        .bind(title)
        .bind(status.map(|s| s.as_str()))
        .bind(description)
        .bind(location)
        .bind(job_type)
        .bind(tags_json)
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;
        self.get_job(job_id).await
    }

    /// Applies one reorder atomically: the stale-position check, the
    /// optional full rebalance, and the moved job's new key either all
    /// commit or none do.
    pub async fn reorder_job(
        &self,
        job_id: JobId,
        from: PositionKey,
        to: PositionKey,
        rebalanced: Option<&[(JobId, PositionKey)]>,
    ) -> Result<ReorderOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT position FROM jobs WHERE id = ?")
            .bind(job_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(ReorderOutcome::NotFound);
        };
        let current: f64 = row.get(0);
        if current != from.0 {
            return Ok(ReorderOutcome::StalePosition);
        }

        if let Some(assignments) = rebalanced {
            for (id, key) in assignments {
                sqlx::query("UPDATE jobs SET position = ? WHERE id = ?")
                    .bind(key.0)
                    .bind(id.0)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query("UPDATE jobs SET position = ? WHERE id = ?")
            .bind(to.0)
            .bind(job_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ReorderOutcome::Applied)
    }

    pub async fn create_candidate(
        &self,
        job_id: JobId,
        name: &str,
        email: &str,
    ) -> Result<CandidateId> {
        let mut tx = self.pool.begin().await?;
        let rec = sqlx::query(
            "INSERT INTO candidates (job_id, name, email, stage) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(job_id.0)
        .bind(name)
        .bind(email)
        .bind(Stage::Applied.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let candidate_id = CandidateId(rec.get::<i64, _>(0));

        sqlx::query("INSERT INTO stage_events (candidate_id, from_stage, to_stage) VALUES (?, NULL, ?)")
            .bind(candidate_id.0)
            .bind(Stage::Applied.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(candidate_id)
    }

    pub async fn get_candidate(&self, candidate_id: CandidateId) -> Result<Option<StoredCandidate>> {
        let row = sqlx::query(
            "SELECT id, job_id, name, email, stage, created_at FROM candidates WHERE id = ?",
        )
        .bind(candidate_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_candidate).transpose()
    }

    pub async fn list_candidates(
        &self,
        search: Option<&str>,
        stage: Option<Stage>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredCandidate>> {
        let stage = stage.map(|s| s.as_str());
        let rows = sqlx::query(
            "SELECT id, job_id, name, email, stage, created_at
             FROM candidates
             WHERE (? IS NULL OR stage = ?)
               AND (? IS NULL OR name LIKE '%' || ? || '%' OR email LIKE '%' || ? || '%')
             ORDER BY created_at, id
             LIMIT ? OFFSET ?",
        )
        .bind(stage)
        .bind(stage)
        .bind(search)
        .bind(search)
        .bind(search)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_candidate).collect()
    }

    pub async fn count_candidates(
        &self,
        search: Option<&str>,
        stage: Option<Stage>,
    ) -> Result<i64> {
        let stage = stage.map(|s| s.as_str());
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM candidates
             WHERE (? IS NULL OR stage = ?)
               AND (? IS NULL OR name LIKE '%' || ? || '%' OR email LIKE '%' || ? || '%')",
        )
        .bind(stage)
        .bind(stage)
        .bind(search)
        .bind(search)
        .bind(search)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    /// Updates the candidate's stage and appends the matching history
    /// event in one transaction.
    pub async fn set_candidate_stage(
        &self,
        candidate_id: CandidateId,
        stage: Stage,
    ) -> Result<Option<StoredCandidate>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT stage FROM candidates WHERE id = ?")
            .bind(candidate_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let previous: String = row.get(0);

        sqlx::query("UPDATE candidates SET stage = ? WHERE id = ?")
            .bind(stage.as_str())
            .bind(candidate_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO stage_events (candidate_id, from_stage, to_stage) VALUES (?, ?, ?)")
            .bind(candidate_id.0)
            .bind(previous)
            .bind(stage.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.get_candidate(candidate_id).await
    }

    pub async fn list_stage_events(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Vec<StoredStageEvent>> {
        let rows = sqlx::query(
            "SELECT candidate_id, from_stage, to_stage, changed_at
             FROM stage_events WHERE candidate_id = ?
             ORDER BY id",
        )
        .bind(candidate_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let from_stage: Option<String> = row.get("from_stage");
                Ok(StoredStageEvent {
                    candidate_id: CandidateId(row.get::<i64, _>("candidate_id")),
                    from_stage: from_stage.as_deref().map(Stage::from_str).transpose()?,
                    to_stage: row.get::<String, _>("to_stage").parse()?,
                    changed_at: row.get("changed_at"),
                })
            })
            .collect()
    }

    pub async fn upsert_assessment(
        &self,
        job_id: JobId,
        title: &str,
        description: Option<&str>,
        sections_json: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO assessments (job_id, title, description, sections)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(job_id) DO UPDATE SET
                 title = excluded.title,
                 description = excluded.description,
                 sections = excluded.sections,
                 updated_at = CURRENT_TIMESTAMP",
        )
        .bind(job_id.0)
        .bind(title)
        .bind(description)
        .bind(sections_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_assessment(&self, job_id: JobId) -> Result<Option<StoredAssessment>> {
        let row = sqlx::query(
            "SELECT job_id, title, description, sections, updated_at
             FROM assessments WHERE job_id = ?",
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoredAssessment {
            job_id: JobId(row.get::<i64, _>("job_id")),
            title: row.get("title"),
            description: row.get("description"),
            sections_json: row.get("sections"),
            updated_at: row.get("updated_at"),
        }))
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<StoredJob> {
    let tags_json: String = row.get("tags");
    Ok(StoredJob {
        job_id: JobId(row.get::<i64, _>("id")),
        title: row.get("title"),
        status: row.get::<String, _>("status").parse()?,
        description: row.get("description"),
        location: row.get("location"),
        job_type: row.get("job_type"),
        tags: serde_json::from_str(&tags_json).context("invalid tags column")?,
        position: PositionKey(row.get::<f64, _>("position")),
        created_at: row.get("created_at"),
    })
}

fn row_to_candidate(row: sqlx::sqlite::SqliteRow) -> Result<StoredCandidate> {
    Ok(StoredCandidate {
        candidate_id: CandidateId(row.get::<i64, _>("id")),
        job_id: JobId(row.get::<i64, _>("job_id")),
        name: row.get("name"),
        email: row.get("email"),
        stage: row.get::<String, _>("stage").parse()?,
        created_at: row.get("created_at"),
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return Ok(());
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory for '{database_url}'"))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{
    JobBoardController, Notice, NoticeKind, NotificationSink, PipelineController, RestApiClient,
};
use shared::domain::{CandidateId, JobId, Stage};
use shared::protocol::{ListCandidatesQuery, ListJobsQuery};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8700")]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the jobs board in display order.
    Jobs,
    /// Print the candidate pipeline grouped by stage.
    Candidates,
    /// Drag a job to a new index (0-based) and report the outcome.
    MoveJob { job_id: i64, to_index: usize },
    /// Drag a candidate to another stage and report the outcome.
    MoveCandidate { candidate_id: i64, stage: Stage },
}

struct PrintlnNotifications;

impl NotificationSink for PrintlnNotifications {
    fn notify(&self, notice: Notice) {
        let tag = match notice.kind {
            NoticeKind::Success => "ok",
            NoticeKind::Failure => "failed",
        };
        println!("[{tag}] {}: {}", notice.title, notice.description);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let api = Arc::new(RestApiClient::new(args.server_url));

    match args.command {
        Command::Jobs => {
            let board = JobBoardController::new(api);
            board.load(ListJobsQuery::default()).await?;
            for (index, job) in board.jobs().await.iter().enumerate() {
                println!(
                    "{index:>3}  [{}] {} (position {})",
                    job.status.as_str(),
                    job.title,
                    job.position
                );
            }
        }
        Command::Candidates => {
            let pipeline = PipelineController::new(api);
            pipeline.load(ListCandidatesQuery::default()).await?;
            for (stage, lane) in pipeline.lanes().await {
                println!("{} ({})", stage.title(), lane.len());
                for candidate in lane {
                    println!("    {} <{}>", candidate.name, candidate.email);
                }
            }
        }
        Command::MoveJob { job_id, to_index } => {
            let board =
                JobBoardController::new_with_notifications(api, Arc::new(PrintlnNotifications));
            board.load(ListJobsQuery::default()).await?;
            let outcome = board.move_job(JobId(job_id), to_index).await?;
            println!("outcome: {outcome:?}");
        }
        Command::MoveCandidate {
            candidate_id,
            stage,
        } => {
            let pipeline = PipelineController::new_with_notifications(
                api,
                Arc::new(PrintlnNotifications),
            );
            pipeline.load(ListCandidatesQuery::default()).await?;
            let outcome = pipeline
                .move_candidate(CandidateId(candidate_id), stage)
                .await?;
            println!("outcome: {outcome:?}");
        }
    }

    Ok(())
}

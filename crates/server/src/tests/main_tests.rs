use super::*;
use axum::{body, body::Body, http::Request};
use shared::protocol::{CandidatePage, JobPage, JobSummary};
use tower::ServiceExt;

async fn test_app() -> (Router, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let app = build_router(Arc::new(AppState {
        api: ApiContext {
            storage: storage.clone(),
        },
    }));
    (app, storage)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn patch_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::patch(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(bytes.as_ref(), b"ok");
}

#[tokio::test]
async fn job_create_and_list_round_trip() {
    let (app, _storage) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/jobs",
            serde_json::json!({ "title": "Backend Engineer", "tags": ["rust"] }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: JobSummary = json_body(response).await;
    assert_eq!(created.title, "Backend Engineer");

    let response = app
        .oneshot(
            Request::get("/jobs?page=1&page_size=10")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let page: JobPage = json_body(response).await;
    assert_eq!(page.total, 1);
    assert_eq!(page.jobs[0].job_id, created.job_id);
}

#[tokio::test]
async fn blank_job_title_is_a_bad_request() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(post_json("/jobs", serde_json::json!({ "title": "  " })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reorder_applies_and_rejects_stale_positions() {
    let (app, storage) = test_app().await;
    let _a = storage.create_job("A", None, None, None, &[]).await.expect("a");
    let b = storage.create_job("B", None, None, None, &[]).await.expect("b");
    let stored = storage.get_job(b).await.expect("get").expect("job");

    let response = app
        .clone()
        .oneshot(patch_json(
            &format!("/jobs/{}/reorder", b.0),
            serde_json::json!({
                "from_position": stored.position.0,
                "to_position": stored.position.0 - 3.0 * shared::domain::PositionKey::STEP,
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Same from_position again is now stale.
    let response = app
        .oneshot(patch_json(
            &format!("/jobs/{}/reorder", b.0),
            serde_json::json!({
                "from_position": stored.position.0,
                "to_position": 1.0,
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn candidate_stage_patch_updates_and_records_timeline() {
    let (app, storage) = test_app().await;
    let job = storage.create_job("A", None, None, None, &[]).await.expect("job");
    let candidate = storage
        .create_candidate(job, "Dana Flores", "dana@example.com")
        .await
        .expect("candidate");

    let response = app
        .clone()
        .oneshot(patch_json(
            &format!("/candidates/{}", candidate.0),
            serde_json::json!({ "stage": "screen" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get(format!("/candidates/{}/timeline", candidate.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let timeline: Vec<shared::protocol::StageChangeEvent> = json_body(response).await;
    assert_eq!(timeline.len(), 2);
}

#[tokio::test]
async fn unknown_stage_value_is_rejected() {
    let (app, storage) = test_app().await;
    let job = storage.create_job("A", None, None, None, &[]).await.expect("job");
    let candidate = storage
        .create_candidate(job, "Dana Flores", "dana@example.com")
        .await
        .expect("candidate");

    let response = app
        .oneshot(patch_json(
            &format!("/candidates/{}", candidate.0),
            serde_json::json!({ "stage": "limbo" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn candidates_list_filters_by_stage() {
    let (app, storage) = test_app().await;
    let job = storage.create_job("A", None, None, None, &[]).await.expect("job");
    let dana = storage
        .create_candidate(job, "Dana Flores", "dana@example.com")
        .await
        .expect("candidate");
    storage
        .create_candidate(job, "Omar Haddad", "omar@example.com")
        .await
        .expect("candidate");
    storage
        .set_candidate_stage(dana, shared::domain::Stage::Offer)
        .await
        .expect("stage");

    let response = app
        .oneshot(
            Request::get("/candidates?stage=offer")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let page: CandidatePage = json_body(response).await;
    assert_eq!(page.total, 1);
    assert_eq!(page.candidates[0].candidate_id, dana);
}

#[tokio::test]
async fn assessment_put_then_get_round_trips() {
    let (app, storage) = test_app().await;
    let job = storage.create_job("A", None, None, None, &[]).await.expect("job");

    let response = app
        .clone()
        .oneshot(
            Request::put(format!("/jobs/{}/assessment", job.0))
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "title": "Screening quiz",
                        "sections": [
                            { "title": "Basics", "questions": [
                                { "prompt": "Why us?", "kind": "long_text", "required": true }
                            ]}
                        ]
                    })
                    .to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::get(format!("/jobs/{}/assessment", job.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let doc: shared::protocol::AssessmentDocument = json_body(response).await;
    assert_eq!(doc.sections.len(), 1);
    assert_eq!(doc.sections[0].questions[0].prompt, "Why us?");
}

#[tokio::test]
async fn missing_assessment_is_not_found() {
    let (app, storage) = test_app().await;
    let job = storage.create_job("A", None, None, None, &[]).await.expect("job");

    let response = app
        .oneshot(
            Request::get(format!("/jobs/{}/assessment", job.0))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

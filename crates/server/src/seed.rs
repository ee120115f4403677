use anyhow::Result;
use storage::Storage;
use tracing::info;

/// Populates an empty database with a small demo board so the dashboard
/// has something to show on first run. Does nothing once any job exists.
pub async fn seed_demo_data(storage: &Storage) -> Result<()> {
    if storage.count_jobs(None, None).await? > 0 {
        return Ok(());
    }

    let backend = storage
        .create_job(
            "Backend Engineer",
            Some("Own the hiring API and its SQLite storage layer."),
            Some("Remote"),
            Some("full-time"),
            &["rust".to_string(), "backend".to_string()],
        )
        .await?;
    let frontend = storage
        .create_job(
            "Frontend Engineer",
            Some("Build the dashboard panels and drag-and-drop flows."),
            Some("Berlin"),
            Some("full-time"),
            &["typescript".to_string(), "ui".to_string()],
        )
        .await?;
    storage
        .create_job(
            "Engineering Manager",
            None,
            Some("Berlin"),
            Some("full-time"),
            &[],
        )
        .await?;

    storage
        .create_candidate(backend, "Dana Flores", "dana@example.com")
        .await?;
    storage
        .create_candidate(backend, "Omar Haddad", "omar@example.com")
        .await?;
    storage
        .create_candidate(frontend, "Mia Chen", "mia@example.com")
        .await?;

    info!("seeded demo jobs and candidates");
    Ok(())
}

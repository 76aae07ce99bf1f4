//! `labelsync-prefetch` -- warm a job's annotations from the command line.
//!
//! Opens a job-mode workspace against the remote service, loads the target
//! image first and the rest of the job in background batches, logging
//! progress until loading completes. Nothing is written back.
//!
//! # Environment variables
//!
//! | Variable                 | Required | Default | Description                          |
//! |--------------------------|----------|---------|--------------------------------------|
//! | `LABELSYNC_API_URL`      | yes      | --      | Service root, e.g. `https://labels.example.com` |
//! | `LABELSYNC_JOB_ID`       | yes      | --      | Job to load                          |
//! | `LABELSYNC_API_TOKEN`    | no       | --      | Bearer token                         |
//! | `LABELSYNC_TARGET_IMAGE` | no       | first   | Image to load before `ready`         |
//!
//! Pipeline tuning is read by [`EngineConfig::from_env`].

use std::sync::Arc;

use labelsync_core::image::TargetSelector;
use labelsync_core::progress::LoadPhase;
use labelsync_engine::{EngineConfig, InertSync, Workspace};
use labelsync_remote::{AnnotationApi, ApiClient, JobApi};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "labelsync_engine=info,labelsync_remote=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_url = std::env::var("LABELSYNC_API_URL").unwrap_or_else(|_| {
        tracing::error!("LABELSYNC_API_URL environment variable is required");
        std::process::exit(1);
    });

    let job_id: i64 = std::env::var("LABELSYNC_JOB_ID")
        .unwrap_or_else(|_| {
            tracing::error!("LABELSYNC_JOB_ID environment variable is required");
            std::process::exit(1);
        })
        .parse()
        .unwrap_or_else(|_| {
            tracing::error!("LABELSYNC_JOB_ID must be a valid integer");
            std::process::exit(1);
        });

    let target = std::env::var("LABELSYNC_TARGET_IMAGE")
        .ok()
        .and_then(|raw| TargetSelector::parse(&raw));

    let mut api = ApiClient::new(api_url);
    if let Ok(token) = std::env::var("LABELSYNC_API_TOKEN") {
        api = api.with_token(token);
    }
    let config = EngineConfig::from_env();

    tracing::info!(
        job_id,
        api_url = %api.api_url(),
        target = target.map(|t| t.0),
        batch_size = config.batch_size,
        "Starting labelsync-prefetch",
    );

    let workspace = Workspace::builder()
        .job(Some(job_id))
        .remote(
            Arc::new(JobApi::new(api.clone())),
            Arc::new(AnnotationApi::new(api)),
        )
        .sync(Arc::new(InertSync))
        .config(config)
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build workspace");
            std::process::exit(1);
        });

    let mut events = workspace.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.kind.is_failure() {
                tracing::warn!(event = event.name(), job_id = event.job_id, "{:?}", event.kind);
            }
        }
    });

    if let Err(e) = workspace.initialize(target).await {
        tracing::error!(job_id, error = %e, "Failed to initialize job");
        std::process::exit(1);
    }

    let mut progress = workspace.progress();
    let finished = async {
        loop {
            let current = progress.borrow_and_update().clone();
            tracing::info!(
                phase = current.phase.as_str(),
                percentage = current.percentage,
                step = %current.step,
                "Progress",
            );
            if current.phase == LoadPhase::Complete || progress.changed().await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = finished => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping background loading");
            workspace.shutdown();
        }
    }

    let images = workspace.images().await;
    let mut loaded = 0;
    for image in &images {
        if workspace.is_loaded(image.id).await {
            loaded += 1;
        }
    }
    tracing::info!(
        job_id,
        images = images.len(),
        loaded,
        annotations = workspace.annotations().await.len(),
        "Prefetch finished",
    );
}

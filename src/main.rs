mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use coursegen::backend::{ContentBackend, HttpContentBackend, InMemoryContentBackend};
use coursegen::config::CoursegenConfig;
use coursegen::error::CoursegenError;
use coursegen::generators::GeneratorSet;
use coursegen::job::{AuditRecord, GenerationJob, GenerationRequest, JobStatus};
use coursegen::notify::{HookChain, LogHook, WebhookHook};
use coursegen::orchestrator::{CourseOrchestrator, GenerationContext, StartOutcome};
use coursegen::outline::{MediaType, Outline, OutlineNode};
use coursegen::store::{FileJobStore, InMemoryJobStore, JobStore};
use ui::JobProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = CoursegenConfig::load().context("loading configuration")?;
    if let Some(n) = cli.max_retries {
        config.max_retries = n;
    }
    if let Some(n) = cli.concurrency {
        config.max_concurrency = n;
    }
    if let Some(dir) = cli.store_dir {
        config.store_dir = dir;
    }
    config.validate()?;

    match cli.command {
        Command::Run {
            outline,
            job_id,
            request,
            grade_level,
            media,
            no_assessments,
        } => {
            let outline: Outline = read_json(&outline)?;
            outline
                .validate()
                .map_err(|e| CoursegenError::Outline(e.to_string()))?;
            let mut request: GenerationRequest = match request {
                Some(path) => read_json(&path)?,
                None => GenerationRequest::default(),
            };
            if grade_level.is_some() {
                request.grade_level = grade_level;
            }
            request
                .media_types
                .extend(media.into_iter().map(MediaType::from));
            if no_assessments {
                request.include_assessments = false;
            }

            let Some(url) = config.content_service_url.clone() else {
                bail!("no content service configured; set COURSEGEN_CONTENT_URL or try `coursegen demo`");
            };
            let backend = Arc::new(HttpContentBackend::new(url, config.api_key.clone())?);
            let store = Arc::new(FileJobStore::open(&config.store_dir).await?);
            info!(dir = %store.dir().display(), "job records");
            let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            generate(&config, store, backend, job_id, outline, request).await
        }
        Command::Status { job_id } => {
            let store = FileJobStore::open(&config.store_dir).await?;
            let job = store
                .get_job(&job_id)
                .await?
                .ok_or(CoursegenError::JobNotFound(job_id))
                .with_context(|| format!("looking in {}", store.dir().display()))?;
            ui::print_job(&job);
            Ok(())
        }
        Command::Demo => {
            let backend = Arc::new(InMemoryContentBackend::new());
            let store = Arc::new(InMemoryJobStore::new());
            let request = GenerationRequest {
                grade_level: Some("6".into()),
                media_types: vec![MediaType::AudioDigest],
                ..Default::default()
            };
            let job_id = format!("demo-{}", uuid::Uuid::new_v4());
            generate(&config, store, backend.clone(), job_id, demo_outline(), request).await?;
            println!("  {} artifacts in the in-memory content service", backend.len());
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "coursegen=debug" } else { "coursegen=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

/// Create the job, start it and follow it until it settles.
async fn generate(
    config: &CoursegenConfig,
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ContentBackend>,
    job_id: String,
    outline: Outline,
    request: GenerationRequest,
) -> Result<()> {
    let mut hooks = HookChain::new().with(Arc::new(LogHook));
    if let Some(url) = &config.webhook_url {
        let mut webhook = WebhookHook::new(url.clone())?;
        if !config.service_token.is_empty() {
            webhook = webhook.with_bearer(config.service_token.clone());
        }
        hooks = hooks.with(Arc::new(webhook));
    }

    let orchestrator = CourseOrchestrator::new(GenerationContext {
        store: store.clone(),
        generators: GeneratorSet::from_backend(backend),
        hook: Arc::new(hooks),
        settings: config.settings(),
    });

    let job = GenerationJob::new(job_id.clone(), outline.clone(), request.clone());
    let total = outline.required_nodes(&request).len();
    store.create_job(job).await?;
    println!("Job {job_id}: {}", outline.title);

    let handle = match orchestrator
        .start_orchestration(&job_id, outline.clone(), request)
        .await?
    {
        StartOutcome::Started(handle) => handle,
        StartOutcome::AlreadyInProgress => bail!("job {job_id} is already running"),
        StartOutcome::AlreadyFinished(status) => {
            println!("Job {job_id} already finished as {status}");
            return Ok(());
        }
    };

    let mut progress = JobProgress::start(&outline.title, total);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let wait = handle.wait();
    tokio::pin!(wait);
    let job = loop {
        tokio::select! {
            finished = &mut wait => break finished?,
            _ = ticker.tick() => {
                if let Some(job) = store.get_job(&job_id).await? {
                    progress.update(&job);
                }
            }
        }
    };
    progress.update(&job);
    progress.complete(&job);
    progress.print_audit(&AuditRecord::from_job(&job));
    orchestrator.shutdown().await;

    if job.status == JobStatus::Failed {
        bail!("job {job_id} failed");
    }
    Ok(())
}

fn demo_outline() -> Outline {
    Outline::new("demo-fractions", "Fractions for Beginners")
        .with_path(
            OutlineNode::path("path-basics", "What is a fraction?", 1)
                .with_description("Parts of a whole")
                .with_child(
                    OutlineNode::lesson("lesson-halves", "Halves and quarters", 1)
                        .with_child(OutlineNode::section("sec-halves", "Halves", 1))
                        .with_child(OutlineNode::section("sec-quarters", "Quarters", 2))
                        .with_child(OutlineNode::assessment("quiz-halves", "Check your halves", 3))
                        .with_child(OutlineNode::media(
                            "audio-halves",
                            "Halves, read aloud",
                            4,
                            MediaType::AudioDigest,
                        )),
                )
                .with_child(
                    OutlineNode::lesson("lesson-compare", "Comparing fractions", 2)
                        .with_child(OutlineNode::section("sec-same-denominator", "Same denominator", 1))
                        .with_child(OutlineNode::section("sec-cross-multiply", "Cross multiplying", 2)),
                ),
        )
        .with_path(
            OutlineNode::path("path-operations", "Working with fractions", 2).with_child(
                OutlineNode::lesson("lesson-adding", "Adding fractions", 1)
                    .with_child(OutlineNode::section("sec-common-denominator", "Common denominators", 1))
                    .with_child(OutlineNode::media(
                        "video-adding",
                        "Adding, animated",
                        2,
                        MediaType::Video,
                    )),
            ),
        )
}

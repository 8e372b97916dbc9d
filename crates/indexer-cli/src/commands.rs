//! Command implementations for corpus-indexer.
//!
//! Handles:
//! - run: resume check, then start or re-attach and follow the job
//! - watch: follow a server-side job until it is idle
//! - stop: stop the job and persist the stop intent
//! - status: print the active job and its status

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{info, warn};

use indexer_client::{ClientConfig, HttpIndexerClient};
use indexer_orchestrator::{
    BatchExecutor, Collaborators, FileStopIntentStore, IndexingOrchestrator, JobHandle,
    ProgressSink, ResumeOutcome, StartOptions, StartedJob, StatusProvider, StopIntentStore,
    StopRequest,
};
use indexer_types::{ExecutionMode, JobOutcome, JobType, Settings};

use crate::cli::Overrides;
use crate::presenter::ConsoleSink;

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(overrides: &Overrides) -> Result<Settings> {
    let mut settings =
        Settings::load(overrides.config.as_deref()).context("Failed to load configuration")?;

    if let Some(endpoint) = &overrides.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(job_type) = &overrides.job_type {
        settings.job_type = job_type.clone();
    }
    if let Some(mode) = overrides.mode {
        settings.mode = mode;
    }
    if let Some(log_level) = &overrides.log_level {
        settings.log_level = log_level.clone();
    }

    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn build_client(settings: &Settings) -> Result<Arc<HttpIndexerClient>> {
    let client = HttpIndexerClient::new(ClientConfig::from_settings(settings))
        .context("Failed to create indexing service client")?;
    Ok(Arc::new(client))
}

fn build_orchestrator(
    settings: &Settings,
    mode: ExecutionMode,
    sink: Arc<dyn ProgressSink>,
) -> Result<IndexingOrchestrator> {
    let client = build_client(settings)?;
    let executor: Arc<dyn BatchExecutor> = client.clone();
    let provider: Arc<dyn StatusProvider> = client;
    let stop_intents: Arc<dyn StopIntentStore> =
        Arc::new(FileStopIntentStore::new(settings.stop_intent_path()));

    IndexingOrchestrator::new(
        JobType::new(settings.job_type.clone()),
        mode,
        settings.orchestrator.clone(),
        Collaborators {
            executor,
            provider,
            stop_intents,
            sink,
        },
    )
    .context("Failed to create orchestrator")
}

fn log_startup(settings: &Settings, mode: ExecutionMode) {
    info!("Configuration:");
    info!("  Endpoint: {}", settings.endpoint);
    info!("  Job type: {}", settings.job_type);
    info!("  Mode: {:?}", mode);
    info!("  State dir: {}", settings.state_dir);
}

/// Start a job, or re-attach to one, and follow it to the end.
pub async fn run_job(
    overrides: &Overrides,
    batch_size: Option<u32>,
    only_tagged: Option<String>,
    total: Option<u64>,
) -> Result<()> {
    let settings = load_settings(overrides)?;
    init_logging(&settings)?;
    log_startup(&settings, settings.mode);

    let orchestrator = build_orchestrator(&settings, settings.mode, Arc::new(ConsoleSink::new()))?;

    match orchestrator
        .check_and_resume()
        .await
        .context("Resume check failed")?
    {
        ResumeOutcome::Resumed(handle) => {
            println!("Re-attached to a running {} job", settings.job_type);
            return follow_loop(&orchestrator, handle).await;
        }
        ResumeOutcome::Draining(_) => {
            println!("A stopped job is still draining; waiting for it to finish");
            return follow_poller(&orchestrator).await;
        }
        ResumeOutcome::Polling(_) => {
            println!("A {} job is already running on the server", settings.job_type);
            return follow_poller(&orchestrator).await;
        }
        ResumeOutcome::Idle | ResumeOutcome::AlreadyAttached => {}
    }

    let mut options = StartOptions::default();
    if let Some(batch_size) = batch_size {
        options = options.with_batch_size(batch_size);
    }
    if let Some(tag) = only_tagged {
        options = options.only_tagged(tag);
    }
    if let Some(total) = total {
        options = options.with_total(total);
    }

    match orchestrator
        .start(options)
        .await
        .context("Failed to start job")?
    {
        StartedJob::Stepped(handle) => follow_loop(&orchestrator, handle).await,
        StartedJob::Queued(job_id) => {
            println!("Enqueued job {job_id}");
            follow_poller(&orchestrator).await
        }
        StartedJob::Exhausted => bail!("No credits left; nothing was enqueued"),
    }
}

/// Wait for a client-stepped loop; the first Ctrl+C asks it to stop.
async fn follow_loop(orchestrator: &IndexingOrchestrator, handle: JobHandle) -> Result<()> {
    let wait = handle.wait();
    tokio::pin!(wait);
    let mut stopping = false;

    let summary = loop {
        tokio::select! {
            summary = &mut wait => break summary.context("Job task failed")?,
            result = signal::ctrl_c(), if !stopping => {
                result.context("Failed to listen for Ctrl+C")?;
                stopping = true;
                info!("Received Ctrl+C, stopping after the current batch...");
                orchestrator.stop().await.context("Failed to stop job")?;
            }
        }
    };

    if summary.outcome == JobOutcome::Incomplete {
        bail!(
            "Job ended incomplete with {} errors ({}/{} processed)",
            summary.errors.len(),
            summary.processed,
            summary
                .total
                .map_or_else(|| "?".to_string(), |t| t.to_string())
        );
    }
    Ok(())
}

/// Wait for the reconciler to see the server go idle.
///
/// The first Ctrl+C stops the job and keeps watching it drain; the second
/// stops watching.
async fn follow_poller(orchestrator: &IndexingOrchestrator) -> Result<()> {
    let reconciler = orchestrator.reconciler();
    let mut stop_sent = false;

    loop {
        tokio::select! {
            _ = reconciler.wait_until_stopped() => return Ok(()),
            result = signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                if stop_sent {
                    warn!("Stopped watching; the server may still be draining");
                    reconciler.stop_polling();
                    return Ok(());
                }
                stop_sent = true;
                info!("Received Ctrl+C, asking the server to stop...");
                orchestrator.stop().await.context("Failed to stop job")?;
            }
        }
    }
}

/// Follow a server-side job in queue mode until it goes idle.
pub async fn watch_job(overrides: &Overrides, interval_ms: Option<u64>) -> Result<()> {
    let mut settings = load_settings(overrides)?;
    if let Some(interval_ms) = interval_ms {
        settings.orchestrator.poll_interval_ms = interval_ms;
    }
    settings.validate().context("Invalid configuration")?;
    init_logging(&settings)?;
    log_startup(&settings, ExecutionMode::Queue);

    let orchestrator = build_orchestrator(
        &settings,
        ExecutionMode::Queue,
        Arc::new(ConsoleSink::new()),
    )?;

    match orchestrator
        .check_and_resume()
        .await
        .context("Resume check failed")?
    {
        ResumeOutcome::Idle => {
            println!("No active {} job", settings.job_type);
            Ok(())
        }
        _ => follow_poller(&orchestrator).await,
    }
}

/// Stop the job of the configured type.
pub async fn stop_job(overrides: &Overrides) -> Result<()> {
    let settings = load_settings(overrides)?;
    init_logging(&settings)?;

    let orchestrator = build_orchestrator(&settings, settings.mode, Arc::new(ConsoleSink::new()))?;
    match orchestrator
        .stop_and_wait()
        .await
        .context("Failed to stop job")?
    {
        StopRequest::Requested(job_id) => {
            println!("Stop requested for job {job_id}");
            println!("Run 'corpus-indexer watch' to follow it until it drains");
        }
        StopRequest::AlreadyRequested(job_id) => {
            println!("Stop was already requested for job {job_id}");
        }
        StopRequest::NotLive => {
            println!("No active {} job", settings.job_type);
        }
    }
    Ok(())
}

/// Print the active job report and its current status.
pub async fn show_status(overrides: &Overrides) -> Result<()> {
    let settings = load_settings(overrides)?;
    init_logging(&settings)?;

    let client = build_client(&settings)?;
    let job_type = JobType::new(settings.job_type.clone());
    let stop_intents = FileStopIntentStore::new(settings.stop_intent_path());

    let active = client
        .get_active_job(&job_type)
        .await
        .context("Failed to query active job")?;

    println!("Corpus Indexer Status");
    println!("=====================");
    println!("Endpoint:   {}", settings.endpoint);
    println!("Job type:   {}", job_type);
    println!("Mode:       {:?}", settings.mode);

    match stop_intents.is_set(&job_type) {
        Ok(true) => println!("Stop:       requested"),
        Ok(false) => {}
        Err(e) => warn!("Failed to read stop intent: {}", e),
    }

    if !active.active {
        println!("State:      IDLE");
        return Ok(());
    }

    println!("State:      ACTIVE");
    if let Some(job_id) = &active.job_id {
        println!("Job id:     {}", job_id);
    }
    if let Some(started_at) = active.started_at {
        println!("Started:    {}", started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    match (active.processed, active.total) {
        (Some(processed), Some(total)) => println!("Processed:  {}/{}", processed, total),
        (Some(processed), None) => println!("Processed:  {}", processed),
        _ => {}
    }
    if let Some(remaining) = active.remaining {
        println!("Remaining:  {}", remaining);
    }

    if let Some(job_id) = &active.job_id {
        let status = client
            .get_status(job_id)
            .await
            .context("Failed to query job status")?;
        println!(
            "Worker:     {}",
            if status.worker_active { "running" } else { "waiting" }
        );
        println!(
            "Queue:      {}",
            if status.queue_non_empty { "non-empty" } else { "empty" }
        );
        if let Some(credits) = status.credits_remaining {
            println!("Credits:    {}", credits);
        }
    }

    Ok(())
}

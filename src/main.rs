//! # pubsub-jobs
//!
//! Command line front end of the job queue.
//!
//! ## Usage
//!
//! ```bash
//! pubsub-jobs publish send-email '{"to":"someone@example.com"}'
//! pubsub-jobs work send-email --max-messages 5 --bulk-size 2
//! ```
//!
//! Configuration is read from the environment and `.env`; see
//! `QueueConfig::from_env`.
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::WrapErr, Result};
use dotenvy::dotenv;
use log::{error, info, warn};
use tokio::{signal::unix::SignalKind, sync::broadcast::error::RecvError};

use pubsub_jobs::{
    config::WorkerOptions,
    constants::{DEFAULT_BULK_SIZE, DEFAULT_FLOW_CONTROL_MAX_MESSAGES},
    jobs::{Acknowledger, Job, JobQueue, ReceivedJob, Worker, WorkerEvent},
    logging::setup_logging,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one job and print its message id
    Publish {
        /// Job name
        name: String,
        /// Job payload, a JSON object
        payload: String,
    },
    /// Consume jobs, logging and acknowledging each one, until SIGINT or SIGTERM
    Work {
        /// Job name
        name: String,
        #[arg(long, default_value_t = DEFAULT_FLOW_CONTROL_MAX_MESSAGES)]
        max_messages: usize,
        #[arg(long, default_value_t = DEFAULT_BULK_SIZE)]
        bulk_size: usize,
        #[arg(long, default_value_t = 100)]
        poll_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().wrap_err("Failed to initialize error reporting")?;

    dotenv().ok();
    setup_logging()?;

    let cli = Cli::parse();
    let queue = JobQueue::setup()?;

    match cli.command {
        Commands::Publish { name, payload } => {
            let payload =
                serde_json::from_str(&payload).wrap_err("Payload must be valid JSON")?;
            let job = Job::from_value(name, payload)?;
            let message_id = job.save(queue.producer().as_ref()).await?;
            info!("Published job {} as {}", job.name, message_id);
            println!("{}", message_id);
        }
        Commands::Work {
            name,
            max_messages,
            bulk_size,
            poll_interval_ms,
        } => {
            let worker = queue.worker()?;
            tokio::spawn(log_worker_events(worker.subscribe_events()));

            let options = WorkerOptions::new(max_messages)
                .with_bulk_size(bulk_size)
                .with_poll_interval(Duration::from_millis(poll_interval_ms));
            worker.process(&name, log_and_ack, options).await?;

            wait_for_shutdown_signal().await?;
            shutdown(&worker).await;
        }
    }

    Ok(())
}

async fn log_and_ack(job: ReceivedJob, acker: Acknowledger) {
    info!(
        "Job {} [{}] received (attempt {:?}): {}",
        job.name,
        job.id,
        job.delivery_attempt,
        serde_json::Value::Object(job.data.clone())
    );
    if let Err(e) = acker.ack().await {
        error!("{}", e);
    }
}

async fn log_worker_events(mut events: tokio::sync::broadcast::Receiver<WorkerEvent>) {
    loop {
        match events.recv().await {
            Ok(WorkerEvent::Started {
                job_name,
                subscription,
            }) => info!("Worker for {} started on {}", job_name, subscription),
            Ok(WorkerEvent::Failed(e)) => error!("Worker error: {}", e),
            Ok(WorkerEvent::Stopped { job_name }) => info!("Worker for {} stopped", job_name),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {} worker events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigint = tokio::signal::unix::signal(SignalKind::interrupt())
        .wrap_err("Failed to create SIGINT signal")?;
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .wrap_err("Failed to create SIGTERM signal")?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT."),
        _ = sigterm.recv() => info!("Received SIGTERM."),
    };
    Ok(())
}

async fn shutdown(worker: &Worker) {
    info!("Worker shutting down");
    worker.shutdown().await;
    info!("Worker shutdown complete");
}

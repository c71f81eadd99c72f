use crate::{
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use commands::Commands;
use connectors::{
    sink::{RecordSink, postgres::PostgresSink},
    source::{Source, jsonl::JsonlSource},
};
use engine_core::{
    dlq::DeadLetterSink,
    state::{CheckpointStore, sled_store::SledCheckpointStore},
};
use engine_pipeline::orchestrator::PipelineOrchestrator;
use model::job::{JobSpec, JobState};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "decant",
    version = "0.1.0",
    about = "Chunked warehouse-to-Postgres load tool"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let exit = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "Command failed.");
            ExitCode::GeneralError
        }
    };
    std::process::exit(exit.as_i32());
}

async fn dispatch(command: Commands) -> Result<ExitCode, CliError> {
    match command {
        Commands::Run { job, drop_table } => run_job(&job, drop_table).await,
        Commands::TestConn { conn_str } => {
            let mut sink = PostgresSink::connect(&conn_str).await?;
            sink.ping().await?;
            println!("Connection OK");
            Ok(ExitCode::Success)
        }
        Commands::Progress { job, json } => {
            show_progress(&job, json).await?;
            Ok(ExitCode::Success)
        }
        Commands::Dlq { job, json } => {
            show_dlq(&job, json)?;
            Ok(ExitCode::Success)
        }
    }
}

async fn run_job(path: &str, drop_table: bool) -> Result<ExitCode, CliError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut spec: JobSpec = serde_json::from_str(&raw)?;
    if drop_table {
        spec.settings.drop_destination_table = true;
    }

    let snapshot = spec.source.snapshot_path.clone().ok_or_else(|| {
        CliError::Unexpected(
            "source.snapshot_path is required; point it at the exported JSONL file".into(),
        )
    })?;

    let source = Source::new(JsonlSource::new(&snapshot, spec.source.columns.clone()));
    let sink = PostgresSink::connect(&spec.destination.conn_string).await?;
    let store = open_state_store()?;
    let dlq = DeadLetterSink::new(decant_home()?.join("dlq"), &spec.id);

    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let (events_tx, mut events_rx) =
        tokio::sync::mpsc::unbounded_channel::<model::events::ProgressEvent>();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event.progress_percent {
                Some(pct) => info!(
                    job_id = %event.job_id,
                    status = %event.status,
                    rows_loaded = event.rows_loaded,
                    rows_failed = event.rows_failed,
                    "Progress: {pct:.1}%"
                ),
                None => info!(
                    job_id = %event.job_id,
                    status = %event.status,
                    rows_loaded = event.rows_loaded,
                    rows_failed = event.rows_failed,
                    "Progress."
                ),
            }
        }
    });

    let report = PipelineOrchestrator::new(
        spec,
        source,
        Box::new(sink),
        store,
        dlq,
        shutdown.cancel_token(),
    )
    .with_events(events_tx)
    .run()
    .await;

    output::print_report(&report);

    Ok(match report.state {
        JobState::Completed | JobState::CompletedWithErrors => ExitCode::Success,
        JobState::Cancelled => ExitCode::ShutdownRequested,
        _ => ExitCode::GeneralError,
    })
}

async fn show_progress(job: &str, as_json: bool) -> Result<(), CliError> {
    let store = open_state_store()?;
    match store.load(job).await? {
        None => println!("No checkpoint recorded for job '{job}'"),
        Some(checkpoint) => {
            if as_json {
                let json =
                    serde_json::to_string_pretty(&checkpoint).map_err(CliError::JsonSerialize)?;
                println!("{json}");
            } else {
                output::print_checkpoint(&checkpoint);
            }
        }
    }
    Ok(())
}

fn show_dlq(job: &str, as_json: bool) -> Result<(), CliError> {
    let dir = decant_home()?.join("dlq");
    let stats = DeadLetterSink::stats(&dir, job).map_err(CliError::DlqRead)?;
    if as_json {
        let json = serde_json::to_string_pretty(&stats).map_err(CliError::JsonSerialize)?;
        println!("{json}");
    } else {
        output::print_dlq(job, &stats);
    }
    Ok(())
}

fn decant_home() -> Result<PathBuf, CliError> {
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?;
    Ok(home.join(".decant"))
}

fn open_state_store() -> Result<Box<dyn CheckpointStore>, CliError> {
    let path = decant_home()?.join("state");
    let store = SledCheckpointStore::open(&path).map_err(|err| {
        CliError::Unexpected(format!(
            "Failed to open state store at {}: {err}",
            path.display()
        ))
    })?;
    Ok(Box::new(store))
}

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use robowrap::config::{self, Settings};
use robowrap::pipeline::{ConsoleSink, LogPipeline, LogProducer, PipelineConfig};
use robowrap::scheduler::{self, ScheduleState, TriggerOutcome, POLL_INTERVAL};
use robowrap::supervisor::{ExitClass, JobGate, RunRequest, Supervisor};
use robowrap::verify;

/// Supervise a robocopy-style file-copy tool
#[derive(Parser)]
#[command(name = "robowrap")]
#[command(about = "Run, watch, and verify external file-copy jobs", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one copy job and stream its output
    Run {
        /// Source directory
        source: String,
        /// Destination directory
        dest: String,
        /// Extra options passed through to the copy tool
        #[arg(long, default_value = "")]
        options: String,
        /// Copy tool executable
        #[arg(long, default_value = "robocopy")]
        tool: String,
    },
    /// Compare source and destination trees by SHA-256
    Verify {
        /// Source directory
        source: PathBuf,
        /// Destination directory
        dest: PathBuf,
    },
    /// Run copies on the configured schedule until interrupted
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("robowrap started with verbosity level: {}", cli.verbose);

    let result = match cli.command {
        Commands::Run {
            source,
            dest,
            options,
            tool,
        } => run_copy(tool, source, dest, options).await,
        Commands::Verify { source, dest } => run_verify(source, dest).await,
        Commands::Watch => run_watch().await,
    };

    if let Err(e) = result {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Start the console pipeline on a background task. The returned token
/// stops it after one final drain.
fn start_pipeline() -> (
    LogProducer,
    CancellationToken,
    tokio::task::JoinHandle<()>,
) {
    let mut pipeline = LogPipeline::new(ConsoleSink, PipelineConfig::default());
    let producer = pipeline.producer();
    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            pipeline.run(shutdown).await;
        })
    };
    (producer, shutdown, task)
}

async fn run_copy(
    tool: String,
    source: String,
    dest: String,
    options: String,
) -> anyhow::Result<()> {
    let (producer, shutdown, pipeline_task) = start_pipeline();

    let supervisor = Supervisor::production(JobGate::new());
    let request = RunRequest {
        program: tool,
        source,
        dest,
        options,
    };
    let job = supervisor.start(request, producer).await?;

    // Ctrl-C must reach the tool's own process group, so translate it into
    // an explicit stop of the job.
    let interrupt = CancellationToken::new();
    let ctrl_c = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        })
    };
    let report = job.wait_with_shutdown(interrupt).await?;
    ctrl_c.abort();

    shutdown.cancel();
    pipeline_task.await?;

    if report.class == ExitClass::Fatal {
        std::process::exit(report.exit.code().min(255));
    }
    Ok(())
}

async fn run_verify(source: PathBuf, dest: PathBuf) -> anyhow::Result<()> {
    let (producer, shutdown, pipeline_task) = start_pipeline();

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let outcome = verify::verify(&source, &dest, cancel, &producer).await;
    ctrl_c.abort();

    shutdown.cancel();
    pipeline_task.await?;
    outcome?;
    Ok(())
}

async fn run_watch() -> anyhow::Result<()> {
    let settings_path = config::default_path();
    let settings = config::load(&settings_path);
    if !settings.schedule_enabled {
        anyhow::bail!(
            "schedule is disabled in {} (set schedule_enabled)",
            settings_path.display()
        );
    }
    if !settings.paths_set() {
        return Err(robowrap::RobowrapError::PathsUnset)
            .with_context(|| format!("check {}", settings_path.display()));
    }

    let (producer, shutdown, pipeline_task) = start_pipeline();

    let state = ScheduleState::at_startup(
        settings.schedule_enabled,
        settings.interval_hours,
        settings.last_run_at,
        chrono::Local::now(),
    );
    let gate = JobGate::new();
    let supervisor = std::sync::Arc::new(Supervisor::production(gate.clone()));

    let stop = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    let trigger_producer = producer.clone();
    let trigger_settings = settings.clone();
    let final_state = scheduler::run_loop(
        state,
        gate,
        producer,
        POLL_INTERVAL,
        {
            let settings = settings.clone();
            move || settings.paths_set()
        },
        move || {
            let supervisor = supervisor.clone();
            let producer = trigger_producer.clone();
            let settings = trigger_settings.clone();
            async move {
                let request = RunRequest {
                    program: "robocopy".to_string(),
                    source: settings.source,
                    dest: settings.dest,
                    options: settings.options,
                };
                let job = match supervisor.start(request, producer).await {
                    Ok(job) => job,
                    Err(e) => {
                        error!("scheduled run failed to start: {e}");
                        return TriggerOutcome::Failed;
                    }
                };
                match job.wait().await {
                    Ok(report) if report.killed => TriggerOutcome::Killed,
                    Ok(_) => TriggerOutcome::Completed,
                    Err(e) => {
                        error!("scheduled run failed: {e}");
                        TriggerOutcome::Failed
                    }
                }
            }
        },
        shutdown.clone(),
    )
    .await;

    // Persist the last-run stamp for the next start.
    let updated = Settings {
        last_run_at: final_state.last_run_at(),
        ..settings
    };
    if let Err(e) = config::save(&settings_path, &updated) {
        error!("failed to save settings: {e}");
    }

    pipeline_task.await?;
    Ok(())
}

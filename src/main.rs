//! Magellan Executor - Distributed annealing-search executor
//!
//! This is the main entry point for the executor binary. The executor
//! connects to the Magellan scheduler, receives search task launches,
//! runs one simulated-annealing worker per task, and reports status
//! updates back.

mod cli;
mod config;
mod error;
mod executor;
mod logging;
mod protocol;
mod provision;
mod scheduler;
mod search;
mod types;
mod version;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::executor::{ExecutorLifecycle, TaskTracker};
use crate::logging::LogGuards;
use crate::protocol::{Message, MessageEnvelope, RegisterRequest};
use crate::provision::ArtifactProvisioner;
use crate::scheduler::{
    ClientCommand, ClientEvent, HeartbeatStats, SchedulerClient, SchedulerClientConfig,
};
use crate::search::{MockObjectiveFactory, ObjectiveFactory};

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    // For commands that don't need full logging, use simple setup
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    // Load configuration for the run command
    let config_path = match &cli.command {
        Commands::Run { config } => config.clone(),
        _ => None,
    };

    // Load config (or use defaults)
    let config = match ExecutorConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // Initialize logging with config settings.
    // The guards must be kept alive for the lifetime of the program.
    let _log_guards: LogGuards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    // Log version info at startup
    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting Magellan executor"
    );

    match cli.command {
        Commands::Run { .. } => run_executor(config)?,
        Commands::Version | Commands::Config { .. } => unreachable!(),
    }

    Ok(())
}

/// Run the executor in normal operation mode
fn run_executor(config: ExecutorConfig) -> Result<()> {
    info!(
        executor_id = %config.executor.id.as_deref().unwrap_or("(auto)"),
        scheduler_url = %config.scheduler.url,
        max_concurrent_tasks = config.executor.max_concurrent_tasks,
        cache_dir = %config.provisioning.cache_dir,
        "Configuration loaded"
    );

    // Ensure the provisioning cache root exists
    let cache_dir = config.cache_dir();
    if !cache_dir.exists() {
        std::fs::create_dir_all(&cache_dir).map_err(|e| Error::IoWrite {
            path: cache_dir.clone(),
            source: e,
        })?;
        info!(path = %cache_dir.display(), "Created package cache directory");
    }

    // Build and run the tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().min(8))
        .thread_name("magellan-executor")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async_executor_main(config))
}

/// Async executor main loop
async fn async_executor_main(config: ExecutorConfig) -> Result<()> {
    // Provisioner with the injected cache root
    let provisioner = Arc::new(ArtifactProvisioner::new(
        config.cache_dir(),
        Duration::from_secs(config.provisioning.download_timeout_secs),
    )?);

    // Objective capabilities. The deterministic mock factory keeps the
    // executor runnable without a domain library; real deployments link
    // one in here.
    let objectives: Arc<dyn ObjectiveFactory> = Arc::new(MockObjectiveFactory::default());

    // Lifecycle owns the worker tracker and the outbound message stream
    let (lifecycle, mut outbound_rx) = ExecutorLifecycle::new(
        config.executor.max_concurrent_tasks as usize,
        config.executor.queue_size,
        provisioner,
        objectives,
    );
    let tracker = lifecycle.tracker();

    // Heartbeat stats shared with the transport
    let stats = Arc::new(RwLock::new(HeartbeatStats::default()));

    let executor_name = config.executor.name.clone().unwrap_or_else(|| {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        format!("Magellan Executor ({})", host)
    });

    let register = RegisterRequest {
        executor_id: config.executor.id.clone(),
        name: executor_name.clone(),
        max_concurrent_tasks: config.executor.max_concurrent_tasks,
        executor_version: env!("CARGO_PKG_VERSION").to_string(),
        tags: config.executor.tags.clone(),
    };

    let client_config = SchedulerClientConfig {
        url: config.scheduler.url.clone(),
        connect_timeout: Duration::from_millis(config.scheduler.connect_timeout_ms),
        max_reconnect_attempts: config.scheduler.max_reconnect_attempts,
        initial_reconnect_delay: Duration::from_millis(config.scheduler.reconnect_interval_ms),
        max_reconnect_delay: Duration::from_secs(60),
        heartbeat_interval: Duration::from_millis(config.scheduler.heartbeat_interval_ms),
        message_queue_size: config.executor.queue_size,
    };

    let mut client = SchedulerClient::new(client_config, register, stats.clone());

    info!(
        executor_name = %executor_name,
        scheduler_url = %config.scheduler.url,
        "Starting executor"
    );

    // Start the scheduler client
    let mut event_rx = client.start().await?;

    // Set up graceful shutdown on Ctrl+C
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    // Periodic cleanup of terminal tasks from the tracker
    let mut cleanup_timer = tokio::time::interval(Duration::from_secs(300));
    cleanup_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Periodic heartbeat stats refresh
    let mut stats_timer = tokio::time::interval(Duration::from_secs(10));
    stats_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Executor event loop started");

    // Main event loop
    loop {
        tokio::select! {
            // Ctrl+C shutdown
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received");
                let abandoned = lifecycle.shutdown().await;
                if let Err(e) = client.shutdown(abandoned).await {
                    warn!(error = %e, "Error sending shutdown notification");
                }
                break;
            }

            // Events from the scheduler
            event = event_rx.recv() => {
                match event {
                    Some(ClientEvent::Connected) => {
                        info!("Connected to scheduler");
                    }
                    Some(ClientEvent::Registered { executor_id }) => {
                        lifecycle.on_registered(&executor_id);
                    }
                    Some(ClientEvent::TaskLaunched(launch)) => {
                        lifecycle.on_launch_task(launch).await;
                        refresh_stats(&stats, &tracker);
                    }
                    Some(ClientEvent::TaskKilled { task_id, reason }) => {
                        lifecycle.on_kill_task(&task_id, &reason);
                    }
                    Some(ClientEvent::FrameworkMessage(message)) => {
                        lifecycle.on_framework_message(message).await;
                    }
                    Some(ClientEvent::Disconnected { reason }) => {
                        lifecycle.on_disconnected(&reason);
                    }
                    Some(ClientEvent::Reconnecting { attempt }) => {
                        info!(attempt = attempt, "Reconnecting to scheduler");
                    }
                    Some(ClientEvent::HeartbeatAck) => {
                        debug!("Heartbeat acknowledged");
                    }
                    Some(ClientEvent::Error { message, fatal }) => {
                        if fatal {
                            error!(message = %message, "Fatal error from scheduler");
                            break;
                        } else {
                            warn!(message = %message, "Error from scheduler");
                        }
                    }
                    None => {
                        info!("Scheduler event channel closed");
                        break;
                    }
                }
            }

            // Outbound messages from workers and the lifecycle
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Message::StatusUpdate(update)) => {
                        debug!(
                            task_id = %update.task_id,
                            state = %update.state,
                            "Forwarding status update"
                        );
                        if let Err(e) = client.send_status(update).await {
                            error!(error = %e, "Failed to submit status update");
                        }
                        refresh_stats(&stats, &tracker);
                    }
                    Some(Message::FrameworkMessage(message)) => {
                        if let Err(e) = client.send_framework_message(message).await {
                            error!(error = %e, "Failed to relay framework message");
                        }
                    }
                    Some(other) => {
                        let envelope = MessageEnvelope::new(other);
                        if let Err(e) = client.send_command(ClientCommand::Send(envelope)).await {
                            error!(error = %e, "Failed to send message");
                        }
                    }
                    None => {
                        warn!("Outbound channel closed");
                        break;
                    }
                }
            }

            // Periodic heartbeat stats refresh
            _ = stats_timer.tick() => {
                refresh_stats(&stats, &tracker);
            }

            // Periodic cleanup of terminal tasks from the tracker
            _ = cleanup_timer.tick() => {
                tracker.cleanup_old_tasks(100);
                debug!(
                    finished = tracker.total_finished(),
                    failed = tracker.total_failed(),
                    running = tracker.running_count(),
                    "Task tracker cleanup"
                );
            }
        }
    }

    // Graceful shutdown
    info!(
        finished = tracker.total_finished(),
        failed = tracker.total_failed(),
        "Executor shutting down"
    );

    Ok(())
}

/// Refresh the heartbeat stats snapshot from the tracker
fn refresh_stats(stats: &Arc<RwLock<HeartbeatStats>>, tracker: &Arc<TaskTracker>) {
    let mut s = stats.write();
    s.active_tasks = tracker.active_task_ids();
    s.finished_task_count = tracker.total_finished();
    s.failed_task_count = tracker.total_failed();
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = ExecutorConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            config::init_config(path.as_deref(), force)?;
        }
        ConfigSubcommand::Validate { config } => {
            let path = config.as_deref();
            match ExecutorConfig::load(path) {
                Ok(_) => {
                    println!("Configuration is valid.");
                }
                Err(e) => {
                    eprint!("{}", e.format_for_terminal());
                    std::process::exit(e.exit_code());
                }
            }
        }
    }

    Ok(())
}

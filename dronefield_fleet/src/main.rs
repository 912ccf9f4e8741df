//! The `dronefield` binary: orchestrator, workers, supervisor and inspector.

use anyhow::{Context, Result};
use clap::Parser;
use dronefield_core::LivenessSource;
use dronefield_fleet::cli::{Cli, Command, InspectArgs, RunArgs, SuperviseArgs, WorkerArgs};
use dronefield_fleet::launcher::adopt_log;
use dronefield_fleet::{
    status, workers, Control, ControlChannel, FleetConfig, LogContext, Orchestrator, SharedLog, WorkerOptions,
    WorkerSpec,
};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn, Instrument};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Worker(args) => worker(args).await,
        Command::Supervise(args) => supervise(args).await,
        Command::Inspect(args) => inspect(args).await,
    };
    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("dronefield: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Resolves when the process is asked to stop (SIGTERM or Ctrl-C).
async fn stop_requested() {
    let mut control = match ControlChannel::install() {
        Ok(control) => control,
        Err(e) => {
            warn!("Cannot watch SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async { while control.recv().await != Control::Shutdown {} } => {}
    }
}

async fn run(args: RunArgs) -> Result<i32> {
    let seed = if args.seed == 0 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(1)
    } else {
        args.seed
    };

    let config = FleetConfig {
        program: std::env::current_exe().context("locating the dronefield binary")?,
        log_path: args.log.clone(),
        workers: WorkerOptions {
            seed,
            status_fifo: args.status_fifo.clone(),
            inspector_cmd: args.inspector_cmd.clone(),
            verbose: args.verbose,
        },
        supervisor: args.supervision.to_config(),
        ..FleetConfig::default()
    };

    let log = SharedLog::open(&config.log_path)?;
    let _guard = log.install(args.verbose)?;

    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("  DRONEFIELD");
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("  Seed:       {}", seed);
    eprintln!("  Log:        {}", config.log_path.display());
    eprintln!("  Status:     {}", config.workers.status_fifo.display());
    eprintln!("  Supervisor: {}", config.supervisor.source);
    info!("Fleet starting (seed {})", seed);

    let report = Orchestrator::new(config)
        .run(&log, stop_requested())
        .await
        .context("launching the fleet")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        for exit in &report.exits {
            let how = match (exit.code, exit.signal) {
                (Some(code), _) => format!("exit {}", code),
                (None, Some(signal)) => format!("signal {}", signal),
                _ => "unknown".to_string(),
            };
            eprintln!("  {:<11} pid {:>7}  {}", exit.role, exit.pid, how);
        }
        if report.supervisor_escalated() {
            eprintln!("  The supervisor terminated an unresponsive fleet");
        }
    }
    info!("Fleet finished (success={})", report.success());
    Ok(if report.success() { 0 } else { 1 })
}

async fn worker(args: WorkerArgs) -> Result<i32> {
    let mut spec = WorkerSpec::from_args(args.role, &args.descriptors)
        .with_context(|| format!("starting the {} worker", args.role))?;
    let log = SharedLog::from_fd(spec.take_log()?);
    let _guard = log.install(args.verbose)?;
    let mut control = ControlChannel::install().context("installing signal handling")?;

    let ctx = LogContext::new(args.role.name());
    let options = args.options();
    let span = ctx.span().clone();
    match workers::run_worker(spec, &options, &mut control, &ctx)
        .instrument(span)
        .await
    {
        Ok(outcome) => Ok(if outcome.is_success() { 0 } else { 1 }),
        Err(e) => {
            error!(parent: ctx.span(), "{:#}", e);
            Err(e)
        }
    }
}

async fn supervise(args: SuperviseArgs) -> Result<i32> {
    let (pids, log_fd) = args.split()?;
    let log = SharedLog::from_fd(adopt_log(log_fd)?);
    let _guard = log.install(args.verbose)?;
    let mut control = ControlChannel::install().context("installing signal handling")?;

    let ctx = LogContext::new("supervisor");
    let config = args.supervision.to_config();
    let activity = match config.source {
        LivenessSource::LogActivity => Some(log.activity()?),
        LivenessSource::Probe => None,
    };
    let span = ctx.span().clone();
    let escalated = workers::run_supervisor(&pids, config, args.seed, activity, &mut control, &ctx)
        .instrument(span)
        .await;
    Ok(if escalated { 1 } else { 0 })
}

async fn inspect(args: InspectArgs) -> Result<i32> {
    tokio::select! {
        result = status::inspect(&args.fifo, std::io::stdout()) => result?,
        _ = stop_requested() => {}
    }
    Ok(0)
}

//! Testhost Launch - command-line harness for the launcher library.
//!
//! Starts the test runner for an executable target with host debugging
//! enabled, prints the resulting launch settings as JSON on stdout and keeps
//! the test host alive until Ctrl-C.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use testhost_launcher::{
    platform, CancellationToken, LaunchCoordinator, LaunchRequest, LauncherError,
    LauncherOptions, ProjectId, Target, TargetResolver,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "testhost-launch")]
#[command(about = "Start a test runner with host debugging and report the test host")]
struct Args {
    /// Test assembly or executable to run
    target: PathBuf,

    /// Test adapter the runner should load
    #[arg(long)]
    adapter: PathBuf,

    /// Test runner executable (overrides the config file)
    #[arg(long)]
    runner: Option<PathBuf>,

    /// Working directory (defaults to the target's directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Extra environment variable for the runner, as KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Host discovery timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Launcher options file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Arguments passed to the runner after the target
    #[arg(last = true)]
    extra: Vec<String>,
}

fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Only executable targets can be launched from the command line.
struct NoProjects;

#[async_trait]
impl TargetResolver for NoProjects {
    async fn output_path(&self, project: ProjectId) -> testhost_launcher::Result<PathBuf> {
        Err(LauncherError::TargetResolution {
            target: project.to_string(),
            message: "project references are not supported here".into(),
        })
    }
}

fn load_options(args: &Args) -> Result<LauncherOptions> {
    let mut options = match &args.config {
        Some(path) => LauncherOptions::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => LauncherOptions::default(),
    };
    if let Some(runner) = &args.runner {
        options = options.with_runner_path(runner);
    }
    if let Some(ms) = args.timeout_ms {
        options = options.with_discovery_timeout(Duration::from_millis(ms));
    }
    options.validate()?;
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the settings JSON.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("Starting testhost launcher on {}", platform::current_platform());

    let options = load_options(&args)?;
    if options.runner_path.is_none() {
        bail!("no test runner configured; pass --runner or set runnerPath in --config");
    }

    let coordinator = LaunchCoordinator::new(&args.adapter, options, Arc::new(NoProjects));

    let mut request = LaunchRequest::new(Target::executable(&args.target)).with_args(args.extra);
    if let Some(cwd) = args.cwd {
        request = request.with_working_dir(cwd);
    }
    for (key, value) in args.env {
        request = request.with_env(key, value);
    }

    let cancel = CancellationToken::new();
    let settings = tokio::select! {
        result = coordinator.launch(&request, &cancel) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted before the test host was reported");
            cancel.cancel();
            coordinator.close().await;
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&settings)?);
    info!(
        "Test host {} is waiting for a debugger; press Ctrl-C to stop",
        settings.process_id
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping test host");
    coordinator.close().await;

    Ok(())
}

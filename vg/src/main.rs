//! vigilant - upstream file watcher
//!
//! CLI entry point for running cycles and managing the daemon.

use std::fs;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, eyre};
use tracing::{debug, info, warn};

use vigilant::cli::{Cli, Command, DaemonCommand, OutputFormat, get_log_path};
use vigilant::config::Config;
use vigilant::daemon::DaemonManager;
use vigilant::history::CycleLog;
use vigilant::host::{GitHubHost, RepositoryHost};
use vigilant::scheduler::{CycleReport, PairOutcome, Scheduler, SchedulerConfig};
use vigilant::watermark::{WatermarkStore, format_instant};

/// Where log output goes
enum LogTarget {
    File,
    Stderr,
}

fn parse_level(level: Option<&str>) -> tracing::Level {
    match level.map(|s| s.to_uppercase()).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(target: LogTarget, cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > INFO
    let level = parse_level(cli_log_level.or(config_log_level));
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    match target {
        LogTarget::File => {
            let log_path = get_log_path();
            if let Some(log_dir) = log_path.parent() {
                fs::create_dir_all(log_dir).context("Failed to create log directory")?;
            }
            let log_file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .context("Failed to open log file")?;
            tracing_subscriber::fmt()
                .with_writer(log_file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let target = match cli.command {
        Command::RunDaemon => LogTarget::File,
        _ => LogTarget::Stderr,
    };
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(target, cli.log_level.as_deref(), config_log_level.as_deref())
        .context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match &cli.command {
        Command::Run => cmd_foreground(&cli).await,
        Command::Once => cmd_once(&cli).await,
        Command::RunDaemon => cmd_foreground(&cli).await,
        Command::Daemon { command } => match command {
            DaemonCommand::Start { foreground } => cmd_start(&cli, *foreground).await,
            DaemonCommand::Stop { force } => cmd_stop(*force),
            DaemonCommand::Status { format } => cmd_status(*format),
            DaemonCommand::Trigger => cmd_trigger(),
        },
        Command::Config { format } => cmd_config(&cli, *format),
        Command::Watermarks { format } => cmd_watermarks(&cli, *format),
        Command::History { lines } => cmd_history(&cli, *lines),
        Command::Logs { follow, lines } => cmd_logs(*follow, *lines),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    // Validate up front so misconfiguration fails before any network call
    config.pairs().context("Invalid configuration")?;
    Ok(config)
}

/// Assemble the engine from configuration
///
/// Config, credential and state-directory problems are fatal here.
fn build_scheduler(config: &Config) -> Result<Scheduler> {
    debug!("build_scheduler: called");
    let pairs = config.pairs().context("Invalid configuration")?;
    let token = config
        .github
        .resolve_token()
        .context("GitHub token not found. Check token-env or token-file in your config.")?;

    let host: Arc<dyn RepositoryHost> =
        Arc::new(GitHubHost::from_config(&config.github, token).context("Failed to create GitHub client")?);
    let store = Arc::new(WatermarkStore::from_config(&config.watermark).context("Failed to open watermark store")?);
    let history = CycleLog::in_dir(store.dir());
    info!(
        pairs = pairs.len(),
        state_dir = %store.dir().display(),
        scope = ?store.scope(),
        "Engine initialized"
    );

    Ok(Scheduler::new(SchedulerConfig::from_config(config), pairs, host, store).with_history(history))
}

/// Run one cycle; any failed pair makes the command fail
async fn cmd_once(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let scheduler = build_scheduler(&config)?;
    let report = scheduler.run_once().await;
    print_report(&report);

    if report.is_success() {
        Ok(())
    } else {
        Err(eyre!("{} of {} pair(s) failed", report.failures(), report.outcomes.len()))
    }
}

async fn cmd_start(cli: &Cli, foreground: bool) -> Result<()> {
    debug!(foreground, "cmd_start: called");
    let daemon = DaemonManager::new();
    if let Some(pid) = daemon.running_pid() {
        println!("vigilant is already running (PID: {})", pid);
        return Ok(());
    }

    if foreground {
        return cmd_foreground(cli).await;
    }

    // Fail here rather than inside a detached process
    load_config(cli)?;

    let mut args = Vec::new();
    if let Some(path) = &cli.config {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }
    if let Some(level) = &cli.log_level {
        args.push("--log-level".to_string());
        args.push(level.clone());
    }

    let pid = daemon.start(&args)?;
    println!("vigilant started (PID: {})", pid);
    println!("Logs: {}", get_log_path().display());
    Ok(())
}

/// Run the scheduler in this process until SIGINT/SIGTERM
async fn cmd_foreground(cli: &Cli) -> Result<()> {
    let daemon = DaemonManager::new();
    if let Some(pid) = daemon.running_pid()
        && pid != std::process::id() as i32
    {
        return Err(eyre!("vigilant is already running (PID: {})", pid));
    }

    let config = load_config(cli)?;
    let scheduler = Arc::new(build_scheduler(&config)?);
    daemon.register_self()?;

    let result = run_daemon(scheduler).await;

    if let Err(e) = daemon.unregister() {
        warn!(error = %e, "Failed to remove PID file");
    }
    result
}

async fn run_daemon(scheduler: Arc<Scheduler>) -> Result<()> {
    debug!("run_daemon: called");
    let (handle, task) = scheduler.spawn();
    info!("Daemon running. SIGUSR1 triggers a cycle, Ctrl+C or SIGTERM stops.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigusr1 = signal(SignalKind::user_defined1())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sigusr1.recv() => {
                    info!("SIGUSR1 received - triggering cycle");
                    match handle.trigger() {
                        Ok(true) => debug!("run_daemon: cycle queued"),
                        Ok(false) => info!("Cycle already pending, trigger coalesced"),
                        Err(e) => warn!(error = %e, "Failed to trigger cycle"),
                    }
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        debug!("run_daemon: ctrl_c received");
    }

    info!("Daemon shutting down, waiting for any running cycle");
    handle.shutdown();
    task.await.context("Scheduler task failed")?;
    info!("Daemon stopped");
    Ok(())
}

fn cmd_stop(force: bool) -> Result<()> {
    let daemon = DaemonManager::new();
    if !daemon.is_running() {
        println!("vigilant is not running");
        return Ok(());
    }
    println!("Stopping vigilant; a running cycle finishes first");
    daemon.stop(force)?;
    println!("vigilant stopped");
    Ok(())
}

fn cmd_trigger() -> Result<()> {
    let pid = DaemonManager::new().trigger()?;
    println!("Triggered cycle in vigilant (PID: {})", pid);
    Ok(())
}

fn cmd_status(format: OutputFormat) -> Result<()> {
    let status = DaemonManager::new().status();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => {
            match status.pid {
                Some(pid) => println!("vigilant is running (PID: {})", pid),
                None => println!("vigilant is not running"),
            }
            if status.running && !status.version_matches {
                println!(
                    "Warning: daemon version {} differs from CLI version {}",
                    status.version.as_deref().unwrap_or("unknown"),
                    vigilant::daemon::VERSION
                );
            }
            println!("PID file: {}", status.pid_file.display());
        }
    }
    Ok(())
}

fn cmd_config(cli: &Cli, format: OutputFormat) -> Result<()> {
    let config = load_config(cli)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => {
            print!("{}", serde_yaml::to_string(&config)?);
            println!("# {} pair(s), state dir {}", config.repos.len(), config.watermark.state_dir().display());
        }
    }
    Ok(())
}

fn cmd_watermarks(cli: &Cli, format: OutputFormat) -> Result<()> {
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store = WatermarkStore::from_config(&config.watermark)?;
    let entries = store.entries()?;

    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(key, at)| (key.clone(), serde_json::Value::String(format_instant(*at))))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No watermarks recorded in {}", store.dir().display());
            }
            for (key, at) in entries {
                println!("{}  {}", format_instant(at), key);
            }
        }
    }
    Ok(())
}

fn cmd_history(cli: &Cli, lines: usize) -> Result<()> {
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let log = CycleLog::in_dir(config.watermark.state_dir());
    let reports = log.read_recent(lines)?;
    if reports.is_empty() {
        println!("No cycles recorded in {}", log.path().display());
    }
    for report in &reports {
        print_report(report);
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!(
        "{} [{}] published={} unchanged={} failed={}",
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        report.trigger,
        report.published(),
        report.unchanged(),
        report.failures()
    );
    for pair in &report.outcomes {
        let detail = match &pair.outcome {
            PairOutcome::NoChanges => String::new(),
            PairOutcome::Published { commits, pr_url, .. } => format!("{} commit(s) {}", commits, pr_url),
            PairOutcome::ScanFailed { reason } => reason.clone(),
            PairOutcome::PublishFailed { step, reason } => format!("at {}: {}", step, reason),
            PairOutcome::PersistFailed { pr_url, reason } => format!("{} but {}", pr_url, reason),
        };
        println!("  {:<15} {} {}", pair.outcome.label(), pair.pair, detail);
    }
}

fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    debug!(follow, lines, "cmd_logs: called");
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        println!("The daemon may not have been started yet.");
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();
        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;
        child.wait()?;
    } else {
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let all_lines: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();
        let start = all_lines.len().saturating_sub(lines);
        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}

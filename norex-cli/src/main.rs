mod commands;
mod present;
mod runner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use norex_core::action::DEFAULT_LOG_TAIL;
use norex_core::bridge::Bridge;
use norex_core::config::NorexConfig;
use norex_core::controller::ActionReport;
use norex_core::error::ConfigError;
use norex_core::fake::FakeRuntime;
use norex_core::intent::Intent;
use norex_core::runner::CommandRunner;
use norex_core::supervisor::Supervisor;

use runner::ProcessRunner;

#[derive(Parser)]
#[command(name = "norex")]
#[command(about = "Control the local Apache / MySQL / phpMyAdmin stack", long_about = None)]
struct Cli {
    /// Config file (default: NOREX_CONFIG, then norex.yml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Simulate the container engine instead of calling docker
    #[arg(long, global = true)]
    demo: bool,

    /// Tracing filter, e.g. `debug` or `norex_core=trace` (default: RUST_LOG, then warn)
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll once and print every service
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Start one service, or the whole stack
    Up { service: Option<String> },
    /// Stop one service, or the whole stack
    Down { service: Option<String> },
    /// Restart one service, or the whole stack
    Restart { service: Option<String> },
    /// Run an allowed host command, e.g. `docker restart norex_mysql`
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Audit logs and container output
    Logs {
        #[command(subcommand)]
        command: LogsCommand,
    },
    /// Append a line to the actions log
    Note {
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Open a project folder (`www`, `logs`) in the file manager
    Open { folder: String },
    /// Keep polling and accept tray actions (`start_all`, `apache_stop`, ...) on stdin
    Watch,
    /// Check docker, scripts and configuration
    Doctor,
}

#[derive(Subcommand)]
enum LogsCommand {
    List,
    Show {
        file: String,
    },
    Container {
        service: String,
        #[arg(long, default_value_t = DEFAULT_LOG_TAIL)]
        tail: u32,
    },
}

#[derive(Clone, Copy)]
enum Lifecycle {
    Start,
    Stop,
    Restart,
}

fn init_tracing(level_filter: Option<&str>) -> Result<()> {
    let filter = match level_filter {
        Some(filter) => EnvFilter::try_new(filter).map_err(|_| ()),
        None => EnvFilter::try_from_default_env().map_err(|_| ()),
    }
    .or_else(|_| EnvFilter::try_new("warn"))
    .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}

/// Explicit path, else discovery; no config file at all means the built-in stack
fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<(Option<PathBuf>, NorexConfig)> {
    if let Some(path) = explicit {
        let config = NorexConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        return Ok((Some(path.to_path_buf()), config));
    }

    match NorexConfig::discover(cwd) {
        Ok((path, config)) => Ok((Some(path), config)),
        Err(ConfigError::NotFound { .. }) => Ok((None, NorexConfig::default())),
        Err(e) => Err(e).context("failed to load configuration"),
    }
}

fn build_runner(config: &NorexConfig, demo: bool) -> Result<Arc<dyn CommandRunner>> {
    if !demo {
        return Ok(Arc::new(ProcessRunner::new()));
    }

    let registry = config.registry().context("invalid service list")?;
    let containers: Vec<&str> = registry.iter().map(|s| s.runtime_ref.as_str()).collect();
    Ok(Arc::new(FakeRuntime::with_containers(&containers)))
}

fn print_report(bridge: &Bridge, report: &ActionReport) -> Result<()> {
    for line in present::report_lines(report) {
        println!("{}", line);
    }
    println!();
    println!("{}", present::status_table(bridge.registry(), &report.snapshot));

    match report.failure() {
        Some(reason) => bail!(reason),
        None => Ok(()),
    }
}

async fn run_lifecycle(bridge: &Bridge, action: Lifecycle, service: Option<String>) -> Result<()> {
    let controller = bridge.controller();
    let report = match (action, service) {
        (Lifecycle::Start, None) => {
            bridge.record_intent(&Intent::StartAll);
            controller.start_all().await
        }
        (Lifecycle::Stop, None) => {
            bridge.record_intent(&Intent::StopAll);
            controller.stop_all().await
        }
        (Lifecycle::Restart, None) => {
            bridge.record_intent(&Intent::RestartAll);
            controller.restart_all().await
        }
        (action, Some(id)) => {
            let intent = match action {
                Lifecycle::Start => Intent::Start(id.clone()),
                Lifecycle::Stop => Intent::Stop(id.clone()),
                Lifecycle::Restart => Intent::Restart(id.clone()),
            };
            bridge.record_intent(&intent);
            match action {
                Lifecycle::Start => controller.start(&id).await?,
                Lifecycle::Stop => controller.stop(&id).await?,
                Lifecycle::Restart => controller.restart(&id).await?,
            }
        }
    };
    print_report(bridge, &report)
}

async fn run_status(bridge: &Bridge, json: bool) -> Result<()> {
    let snapshot = bridge.poller().poll().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", present::status_table(bridge.registry(), &snapshot));
    }
    Ok(())
}

async fn run_exec(bridge: &Bridge, words: Vec<String>) -> Result<()> {
    let command_line = words.join(" ");
    let result = bridge.execute_service_command(&command_line).await?;
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);

    if !result.succeeded() {
        match result.exit_code {
            Some(code) => bail!("`{}` exited with code {}", command_line, code),
            None => bail!("`{}` was terminated", command_line),
        }
    }
    Ok(())
}

async fn run_logs(bridge: &Bridge, command: LogsCommand) -> Result<()> {
    match command {
        LogsCommand::List => {
            let files = bridge.list_log_files()?;
            if files.is_empty() {
                println!("No log files in {}", bridge.audit().dir().display());
            }
            for file in files {
                println!("{}", file);
            }
        }
        LogsCommand::Show { file } => print!("{}", bridge.read_log_file(&file)?),
        LogsCommand::Container { service, tail } => {
            print!("{}", bridge.container_logs(&service, tail).await?)
        }
    }
    Ok(())
}

async fn run_watch(bridge: Arc<Bridge>) -> Result<()> {
    let registry = bridge.registry().clone();
    let mut events = bridge.subscribe_events();
    let handle = Supervisor::spawn(bridge.clone());

    println!("{}", present::status_table(&registry, &bridge.poller().latest()));
    println!("Actions: start_all, stop_all, restart_all, <service>_start|stop|restart, open_www, open_logs, refresh, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                handle.shutdown().await;
                return Ok(());
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match Intent::parse_action(&line, &registry) {
                    Some(Intent::Quit) => break,
                    Some(intent) => {
                        if !handle.send(intent).await {
                            tracing::warn!("supervisor stopped, intent dropped");
                            break;
                        }
                    }
                    None => eprintln!("unknown action: {}", line.trim()),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(envelope) => println!("{}", present::event_line(&registry, &envelope)),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "event feed lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.send(Intent::Quit).await;
    handle.wait().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_filter.as_deref())?;

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let (config_path, config) = load_config(cli.config.as_deref(), &cwd)?;

    if let Commands::Doctor = cli.command {
        let project_root = config.resolve_project_root(&cwd);
        if commands::run_doctor(config_path.as_deref(), &config, &project_root) {
            return Ok(());
        }
        bail!("doctor found problems");
    }

    let runner = build_runner(&config, cli.demo)?;
    let bridge = Arc::new(Bridge::new(&config, &cwd, runner).context("invalid configuration")?);
    if let Some(path) = &config_path {
        tracing::info!(config = %path.display(), "loaded configuration");
    }

    match cli.command {
        Commands::Status { json } => run_status(&bridge, json).await,
        Commands::Up { service } => run_lifecycle(&bridge, Lifecycle::Start, service).await,
        Commands::Down { service } => run_lifecycle(&bridge, Lifecycle::Stop, service).await,
        Commands::Restart { service } => run_lifecycle(&bridge, Lifecycle::Restart, service).await,
        Commands::Exec { command } => run_exec(&bridge, command).await,
        Commands::Logs { command } => run_logs(&bridge, command).await,
        Commands::Note { message } => {
            bridge.append_user_log(&message.join(" "))?;
            Ok(())
        }
        Commands::Open { folder } => {
            bridge.record_intent(&Intent::OpenFolder(folder.clone()));
            bridge.open_path(&folder).await?;
            Ok(())
        }
        Commands::Watch => run_watch(bridge).await,
        Commands::Doctor => Ok(()),
    }
}

mod app;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use mentor_sync::config::{ApiConfig, Config};
use mentor_sync::ApiError;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mentor-sync")]
#[command(about = "Keep your mentor dashboard, tasks and notifications in sync from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mentor-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// GitHub username to sync (overrides api.username)
  #[arg(short, long)]
  user: Option<String>,

  /// Log level for mentor-sync (overridden by MENTOR_SYNC_LOG)
  #[arg(long, default_value = "warn")]
  log_level: String,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: app::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let guard = init_logging(&args.log_level, args.log_file.as_deref())?;
  debug!("mentor-sync v{} starting", env!("CARGO_PKG_VERSION"));

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override username if specified on command line
  let config = if let Some(user) = args.user {
    Config {
      api: ApiConfig {
        username: Some(user),
        ..config.api
      },
      ..config
    }
  } else {
    config
  };

  let app = app::App::new(config)?;
  match app.run(args.command).await {
    // API failures were already shown by the notifier
    Err(err) if err.downcast_ref::<ApiError>().is_some() => {
      drop(guard);
      std::process::exit(1);
    }
    result => result,
  }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("MENTOR_SYNC_LOG")
    .unwrap_or_else(|_| EnvFilter::new(format!("mentor_sync={},warn", level.to_lowercase())));

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_target(false)
      .with_writer(std::io::stderr) // stdout is for command output
      .init();
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(writer)
    .init();
  Ok(Some(guard))
}

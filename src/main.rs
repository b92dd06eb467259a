mod app;
mod camera;
mod cli;
mod config;
mod event;
mod offline;
mod session;
mod ui;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::io;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use camera::LineDeviceBackend;
use cli::{Args, Commands};

/// Log to a daily file; the terminal belongs to the UI.
fn init_file_tracing() -> Result<WorkerGuard> {
  let dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("qrscan")
    .join("logs");
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
    &dir,
    "qrscan.log",
  ));
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();

  Ok(guard)
}

/// Use RUST_LOG to raise the level (e.g. RUST_LOG=debug)
fn init_stderr_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(filter)
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  match args.command {
    None => {
      let _guard = init_file_tracing()?;
      info!("qrscan starting");

      let backend = LineDeviceBackend::new(
        config.scanner.camera_descriptors(),
        config.scanner.discover_dir(),
      );
      let mut app = app::App::new(config, backend);
      app.run().await?;
    }
    Some(Commands::Cache { action }) => {
      init_stderr_tracing();
      cli::run_cache(action, &config.offline).await?;
    }
    Some(Commands::Inspect { file }) => {
      init_stderr_tracing();
      cli::run_inspect(&file)?;
    }
  }

  Ok(())
}

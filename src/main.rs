//! CLI entry point for the pool lifecycle engine.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ephemerald::cmd::{self, root::RunOptions};

#[derive(Parser)]
#[command(name = "ephemerald")]
#[command(about = "Maintains warm pools of ephemeral containerized backing services for tests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to the pool-set configuration file
    #[arg(short = 'f', long, default_value = "ephemerald.toml")]
    config: String,

    /// RPC listen port for the checkout server; omit to run headless
    #[arg(short, long)]
    port: Option<u16>,

    /// Logging verbosity
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stdout
    #[arg(long)]
    log_file: Option<String>,

    /// Enable the terminal status UI
    #[arg(long, default_value_t = false)]
    gui: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    info!("Starting ephemerald v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run(&cli.config).await?;
        }
        None => {
            let opts = RunOptions { config_path: cli.config, port: cli.port, gui: cli.gui };
            if let Err(e) = cmd::root::run(opts).await {
                error!("{e:#}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_logging(level: &str, log_file: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("ephemerald={level}")));

    match log_file {
        Some(path) => {
            let parent = std::path::Path::new(path).parent().filter(|p| !p.as_os_str().is_empty());
            let directory = parent.unwrap_or_else(|| std::path::Path::new("."));
            let file_name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "ephemerald.log".to_string());
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

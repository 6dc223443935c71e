//! flowstate — presence, flow and protection state driver
//!
//! Usage:
//!   flowstate run [--config flowstate.toml]   → read JSON-lines commands from stdin
//!   flowstate dump-config                     → print the default config as TOML
//!   flowstate version                         → show version

use clap::{Parser, Subcommand};
use flowstate::config::{FlowstateConfig, LogConfig};
use flowstate::driver::Driver;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "flowstate",
    about = "Presence, flow and protection state driver",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (TOML)
    #[arg(long, global = true, default_value = "flowstate.toml")]
    config: PathBuf,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read JSON-lines commands from stdin, answer on stdout
    Run {
        /// Disable automatic protection at high focus
        #[arg(long, default_value_t = false)]
        no_auto_protect: bool,
    },
    /// Print the default configuration
    DumpConfig,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("flowstate v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::DumpConfig => {
            print!("{}", FlowstateConfig::default().to_toml());
        }
        Commands::Run { no_auto_protect } => {
            let mut config = FlowstateConfig::load(&cli.config);
            if let Some(path) = cli.log_file {
                config.logging.file = Some(path);
            }
            if no_auto_protect {
                config.flow.auto_protect = false;
            }
            let _guard = init_tracing(&config.logging)?;
            run(&config).await?;
        }
    }

    Ok(())
}

/// Install the global subscriber. The returned guard flushes the file
/// writer and must live until exit.
fn init_tracing(logging: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &logging.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_json = logging.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let stderr_text = (!logging.json)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging.filter.as_str().into()),
        )
        .with(stderr_json)
        .with(stderr_text)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(file)
}

async fn run(config: &FlowstateConfig) -> anyhow::Result<()> {
    let driver = Driver::new(config.flow.auto_protect);
    tracing::info!(
        "flowstate v{} ready (auto_protect={})",
        env!("CARGO_PKG_VERSION"),
        config.flow.auto_protect
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        };
        let Some(line) = line else { break };
        if let Some(response) = driver.handle_line(&line) {
            stdout.write_all(response.to_line().as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    tracing::info!(
        "Input closed: {} presences, {} sessions",
        driver.registry().len(),
        driver.flow().sessions().len()
    );
    Ok(())
}

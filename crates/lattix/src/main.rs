//! Lattix node binary.

use anyhow::{Context, Result};
use clap::Parser;
use lattix::Node;
use lattix_config::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Lattix node and tools
#[derive(Parser, Debug)]
#[command(name = "lattix")]
#[command(version)]
#[command(about = "Lattix delegated-proof-of-stake block-lattice node")]
struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the node
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = lattix::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Listen port (overrides the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Run with development work thresholds
        #[arg(long)]
        dev: bool,
    },

    /// Write a default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = lattix::DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lattix={default_level}")));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Start { config, port, dev } => {
            let mut config = if config.exists() {
                Config::load(&config)?
            } else {
                info!(path = %config.display(), "no config file, using defaults");
                Config::default()
            };
            if let Some(port) = port {
                config.tcp.port = port;
            }
            if dev {
                config.node.dev_network = true;
            }

            let node = Node::new(config).context("assembling node")?;
            node.start().context("starting node")?;
            info!(version = lattix::VERSION, "node running, ctrl-c to stop");

            let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
            ctrlc_handler(move || {
                let _ = shutdown_tx.send(());
            });
            let _ = shutdown_rx.recv();

            info!("shutting down");
            node.stop();
            Ok(())
        }
        Commands::Init { output } => {
            Config::default().write(&output)?;
            info!(path = %output.display(), "wrote default configuration");
            Ok(())
        }
    }
}

/// Installs a SIGINT handler without taking a dependency for it; the
/// runtime's signal support drives the notification.
fn ctrlc_handler(handler: impl FnOnce() + Send + 'static) {
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("building signal runtime");
        runtime.block_on(async {
            let _ = tokio::signal::ctrl_c().await;
        });
        handler();
    });
}

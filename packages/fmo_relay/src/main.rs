use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fmo_relay::cli::{self, StartOptions};
use fmo_relay::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "fmo-relay")]
#[command(about = "Store-and-forward repeater for FMO packets over MQTT")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Write a default config file to FILE and exit
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (the default)
    Start(StartArgs),

    /// Stop the background relay
    Stop(PidArgs),

    /// Restart the background relay
    Restart(PidArgs),

    /// Show whether the background relay is running
    Status(PidArgs),
}

#[derive(Parser, Default)]
struct StartArgs {
    /// Detach and run in the background
    #[arg(long)]
    daemon: bool,

    /// PID file (defaults to daemon.pid_file from the config)
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Internal: set on the re-executed background process
    #[arg(long, hide = true)]
    detached: bool,
}

#[derive(Parser)]
struct PidArgs {
    /// PID file (defaults to daemon.pid_file from the config)
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = cli.generate_config {
        return cli::generate_config_command(&path);
    }

    let config = cli::load_config(&cli.config)?;
    let pid_file =
        |arg: Option<PathBuf>| arg.unwrap_or_else(|| config.daemon.pid_file.clone());

    match cli.command {
        Some(Commands::Stop(args)) => cli::stop_command(&pid_file(args.pid_file)).await,
        Some(Commands::Restart(args)) => {
            cli::restart_command(&cli.config, &pid_file(args.pid_file)).await
        }
        Some(Commands::Status(args)) => cli::status_command(&pid_file(args.pid_file)),
        Some(Commands::Start(args)) => start(cli.config, config, args, cli.debug).await,
        None => start(cli.config, config, StartArgs::default(), cli.debug).await,
    }
}

async fn start(
    config_path: PathBuf,
    config: fmo_relay::config::FileConfig,
    args: StartArgs,
    debug: bool,
) -> Result<()> {
    let opts = StartOptions::resolve(&config, args.daemon, args.detached, args.pid_file, debug);
    cli::start_command(&config_path, config, opts).await
}

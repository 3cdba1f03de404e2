use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{
    AccountCommand, ConfigCommand, DeviceCommand, HistoryCommand, PetCommand, ScheduleCommand,
    SettingsCommand, WatchCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "feeder")]
#[command(version)]
#[command(about = "Manage smart pet feeders from the terminal", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage feeders and dispense food
    Device(DeviceCommand),

    /// Manage pets
    Pet(PetCommand),

    /// Manage feeding schedules
    Schedule(ScheduleCommand),

    /// Show feeding history
    History(HistoryCommand),

    /// Notification settings
    Settings(SettingsCommand),

    /// Account and profile
    Account(AccountCommand),

    /// Follow feeders live and print alerts
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feeder=info,petfeeder_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Device(cmd)) => cmd.run(&config).await?,
        Some(Commands::Pet(cmd)) => cmd.run(&config).await?,
        Some(Commands::Schedule(cmd)) => cmd.run(&config).await?,
        Some(Commands::History(cmd)) => cmd.run(&config).await?,
        Some(Commands::Settings(cmd)) => cmd.run(&config).await?,
        Some(Commands::Account(cmd)) => cmd.run(&config).await?,
        Some(Commands::Watch(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;

use super::{CommandResult, OutputFormat};
use crate::config::{Config, ConfigValue};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# petfeeder configuration

backend:
  url: "https://project.example.co"
  anon_key: "public-anon-key"

account:
  email: "me@example.com"
  # Prefer the PETFEEDER_PASSWORD environment variable
  # password: "secret"

# Feeding history rows per page
history_page_size: 5

# Upcoming schedules shown by 'feeder schedule list'
upcoming_window: 2

# Re-open live updates after a dropped connection
reconnect: true
"#;

fn show_optional(name: &str, value: &ConfigValue<Option<String>>) {
    println!("{}: {}", name, value.value.as_deref().unwrap_or("(not set)"));
    println!("  source: {}", value.source);
    println!();
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> CommandResult {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        show_optional("backend.url", &config.url);
                        show_optional("backend.anon_key", &config.anon_key);
                        show_optional("account.email", &config.email);

                        let password = if config.password.value.is_some() {
                            "********"
                        } else {
                            "(not set)"
                        };
                        println!("account.password: {}", password);
                        println!("  source: {}", config.password.source);
                        println!();

                        println!("history_page_size: {}", config.history_page_size.value);
                        println!("  source: {}", config.history_page_size.source);
                        println!();

                        println!("upcoming_window: {}", config.upcoming_window.value);
                        println!("  source: {}", config.upcoming_window.source);
                        println!();

                        println!("reconnect: {}", config.reconnect.value);
                        println!("  source: {}", config.reconnect.source);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = Config::default_config_path();

                // Check if config already exists
                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'feeder config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

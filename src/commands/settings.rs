use clap::{Args, Subcommand};

use petfeeder_core::{CommandDispatcher, NotificationPreferences, PageScope, PreferenceField};

use super::{connect, mount, CommandResult, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct SettingsCommand {
    #[command(subcommand)]
    pub command: SettingsSubcommand,
}

#[derive(Subcommand)]
pub enum SettingsSubcommand {
    /// Show notification settings
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Turn one notification setting on or off
    Set {
        /// Setting name, e.g. low_food_alert
        field: PreferenceField,

        /// on or off
        #[arg(value_parser = parse_switch)]
        value: bool,
    },
}

fn parse_switch(input: &str) -> Result<bool, String> {
    match input.to_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(format!("Expected on or off, got '{}'", input)),
    }
}

impl SettingsCommand {
    pub async fn run(&self, config: &Config) -> CommandResult {
        let backend = connect(config).await?;
        let page = mount::<NotificationPreferences>(&backend, PageScope::User).await?;
        let preferences = page.store();

        match &self.command {
            SettingsSubcommand::Show { format } => {
                let current = page
                    .user()
                    .and_then(|user| preferences.get(&user.id));
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&current)?);
                    }
                    OutputFormat::Text => match current {
                        Some(prefs) => {
                            for field in PreferenceField::ALL {
                                let state = if prefs.get(field) { "on" } else { "off" };
                                println!("{:<24} {}", field.column(), state);
                            }
                        }
                        None => println!("No notification settings saved yet."),
                    },
                }
                Ok(())
            }

            SettingsSubcommand::Set { field, value } => {
                let dispatcher = CommandDispatcher::new(backend.clone());
                dispatcher.set_preference(preferences, *field, *value).await?;
                println!("{} is now {}", field, if *value { "on" } else { "off" });
                Ok(())
            }
        }
    }
}

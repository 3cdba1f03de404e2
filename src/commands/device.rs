//! Device commands.

use chrono::Utc;
use clap::{Args, Subcommand};

use petfeeder_core::dispatcher::DEFAULT_DISPENSE_GRAMS;
use petfeeder_core::views::online_status;
use petfeeder_core::{CommandDispatcher, Device, PageScope};

use super::{confirm, connect, mount, CommandResult, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct DeviceCommand {
    #[command(subcommand)]
    pub command: DeviceSubcommand,
}

#[derive(Subcommand)]
pub enum DeviceSubcommand {
    /// List feeders with their food level and online status
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Register a new feeder on the account
    Add {
        /// Feeder name (defaults to "Pet Feeder")
        #[arg(long, short)]
        name: Option<String>,
    },

    /// Rename a feeder
    Rename {
        /// Device ID
        device_id: String,

        /// New name
        name: String,
    },

    /// Remove a feeder from the account
    Delete {
        /// Device ID
        device_id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Dispense food now
    Dispense {
        /// Device ID
        device_id: String,

        /// Grams to dispense (5-100)
        #[arg(long, short, default_value_t = DEFAULT_DISPENSE_GRAMS)]
        amount: u32,
    },
}

impl DeviceCommand {
    pub async fn run(&self, config: &Config) -> CommandResult {
        let backend = connect(config).await?;
        let page = mount::<Device>(&backend, PageScope::User).await?;
        let devices = page.store();

        match &self.command {
            DeviceSubcommand::List { format } => {
                let now = Utc::now();
                let listed = online_status(devices, now);
                match format {
                    OutputFormat::Json => {
                        let rows: Vec<_> = listed
                            .iter()
                            .map(|(device, online)| {
                                serde_json::json!({ "device": device, "online": online })
                            })
                            .collect();
                        println!("{}", serde_json::to_string_pretty(&rows)?);
                    }
                    OutputFormat::Text => {
                        if listed.is_empty() {
                            println!("No feeders registered.");
                            return Ok(());
                        }
                        println!(
                            "{:<20}  {:<24}  {:>5}  {:>7}  STATUS",
                            "ID", "NAME", "FOOD", "BATTERY"
                        );
                        println!("{}", "-".repeat(72));
                        for (device, online) in &listed {
                            let status = &device.last_status;
                            let battery = status
                                .battery_level
                                .map_or_else(|| "-".to_string(), |b| format!("{}%", b));
                            let mut state = if *online { "online" } else { "offline" }.to_string();
                            if status.is_low_on_food() {
                                state.push_str(", low food");
                            }
                            if let Some(error) = &status.error {
                                state.push_str(&format!(", error: {}", error));
                            }
                            println!(
                                "{:<20}  {:<24}  {:>4}%  {:>7}  {}",
                                device.device_id, device.device_name, status.food_level, battery, state
                            );
                        }
                    }
                }
                Ok(())
            }

            DeviceSubcommand::Add { name } => {
                let dispatcher = CommandDispatcher::new(backend.clone());
                let device = dispatcher
                    .register_device(Some(devices), name.as_deref())
                    .await?;
                println!("Registered feeder: {} ({})", device.device_name, device.device_id);
                Ok(())
            }

            DeviceSubcommand::Rename { device_id, name } => {
                let dispatcher = CommandDispatcher::new(backend.clone());
                dispatcher.rename_device(devices, device_id, name).await?;
                println!("Renamed {} to {}", device_id, name.trim());
                Ok(())
            }

            DeviceSubcommand::Delete { device_id, force } => {
                let device = devices
                    .get(device_id)
                    .ok_or_else(|| format!("Device not found: {}", device_id))?;

                if !force && !confirm(&format!("Remove feeder '{}'?", device.device_name))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                let dispatcher = CommandDispatcher::new(backend.clone());
                dispatcher.delete_device(devices, device_id).await?;
                println!("Removed feeder: {}", device.device_name);
                Ok(())
            }

            DeviceSubcommand::Dispense { device_id, amount } => {
                let dispatcher = CommandDispatcher::new(backend.clone());
                let entry = dispatcher
                    .dispense(devices, None, device_id, *amount)
                    .await?;
                println!("Dispensing {}g on {}", entry.amount, entry.device_id);
                Ok(())
            }
        }
    }
}

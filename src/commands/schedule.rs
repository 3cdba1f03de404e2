use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use clap::{Args, Subcommand};

use petfeeder_core::views::upcoming;
use petfeeder_core::{CommandDispatcher, PageScope, Schedule, ScheduleDraft};

use super::{confirm, connect, mount, CommandResult, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct ScheduleCommand {
    #[command(subcommand)]
    pub command: ScheduleSubcommand,
}

#[derive(Subcommand)]
pub enum ScheduleSubcommand {
    /// List schedules
    List {
        /// Only this device
        #[arg(long)]
        device: Option<String>,

        /// Show every schedule, not just the next few
        #[arg(long, short)]
        all: bool,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Schedule a feeding
    Add {
        /// Device ID
        #[arg(long)]
        device: String,

        /// When to feed: RFC 3339 or "YYYY-MM-DD HH:MM" in local time
        #[arg(long)]
        at: String,

        /// Grams to dispense
        #[arg(long, short)]
        amount: u32,
    },

    /// Delete a schedule
    Delete {
        /// Schedule ID
        schedule_id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

/// Parse a feeding time given on the command line.
fn parse_time(input: &str) -> Result<DateTime<Utc>, String> {
    let input = input.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M").map_err(|_| {
        format!(
            "Invalid time '{}'. Use RFC 3339 or YYYY-MM-DD HH:MM",
            input
        )
    })?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| format!("Ambiguous local time '{}'", input))
}

impl ScheduleCommand {
    pub async fn run(&self, config: &Config) -> CommandResult {
        let backend = connect(config).await?;
        let page = mount::<Schedule>(&backend, PageScope::User).await?;
        let schedules = page.store();
        let dispatcher = CommandDispatcher::new(backend.clone());

        match &self.command {
            ScheduleSubcommand::List {
                device,
                all,
                format,
            } => {
                let now = Utc::now();
                let mut listed = if *all {
                    schedules.snapshot()
                } else {
                    upcoming(schedules, now, usize::MAX)
                };
                if let Some(device) = device {
                    listed.retain(|s| &s.device_id == device);
                }
                if !*all {
                    listed.truncate(config.upcoming_window.value);
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&listed)?);
                    }
                    OutputFormat::Text => {
                        if listed.is_empty() {
                            println!("No upcoming feedings.");
                        }
                        for schedule in &listed {
                            let local = schedule.time.with_timezone(&Local);
                            println!(
                                "{}  {}  {}g on {}",
                                schedule.schedule_id,
                                local.format("%Y-%m-%d %H:%M"),
                                schedule.amount,
                                schedule.device_id
                            );
                        }
                    }
                }
                Ok(())
            }

            ScheduleSubcommand::Add { device, at, amount } => {
                let draft = ScheduleDraft {
                    device_id: device.clone(),
                    time: parse_time(at)?,
                    amount: *amount,
                };
                let created = dispatcher
                    .create_schedule(Some(schedules), draft, Utc::now())
                    .await?;
                println!("Scheduled: {}", created);
                Ok(())
            }

            ScheduleSubcommand::Delete { schedule_id, force } => {
                let schedule = schedules
                    .get(schedule_id)
                    .ok_or_else(|| format!("Schedule not found: {}", schedule_id))?;

                if !force && !confirm(&format!("Delete schedule '{}'?", schedule))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                dispatcher.delete_schedule(schedules, schedule_id).await?;
                println!("Deleted schedule: {}", schedule_id);
                Ok(())
            }
        }
    }
}

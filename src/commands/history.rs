use chrono::Local;
use clap::Args;

use petfeeder_core::views::daily_totals;
use petfeeder_core::{FeedingHistory, PageScope, ResourcePage};

use super::{connect, mount_page, CommandResult, OutputFormat};
use crate::config::Config;

/// Show feeding history, newest first
#[derive(Args)]
pub struct HistoryCommand {
    /// Only this device
    #[arg(long)]
    device: Option<String>,

    /// Page number, starting at 1
    #[arg(long, short, default_value_t = 1)]
    page: usize,

    /// Also print grams per day for the rows shown
    #[arg(long)]
    daily: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl HistoryCommand {
    pub async fn run(&self, config: &Config) -> CommandResult {
        let backend = connect(config).await?;
        let scope = match &self.device {
            Some(device_id) => PageScope::Device(device_id.clone()),
            None => PageScope::Unscoped,
        };
        let page = mount_page(ResourcePage::<FeedingHistory>::paginated(
            backend,
            scope,
            config.history_page_size.value,
        ))
        .await?;
        if self.page > 1 {
            page.go_to_page(self.page).await?;
        }

        let store = page.store();
        let rows = store.snapshot();
        let window = store.window();

        match self.format {
            OutputFormat::Json => {
                let body = serde_json::json!({
                    "page": window.map(|w| w.page),
                    "total_pages": window.map(|w| w.total_pages()),
                    "total": window.map(|w| w.total),
                    "rows": rows,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
            OutputFormat::Text => {
                if rows.is_empty() {
                    println!("No feedings recorded.");
                }
                for entry in &rows {
                    println!("{}  {}", entry.device_id, entry);
                }
                if let Some(window) = window {
                    println!();
                    println!(
                        "Page {} of {} ({} feedings)",
                        window.page,
                        window.total_pages().max(1),
                        window.total
                    );
                }
                if self.daily {
                    println!();
                    let today = Local::now().date_naive();
                    for day in daily_totals(&rows, today, &Local) {
                        println!("{}  {:>5}g", day.date.format("%a %m-%d"), day.grams);
                    }
                }
            }
        }
        Ok(())
    }
}

mod account;
mod config_cmd;
mod device;
mod history;
mod pet;
mod schedule;
mod settings;
mod watch;

pub use account::AccountCommand;
pub use config_cmd::ConfigCommand;
pub use device::DeviceCommand;
pub use history::HistoryCommand;
pub use pet::PetCommand;
pub use schedule::ScheduleCommand;
pub use settings::SettingsCommand;
pub use watch::WatchCommand;

use clap::ValueEnum;
use std::io::{self, Write};

use petfeeder_core::{Backend, PageScope, Resource, ResourcePage, SyncError};

use crate::config::Config;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Sign in with the configured account.
pub async fn connect(config: &Config) -> Result<Backend, Box<dyn std::error::Error>> {
    let settings = config.backend_settings()?;
    let (email, password) = config.credentials()?;
    Ok(Backend::connect(&settings, &email, &password).await?)
}

/// A mounted page of `R` for `scope`. A feed that can't be opened only
/// costs live updates, so the seeded rows are still returned.
pub async fn mount<R: Resource>(
    backend: &Backend,
    scope: PageScope,
) -> Result<ResourcePage<R>, SyncError> {
    mount_page(ResourcePage::new(backend.clone(), scope)).await
}

pub async fn mount_page<R: Resource>(
    mut page: ResourcePage<R>,
) -> Result<ResourcePage<R>, SyncError> {
    match page.mount().await {
        Ok(()) => Ok(page),
        Err(SyncError::Subscription(message)) => {
            tracing::warn!(table = R::TABLE, "Live updates unavailable: {}", message);
            Ok(page)
        }
        Err(e) => Err(e),
    }
}

/// Ask a yes/no question on stdin. Anything but "y" is a no.
fn confirm(prompt: &str) -> io::Result<bool> {
    Ok(prompt_line(&format!("{} [y/N]", prompt))?
        .trim()
        .eq_ignore_ascii_case("y"))
}

/// Print `prompt` and read one line from stdin, without the line ending.
fn prompt_line(prompt: &str) -> io::Result<String> {
    print!("{} ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

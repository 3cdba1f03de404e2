use clap::{Args, Subcommand};
use std::path::PathBuf;

use petfeeder_core::{CommandDispatcher, ProfileDraft};

use super::{connect, prompt_line, CommandResult};
use crate::config::Config;

#[derive(Args)]
pub struct AccountCommand {
    #[command(subcommand)]
    pub command: AccountSubcommand,
}

#[derive(Subcommand)]
pub enum AccountSubcommand {
    /// Show the signed-in account
    Show,

    /// Change username and full name
    Profile {
        /// Username (unique across accounts)
        username: String,

        /// Full name
        #[arg(long, default_value = "")]
        full_name: String,
    },

    /// Change the account password (prompts for the new one)
    Password,

    /// Upload a profile picture (png, jpg, gif or webp)
    Avatar {
        /// Image file
        file: PathBuf,
    },
}

impl AccountCommand {
    pub async fn run(&self, config: &Config) -> CommandResult {
        let backend = connect(config).await?;

        match &self.command {
            AccountSubcommand::Show => {
                let user = backend.require_user().await?;
                println!("User ID: {}", user.id);
                if let Some(email) = &user.email {
                    println!("Email:   {}", email);
                }
                if let Some(session) = backend.auth.session().await {
                    println!(
                        "Session expires: {}",
                        session.expires_at.format("%Y-%m-%d %H:%M UTC")
                    );
                }
                Ok(())
            }

            AccountSubcommand::Profile {
                username,
                full_name,
            } => {
                let dispatcher = CommandDispatcher::new(backend);
                dispatcher
                    .update_profile(ProfileDraft {
                        username: username.clone(),
                        full_name: full_name.clone(),
                    })
                    .await?;
                println!("Profile updated successfully");
                Ok(())
            }

            AccountSubcommand::Password => {
                let password = prompt_line("New password:")?;
                let confirm = prompt_line("Confirm new password:")?;

                let dispatcher = CommandDispatcher::new(backend);
                dispatcher.change_password(&password, &confirm).await?;
                println!("Password updated successfully");
                Ok(())
            }

            AccountSubcommand::Avatar { file } => {
                let bytes = tokio::fs::read(file)
                    .await
                    .map_err(|e| format!("Failed to read '{}': {}", file.display(), e))?;
                let file_name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                let dispatcher = CommandDispatcher::new(backend);
                let url = dispatcher.set_avatar(&file_name, bytes).await?;
                println!("Avatar updated: {}", url);
                Ok(())
            }
        }
    }
}

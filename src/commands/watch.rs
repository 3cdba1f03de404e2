//! Live view: prints changes as they arrive and raises alerts.

use chrono::{Local, Utc};
use clap::Args;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use petfeeder_core::{
    Alert, AlertEngine, AppliedChange, ChangeEvent, Device, FeedStatus, FeedingHistory, NotificationPreferences,
    NotificationSink, PageScope, ResourcePage, Schedule,
};

use super::{connect, mount, mount_page, CommandResult};
use crate::config::Config;

/// How often schedules are checked for reminders.
const REMINDER_CHECK: Duration = Duration::from_secs(60);

/// Follow devices and feedings live until interrupted
#[derive(Args)]
pub struct WatchCommand {
    /// Only this device
    #[arg(long)]
    device: Option<String>,
}

/// Prints alerts to the terminal.
struct TerminalSink;

impl NotificationSink for TerminalSink {
    fn notify(&self, alert: &Alert) {
        tracing::info!(title = alert.title(), "Alert raised");
        println!("{}  ** {}: {}", stamp(), alert.title(), alert.body());
    }
}

/// Next change from a page, waiting forever once the feed is gone.
async fn next_change<R: Clone>(
    changes: &mut Option<broadcast::Receiver<AppliedChange<R>>>,
) -> AppliedChange<R> {
    loop {
        let Some(receiver) = changes.as_mut() else {
            return std::future::pending().await;
        };
        let received = receiver.recv().await;
        match received {
            Ok(event) => return event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Watcher fell behind, some changes not printed");
            }
            Err(RecvError::Closed) => *changes = None,
        }
    }
}

fn stamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

impl WatchCommand {
    fn wants(&self, device_id: &str) -> bool {
        self.device.as_deref().map_or(true, |d| d == device_id)
    }

    pub async fn run(&self, config: &Config) -> CommandResult {
        let backend = connect(config).await?;
        let devices = mount::<Device>(&backend, PageScope::User).await?;
        let schedules = mount::<Schedule>(&backend, PageScope::User).await?;
        let preferences = mount::<NotificationPreferences>(&backend, PageScope::User).await?;
        let scope = match &self.device {
            Some(device_id) => PageScope::Device(device_id.clone()),
            None => PageScope::Unscoped,
        };
        let history = mount_page(ResourcePage::<FeedingHistory>::paginated(
            backend.clone(),
            scope,
            config.history_page_size.value,
        ))
        .await?;

        let user_id = devices.user().map(|u| u.id.clone()).unwrap_or_default();
        let mut engine = AlertEngine::new(preferences.store().get(&user_id));
        let sink = TerminalSink;

        println!("Watching {} feeder(s). Press Ctrl-C to stop.", devices.store().len());
        for device in devices.store().snapshot() {
            if !self.wants(&device.device_id) {
                continue;
            }
            println!("{}  {}", stamp(), device);
            if let Some(alert) = engine.on_device(&device) {
                sink.notify(&alert);
            }
        }

        let mut device_changes = devices.changes();
        let mut history_changes = history.changes();
        let mut preference_changes = preferences.changes();
        let mut ticker = tokio::time::interval(REMINDER_CHECK);
        let mut last_status = FeedStatus::Live;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
                _ = ticker.tick() => {
                    let upcoming: Vec<Schedule> = schedules
                        .store()
                        .select(|s| self.wants(&s.device_id));
                    let known = devices.store().snapshot();
                    for alert in engine.due_reminders(&upcoming, &known, Utc::now()) {
                        sink.notify(&alert);
                    }

                    let status = devices.status();
                    if status != last_status {
                        match &status {
                            FeedStatus::Live => println!("{}  Live updates restored", stamp()),
                            FeedStatus::Disconnected(reason) => {
                                println!("{}  Live updates lost: {}", stamp(), reason)
                            }
                            FeedStatus::Closed => println!("{}  Live updates stopped", stamp()),
                        }
                        last_status = status;
                    }
                }
                change = next_change(&mut device_changes) => match change.event {
                    ChangeEvent::Insert(device) | ChangeEvent::Update(device) => {
                        if self.wants(&device.device_id) {
                            println!("{}  {}", stamp(), device);
                            if let Some(alert) = engine.on_device(&device) {
                                sink.notify(&alert);
                            }
                        }
                    }
                    ChangeEvent::Delete(device_id) => {
                        if self.wants(&device_id) {
                            println!("{}  Feeder removed: {}", stamp(), device_id);
                        }
                    }
                },
                change = next_change(&mut history_changes) => {
                    // A re-delivered feeding replaces its row and is not announced again.
                    if !change.is_new() {
                        continue;
                    }
                    if let ChangeEvent::Insert(entry) | ChangeEvent::Update(entry) = change.event {
                        println!("{}  {}  {}", stamp(), entry.device_id, entry);
                        let known = devices.store().snapshot();
                        if let Some(alert) = engine.on_feeding(&entry, &known) {
                            sink.notify(&alert);
                        }
                    }
                }
                change = next_change(&mut preference_changes) => match change.event {
                    ChangeEvent::Insert(prefs) | ChangeEvent::Update(prefs) => {
                        engine.set_preferences(Some(prefs));
                    }
                    ChangeEvent::Delete(_) => engine.set_preferences(None),
                },
            }
        }

        Ok(())
    }
}

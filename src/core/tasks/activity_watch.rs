// src/core/tasks/activity_watch.rs

//! The liveness watcher: checks the activity monitor every minute and
//! posts the down / still-down embeds.

use crate::core::activity::{ActivityAlert, format_downtime};
use crate::core::notify::COLOR_ORANGE;
use crate::core::state::EngineState;
use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct ActivityWatchTask {
    state: Arc<EngineState>,
}

impl ActivityWatchTask {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("activity watch task started");
        let mut interval = tokio::time::interval(CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let alert = self.state.activity.check(Utc::now(), &Local::now());
                    if let Some(alert) = alert {
                        self.post_alert(alert).await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("activity watch task shutting down");
                    return;
                }
            }
        }
    }

    async fn post_alert(&self, alert: ActivityAlert) {
        // Night alerts never ping everyone.
        self.state
            .notifier
            .activity(
                alert.title(),
                &format!(
                    "No successful replication for {}.",
                    format_downtime(alert.silent_for())
                ),
                COLOR_ORANGE,
                Some(crate::core::activity::ALERT_FOOTER),
                !alert.night(),
            )
            .await;
    }
}

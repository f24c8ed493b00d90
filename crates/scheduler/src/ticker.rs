//! Minute ticker driving [`PostingLoop::tick`].

use std::sync::Arc;
use std::time::Duration;

use chanpost_core::ScheduleLabel;
use chrono::Timelike;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::posting::PostingLoop;

pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Seconds past the minute at which ticks fire, so the label never lags a
/// minute boundary.
const TICK_OFFSET_SECS: u64 = 5;

/// Delay from a wall clock reading at `second` past the minute to the first tick.
pub fn first_tick_delay(second: u32) -> Duration {
    Duration::from_secs(60 + TICK_OFFSET_SECS - u64::from(second.min(59)))
}

impl PostingLoop {
    /// Tick once a minute until `shutdown` is notified. Errors are sent to the
    /// operators and never stop the loop.
    pub async fn run(self: Arc<Self>, shutdown: Arc<Notify>) {
        let stopped = shutdown.notified();
        tokio::pin!(stopped);

        let delay = first_tick_delay(chrono::Local::now().second());
        info!(first_tick_in = ?delay, "posting loop started");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut stopped => {
                info!("posting loop stopped before first tick");
                return;
            }
        }

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.on_tick(ScheduleLabel::now_local()).await;
                }
                _ = &mut stopped => {
                    info!("posting loop stopped");
                    break;
                }
            }
        }
    }

    async fn on_tick(&self, label: ScheduleLabel) {
        let report = self.tick(&label).await;
        if let Some(id) = report.posted_id() {
            info!(label = %label, record_id = %id, "scheduled post published");
        }
        if !report.is_ok() {
            warn!(label = %label, errors = report.errors.len(), "scheduled posting failed");
            self.transport()
                .notify_operators(&format!("WHILE TRYING TO POST\n{report}"))
                .await;
        }
    }
}

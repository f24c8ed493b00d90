//! Long-polling update receiver.

use std::sync::Arc;
use std::time::Duration;

use chanpost_core::InboundMessage;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::api::Update;
use crate::client::TelegramClient;
use crate::error::TelegramError;

const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Polls `getUpdates` and forwards every message to a channel.
pub struct UpdatePoller {
    client: Arc<TelegramClient>,
    timeout_secs: u64,
    offset: i64,
}

impl UpdatePoller {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self {
            client,
            timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            offset: 0,
        }
    }

    /// Long-poll timeout passed to Telegram (default: 60s).
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Poll until `shutdown` is notified or the receiver is dropped.
    pub async fn run(mut self, tx: mpsc::Sender<InboundMessage>, shutdown: Arc<Notify>) {
        let stopped = shutdown.notified();
        tokio::pin!(stopped);
        info!(timeout_secs = self.timeout_secs, "update poller started");

        loop {
            let batch = tokio::select! {
                batch = self.client.get_updates(self.offset, self.timeout_secs) => batch,
                _ = &mut stopped => break,
            };

            let pause = match batch {
                Ok(updates) => {
                    self.offset = next_offset(self.offset, &updates);
                    debug!(count = updates.len(), offset = self.offset, "updates received");
                    for update in updates {
                        let Some(message) = update.message else {
                            continue;
                        };
                        if tx.send(message.to_inbound()).await.is_err() {
                            info!("update receiver dropped, poller exiting");
                            return;
                        }
                    }
                    continue;
                }
                Err(TelegramError::RateLimited { retry_after_secs }) => {
                    warn!(retry_after_secs, "getUpdates rate limited");
                    Duration::from_secs(retry_after_secs)
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed");
                    RETRY_DELAY
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = &mut stopped => break,
            }
        }
        info!("update poller stopped");
    }
}

/// Offset acknowledging every update in `updates`.
pub fn next_offset(current: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|u| u.update_id + 1)
        .fold(current, i64::max)
}

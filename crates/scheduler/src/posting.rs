use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chanpost_core::{Destination, MessageLink, Record, ScheduleLabel, Transport};
use chanpost_store::RecordStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;

/// Store queries per tick: the tick's own label, then the unscheduled bucket.
pub const MAX_ATTEMPTS: usize = 2;

/// What happened to a record after it reached the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// No comment to follow; the record was removed.
    Deleted,
    /// The record waits for the channel echo of `delivery_id` to post its comment.
    AwaitingReply { delivery_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Posting,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub label: ScheduleLabel,
    /// Labels actually queried, in order.
    pub attempted: Vec<ScheduleLabel>,
    pub posted: Option<(String, PostOutcome)>,
    pub errors: Vec<String>,
}

impl TickReport {
    fn new(label: ScheduleLabel) -> Self {
        Self {
            label,
            attempted: Vec::new(),
            posted: None,
            errors: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn posted_id(&self) -> Option<&str> {
        self.posted.as_ref().map(|(id, _)| id.as_str())
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.errors.join("\n"))
    }
}

// ── PostingLoop ─────────────────────────────────────────────────────

/// Single-flight poster shared by the minute ticker and the manual commands.
pub struct PostingLoop {
    store: Arc<RecordStore>,
    transport: Arc<dyn Transport>,
    channel_id: i64,
    default_labels: RwLock<Vec<ScheduleLabel>>,
    posting: Mutex<()>,
}

impl PostingLoop {
    pub fn new(
        store: Arc<RecordStore>,
        transport: Arc<dyn Transport>,
        channel_id: i64,
        default_labels: Vec<ScheduleLabel>,
    ) -> Self {
        Self {
            store,
            transport,
            channel_id,
            default_labels: RwLock::new(default_labels),
            posting: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> LoopState {
        match self.posting.try_lock() {
            Ok(_) => LoopState::Idle,
            Err(_) => LoopState::Posting,
        }
    }

    pub fn default_labels(&self) -> Vec<ScheduleLabel> {
        self.default_labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the default posting times. Takes effect from the next tick.
    pub fn set_default_labels(&self, labels: Vec<ScheduleLabel>) {
        info!(count = labels.len(), "default posting times replaced");
        *self
            .default_labels
            .write()
            .unwrap_or_else(PoisonError::into_inner) = labels;
    }

    pub fn is_default(&self, label: &ScheduleLabel) -> bool {
        self.default_labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(label)
    }

    /// Post a record immediately, waiting for any in-flight post to finish.
    pub async fn post_now(&self, record: &Record) -> Result<PostOutcome, SchedulerError> {
        let _posting = self.posting.lock().await;
        self.deliver(record).await
    }

    /// Post a random record from `label`'s bucket immediately.
    pub async fn post_random(
        &self,
        label: &ScheduleLabel,
    ) -> Result<(Record, PostOutcome), SchedulerError> {
        let _posting = self.posting.lock().await;
        let record = self.store.query_random_due(label).await?;
        let outcome = self.deliver(&record).await?;
        Ok((record, outcome))
    }

    /// Run one scheduled posting attempt for `label`.
    ///
    /// An empty bucket for a default posting time falls back once to the
    /// unscheduled bucket. A failed delivery is reported on the record's
    /// first origin message and the record stays for a later tick.
    pub async fn tick(&self, label: &ScheduleLabel) -> TickReport {
        let _posting = self.posting.lock().await;
        let mut report = TickReport::new(label.clone());
        let mut current = label.clone();

        for _ in 0..MAX_ATTEMPTS {
            report.attempted.push(current.clone());
            match self.store.query_random_due(&current).await {
                Ok(record) => {
                    match self.deliver(&record).await {
                        Ok(outcome) => report.posted = Some((record.id.clone(), outcome)),
                        Err(e) => {
                            warn!(record_id = %record.id, error = %e, "scheduled post failed");
                            report.errors.push(e.to_string());
                            self.point_broken(&record, &e, &mut report).await;
                        }
                    }
                    break;
                }
                Err(e) if e.is_not_found() => {
                    if current.is_unscheduled() || !self.is_default(&current) {
                        break;
                    }
                    debug!(label = %current, "bucket empty, falling back to unscheduled");
                    current = ScheduleLabel::Unscheduled;
                }
                Err(e) => {
                    report
                        .errors
                        .push(format!("{e} while getting random post for time {current}"));
                    break;
                }
            }
        }
        report
    }

    /// Post a delivered record's comment under the channel echo of its first
    /// message, then remove the record.
    ///
    /// Returns the completed record id, or `None` if `delivery_id` is unknown
    /// or its mapping has expired.
    pub async fn complete_with_reply(
        &self,
        delivery_id: i64,
        echo: MessageLink,
    ) -> Result<Option<String>, SchedulerError> {
        let record = match self.store.resolve_by_delivery(delivery_id).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!(delivery_id, "no pending comment for echo");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(comment) = &record.comment {
            if let Err(e) = self.transport.deliver(comment, Destination::reply(echo)).await {
                warn!(record_id = %record.id, error = %e, "comment delivery failed");
                self.transport
                    .notify_operators(&format!("Error: {e}\nwhile posting comment of {}", record.id))
                    .await;
            }
        }

        self.store.delete(&record.id).await?;
        info!(record_id = %record.id, delivery_id, "comment posted, record completed");
        Ok(Some(record.id))
    }

    async fn deliver(&self, record: &Record) -> Result<PostOutcome, SchedulerError> {
        info!(record_id = %record.id, channel = self.channel_id, "posting record");
        let links = self
            .transport
            .deliver(record, Destination::chat(self.channel_id))
            .await
            .map_err(|source| SchedulerError::Delivery {
                id: record.id.clone(),
                source,
            })?;

        if record.comment.is_none() {
            self.store.delete(&record.id).await?;
            return Ok(PostOutcome::Deleted);
        }

        let first = links
            .first()
            .ok_or_else(|| SchedulerError::NothingDelivered(record.id.clone()))?;
        self.store
            .remember_delivery(&record.id, first.message_id)
            .await?;
        Ok(PostOutcome::AwaitingReply {
            delivery_id: first.message_id,
        })
    }

    async fn point_broken(&self, record: &Record, err: &SchedulerError, report: &mut TickReport) {
        let Some(origin) = record.first_origin() else {
            return;
        };
        let text = format!("an error while trying to post\n{err}");
        if let Err(e) = self
            .transport
            .send_text(origin.chat_id, &text, Some(origin.message_id))
            .await
        {
            report.errors.push(e.to_string());
        }
    }
}

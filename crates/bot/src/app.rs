//! Routing and handling of inbound messages.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{bail, Context};
use chanpost_core::{
    BotConfig, Destination, InboundMessage, MessageLink, Record, ScheduleLabel, Transport,
};
use chanpost_scheduler::PostingLoop;
use chanpost_store::RecordStore;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::admin::{AdminCommand, EditEffect, RecordEdit};

/// Lifetime of short acknowledgements such as "+ (post)".
pub const ACK_TTL: Duration = Duration::from_secs(15);

/// Lifetime of preview messages.
pub const PREVIEW_TTL: Duration = Duration::from_secs(5 * 60);

const PREVIEW_PAUSE: Duration = Duration::from_millis(100);

/// Where an inbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Media from an operator, or a channel echo: grouped by the correlator first.
    Correlate,
    /// A text-only channel echo.
    Echo,
    /// An operator text message or command.
    Command,
    Ignore,
}

/// The bot's operator surface.
pub struct App {
    config: RwLock<BotConfig>,
    store: Arc<RecordStore>,
    posting: Arc<PostingLoop>,
    transport: Arc<dyn Transport>,
    shutdown: Arc<Notify>,
}

impl App {
    pub fn new(
        config: BotConfig,
        store: Arc<RecordStore>,
        posting: Arc<PostingLoop>,
        transport: Arc<dyn Transport>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            posting,
            transport,
            shutdown,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> BotConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_operator_chat(&self, msg: &InboundMessage) -> bool {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        msg.is_private() && config.is_admin(msg.sender_id)
    }

    fn is_comments_echo(&self, msg: &InboundMessage) -> bool {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        msg.is_channel_echo() && msg.chat_id == config.comments_id
    }

    pub fn classify(&self, msg: &InboundMessage) -> Route {
        if self.is_comments_echo(msg) {
            return if msg.has_media() { Route::Correlate } else { Route::Echo };
        }
        if !self.is_operator_chat(msg) {
            return Route::Ignore;
        }
        if msg.has_media() {
            Route::Correlate
        } else if msg.text.is_empty() {
            Route::Ignore
        } else {
            Route::Command
        }
    }

    // ── Correlated groups ───────────────────────────────────────────

    /// Handle one complete, ordered group from the correlator.
    pub async fn handle_group(&self, events: Vec<InboundMessage>) -> anyhow::Result<()> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        if self.is_comments_echo(first) {
            return self.handle_echo(first).await;
        }
        if self.is_operator_chat(first) {
            return self.handle_submission(&events).await;
        }
        Ok(())
    }

    /// Complete the record whose channel post `msg` echoes.
    pub async fn handle_echo(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        let Some(delivery_id) = msg.forward_origin_message_id else {
            return Ok(());
        };
        self.posting
            .complete_with_reply(delivery_id, msg.link())
            .await?;
        Ok(())
    }

    async fn handle_submission(&self, events: &[InboundMessage]) -> anyhow::Result<()> {
        let mut record = Record::from_messages(events)?;
        let first = &events[0];

        if let Some(reply_to) = first.reply_to {
            match self.store.resolve_by_origin(&reply_to).await {
                Ok(parent) => {
                    record.as_sources = record.is_documents();
                    if let Some(previous) = &parent.comment {
                        record.text = previous.text.clone();
                    }
                    self.ack(first.link(), "+ (comment)").await;
                    self.store.attach_child(&parent.id, record).await?;
                    return Ok(());
                }
                Err(e) if e.is_not_found() => {
                    debug!(
                        chat_id = reply_to.chat_id,
                        message_id = reply_to.message_id,
                        "reply target is not a record"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.ack(first.link(), "+ (post)").await;
        record.text = self.config().default_post_text;
        self.store.create(&record).await?;
        Ok(())
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Handle an operator text message.
    pub async fn handle_text(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        match AdminCommand::parse(msg) {
            AdminCommand::Start => {
                let text = self.config().start_message;
                self.transport.send_text(msg.chat_id, &text, None).await?;
            }
            AdminCommand::Info => self.info(msg).await?,
            AdminCommand::Post => {
                let Some(record) = self.referred(msg).await? else {
                    return Ok(());
                };
                self.ack(msg.link(), "+").await;
                self.posting.post_now(&record).await?;
            }
            AdminCommand::Random => {
                let (record, _) = self.posting.post_random(&ScheduleLabel::Unscheduled).await?;
                if let Some(origin) = record.first_origin() {
                    self.transport
                        .send_text(origin.chat_id, "+", Some(origin.message_id))
                        .await?;
                }
            }
            AdminCommand::Preview { all } => self.preview(msg, all).await?,
            AdminCommand::Schedule(times) => self.schedule(msg, times).await?,
            AdminCommand::Clear { confirmed: false } => {
                self.reply(msg, "say 'all', to be sure").await?;
            }
            AdminCommand::Clear { confirmed: true } => {
                let removed = self.store.clear().await?;
                info!(removed, "store cleared by operator");
                self.reply(msg, "Cleared.").await?;
            }
            AdminCommand::Shutdown { confirmed: false } => {
                self.reply(msg, "say 'please', be gentle").await?;
            }
            AdminCommand::Shutdown { confirmed: true } => {
                self.reply(msg, "shutting down...").await?;
                info!(operator = msg.sender_id, "shutdown requested");
                self.shutdown.notify_waiters();
            }
            AdminCommand::Reconcile => {
                let report = self.store.reconcile().await?;
                let text = if report.is_clean() {
                    "Indices are consistent.".to_string()
                } else {
                    format!("Repaired: {report}")
                };
                self.reply(msg, &text).await?;
            }
            AdminCommand::Edit(edit) => self.edit(msg, edit).await?,
        }
        Ok(())
    }

    async fn edit(&self, msg: &InboundMessage, edit: RecordEdit) -> anyhow::Result<()> {
        let Some(mut record) = self.referred(msg).await? else {
            return Ok(());
        };
        let result = edit.apply(&mut record, msg);

        match result.effect {
            EditEffect::Unchanged => {}
            EditEffect::Update => self.store.update(&record).await?,
            EditEffect::Attach(child) => {
                self.store.attach_child(&record.id, child).await?;
            }
            EditEffect::Remove => {
                self.store.delete(&record.id).await?;
            }
        }

        if edit.ack_expires() {
            self.ack(msg.link(), &result.reply).await;
        } else {
            self.reply(msg, &result.reply).await?;
        }
        Ok(())
    }

    async fn info(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        let summary = self.store.summarize().await?;
        let size = self.store.size().await?;
        let times = self.config().default_post_times;

        let coverage = if times.is_empty() {
            "No default posting times.".to_string()
        } else {
            format!(
                "Schedule: {}\n~{:.2} days covered with posts.",
                times.join(" "),
                size as f64 / times.len() as f64
            )
        };
        let text = if summary.buckets.is_empty() {
            coverage
        } else {
            format!("{summary}\n\n{coverage}")
        };
        self.transport.send_text(msg.chat_id, &text, None).await?;
        Ok(())
    }

    async fn preview(&self, msg: &InboundMessage, all: bool) -> anyhow::Result<()> {
        let records = if all {
            self.store.list_all().await?
        } else {
            match self.referred(msg).await? {
                Some(record) => vec![record],
                None => return Ok(()),
            }
        };

        for record in &records {
            let Some(origin) = record.first_origin() else {
                continue;
            };
            let sent = match self.transport.deliver(record, Destination::reply(origin)).await {
                Ok(sent) => sent,
                Err(e) => {
                    self.report(msg, &e.to_string()).await;
                    continue;
                }
            };
            self.expire(sent.clone(), PREVIEW_TTL);

            if let (Some(comment), Some(first)) = (&record.comment, sent.first()) {
                match self.transport.deliver(comment, Destination::reply(*first)).await {
                    Ok(replies) => self.expire(replies, PREVIEW_TTL),
                    Err(e) => self.report(msg, &e.to_string()).await,
                }
            }
            tokio::time::sleep(PREVIEW_PAUSE).await;
        }
        Ok(())
    }

    async fn schedule(&self, msg: &InboundMessage, times: Vec<String>) -> anyhow::Result<()> {
        let mut labels = Vec::with_capacity(times.len());
        for t in &times {
            match ScheduleLabel::parse_time(t) {
                Ok(label) => labels.push(label),
                Err(_) => {
                    self.reply(msg, &format!("Time {t} is invalid")).await?;
                    return Ok(());
                }
            }
        }

        let updated = {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            let old = std::mem::replace(&mut config.default_post_times, times.clone());
            (old, config.clone())
        };
        let (old, config) = updated;
        self.reply(
            msg,
            &format!("Old: '{}'\nNew: '{}'", old.join(" "), times.join(" ")),
        )
        .await?;

        self.posting.set_default_labels(labels);
        config.dump().context("failed to persist schedule")?;
        info!(schedule = %times.join(" "), "default posting times updated");
        Ok(())
    }

    /// The record whose origin message `msg` replies to. Answers "hm?" and
    /// returns `None` when the reply target is not a known record.
    async fn referred(&self, msg: &InboundMessage) -> anyhow::Result<Option<Record>> {
        let Some(target) = msg.reply_to else {
            bail!("no message is provided");
        };
        match self.store.resolve_by_origin(&target).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => {
                self.reply(msg, "hm?").await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Replies ─────────────────────────────────────────────────────

    async fn reply(&self, msg: &InboundMessage, text: &str) -> anyhow::Result<MessageLink> {
        Ok(self
            .transport
            .send_text(msg.chat_id, text, Some(msg.message_id))
            .await?)
    }

    /// Reply to `to` with a short acknowledgement that deletes itself after [`ACK_TTL`].
    async fn ack(&self, to: MessageLink, text: &str) {
        match self
            .transport
            .send_text(to.chat_id, text, Some(to.message_id))
            .await
        {
            Ok(sent) => self.expire(vec![sent], ACK_TTL),
            Err(e) => warn!(error = %e, "failed to acknowledge"),
        }
    }

    fn expire(&self, links: Vec<MessageLink>, after: Duration) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            for link in links {
                if let Err(e) = transport.delete_message(link).await {
                    warn!(
                        chat_id = link.chat_id,
                        message_id = link.message_id,
                        error = %e,
                        "failed to delete expiring message"
                    );
                }
            }
        });
    }

    /// Tell every operator about an error raised while handling `msg`.
    pub async fn report(&self, msg: &InboundMessage, error: &str) {
        let text = format!(
            "Error: {error}\nChat: {}\nMessageId: {}",
            msg.chat_id, msg.message_id
        );
        self.transport.notify_operators(&text).await;
    }
}

//! Outbound transport interface consumed by the scheduler and the operator surface.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::record::{MessageLink, Record};

/// Errors surfaced by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("download failed: {0}")]
    Download(String),

    #[error("nothing to send: {0}")]
    Empty(String),
}

/// Where a record should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub chat_id: i64,
    /// Message to reply to; delivery proceeds without the reply if it is gone.
    pub reply_to: Option<i64>,
}

impl Destination {
    pub fn chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            reply_to: None,
        }
    }

    pub fn reply(link: MessageLink) -> Self {
        Self {
            chat_id: link.chat_id,
            reply_to: Some(link.message_id),
        }
    }
}

/// Message transport used to publish records and talk to operators.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a record. Returns the links of every message created, in order.
    async fn deliver(
        &self,
        record: &Record,
        destination: Destination,
    ) -> Result<Vec<MessageLink>, TransportError>;

    /// Fetch a transport-held file to local disk.
    async fn download_to_local(&self, file_id: &str) -> Result<PathBuf, TransportError>;

    async fn delete_message(&self, link: MessageLink) -> Result<(), TransportError>;

    /// Send plain text, optionally as a reply.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<MessageLink, TransportError>;

    /// Best-effort broadcast to every operator. Failures are logged, not returned.
    async fn notify_operators(&self, text: &str);
}

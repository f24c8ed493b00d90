//! The schedulable record and its builder.
//!
//! The JSON layout matches bodies already persisted by earlier deployments,
//! hence the kebab-case and capitalised field names.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::{Attachment, InboundMessage};
use crate::schedule::ScheduleLabel;

/// A (chat, message) pair identifying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageLink {
    #[serde(rename = "chat-id")]
    pub chat_id: i64,
    #[serde(rename = "message-id")]
    pub message_id: i64,
}

impl MessageLink {
    pub fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// Stored media kind. Persisted as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MediaKind {
    Photo,
    Video,
    /// An image sent as a document (uncompressed).
    DocPhoto,
    /// A video sent as a document.
    DocVideo,
}

impl MediaKind {
    pub fn is_document(self) -> bool {
        matches!(self, MediaKind::DocPhoto | MediaKind::DocVideo)
    }
}

impl From<MediaKind> for u8 {
    fn from(kind: MediaKind) -> u8 {
        match kind {
            MediaKind::Photo => 0,
            MediaKind::Video => 1,
            MediaKind::DocPhoto => 2,
            MediaKind::DocVideo => 3,
        }
    }
}

impl TryFrom<u8> for MediaKind {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MediaKind::Photo),
            1 => Ok(MediaKind::Video),
            2 => Ok(MediaKind::DocPhoto),
            3 => Ok(MediaKind::DocVideo),
            other => Err(format!("unknown media kind code {other}")),
        }
    }
}

/// A typed reference to a media file held by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(rename = "Type")]
    pub kind: MediaKind,
    #[serde(rename = "Id")]
    pub file_id: String,
}

impl MediaRef {
    /// Classify an inbound attachment; `None` for anything that cannot be reposted.
    pub fn from_attachment(attachment: &Attachment) -> Option<Self> {
        let (kind, file_id) = match attachment {
            Attachment::Photo { file_id } => (MediaKind::Photo, file_id),
            Attachment::Video { file_id } => (MediaKind::Video, file_id),
            Attachment::Document { file_id, mime_type } => {
                let mime = mime_type.as_deref().unwrap_or_default().to_lowercase();
                if mime.starts_with("image") {
                    (MediaKind::DocPhoto, file_id)
                } else if mime.starts_with("video") {
                    (MediaKind::DocVideo, file_id)
                } else {
                    return None;
                }
            }
            Attachment::Unsupported { .. } => return None,
        };
        Some(Self {
            kind,
            file_id: file_id.clone(),
        })
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A persisted, schedulable unit of channel content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "time", default)]
    pub scheduled_time: ScheduleLabel,
    /// Operator messages this record was built from (reverse-lookup keys).
    #[serde(rename = "admin-messages", default)]
    pub origins: Vec<MessageLink>,
    /// Post documents as files rather than rendered media.
    #[serde(rename = "sources", default, skip_serializing_if = "is_false")]
    pub as_sources: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub protected: bool,
    #[serde(rename = "files", default)]
    pub media: Vec<MediaRef>,
    /// The correlated reply posted under the channel post once it is delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<Box<Record>>,
}

impl Record {
    /// Build a record from one correlated, ordered group of media messages.
    ///
    /// Fails if any message carries no supported media; nothing is built in that case.
    pub fn from_messages(messages: &[InboundMessage]) -> Result<Self, CoreError> {
        let first = messages
            .first()
            .ok_or_else(|| CoreError::validation("empty message group"))?;

        let mut origins = Vec::with_capacity(messages.len());
        let mut media = Vec::with_capacity(messages.len());
        for msg in messages {
            let item = msg
                .attachment
                .as_ref()
                .and_then(MediaRef::from_attachment)
                .ok_or_else(|| {
                    CoreError::validation("message with no supported media is provided")
                })?;
            origins.push(msg.link());
            media.push(item);
        }

        Ok(Self {
            id: first.correlation_key(),
            scheduled_time: ScheduleLabel::Unscheduled,
            origins,
            as_sources: false,
            text: String::new(),
            protected: false,
            media,
            comment: None,
        })
    }

    /// Build a text-only record from a single message.
    pub fn from_text(message: &InboundMessage) -> Self {
        Self {
            id: message.correlation_key(),
            scheduled_time: ScheduleLabel::Unscheduled,
            origins: vec![message.link()],
            as_sources: false,
            text: message.text.clone(),
            protected: false,
            media: Vec::new(),
            comment: None,
        }
    }

    pub fn first_origin(&self) -> Option<MessageLink> {
        self.origins.first().copied()
    }

    /// True when every media item is a document (vacuously true for text records).
    pub fn is_documents(&self) -> bool {
        self.media.iter().all(|m| m.kind.is_document())
    }

    /// A copy of this record to be posted as its own source files: documents
    /// mode, no text, no nested comment, id suffixed with `_cloned`.
    pub fn sources_copy(&self) -> Record {
        Record {
            id: format!("{}_cloned", self.id),
            scheduled_time: self.scheduled_time.clone(),
            origins: self.origins.clone(),
            as_sources: true,
            text: String::new(),
            protected: self.protected,
            media: self.media.clone(),
            comment: None,
        }
    }

    /// Every origin reference of this record and of its comment.
    pub fn all_origins(&self) -> impl Iterator<Item = &MessageLink> {
        self.origins
            .iter()
            .chain(self.comment.iter().flat_map(|c| c.origins.iter()))
    }
}

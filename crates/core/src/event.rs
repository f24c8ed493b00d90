//! Inbound message events, as delivered by the chat transport.

use serde::{Deserialize, Serialize};

use crate::record::MessageLink;

/// Sender id Telegram uses for messages auto-forwarded from a channel into
/// its linked discussion chat.
pub const CHANNEL_SERVICE_ACCOUNT_ID: i64 = 777_000;

/// Media carried by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    Photo { file_id: String },
    Video { file_id: String },
    Document { file_id: String, mime_type: Option<String> },
    /// Anything the bot cannot repost (stickers, voice notes, ...).
    Unsupported { kind_name: String },
}

/// A formatting span inside message text. Offsets are UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntity {
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One inbound chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    /// Media-group id shared by all parts of one album.
    #[serde(default)]
    pub album_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub entities: Vec<TextEntity>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    /// The message this one replies to.
    #[serde(default)]
    pub reply_to: Option<MessageLink>,
    /// For automatic forwards, the message id in the originating channel.
    #[serde(default)]
    pub forward_origin_message_id: Option<i64>,
}

impl InboundMessage {
    /// Correlation key: the album id, or `"{chat_id}_{message_id}"` for single messages.
    pub fn correlation_key(&self) -> String {
        match &self.album_id {
            Some(album) if !album.is_empty() => album.clone(),
            _ => format!("{}_{}", self.chat_id, self.message_id),
        }
    }

    /// Whether this message is one part of a multi-part submission.
    pub fn is_album_part(&self) -> bool {
        self.album_id.as_deref().is_some_and(|a| !a.is_empty())
    }

    pub fn link(&self) -> MessageLink {
        MessageLink::new(self.chat_id, self.message_id)
    }

    /// Sent in a private chat (chat id equals the sender id).
    pub fn is_private(&self) -> bool {
        self.chat_id == self.sender_id
    }

    pub fn is_channel_echo(&self) -> bool {
        self.sender_id == CHANNEL_SERVICE_ACCOUNT_ID && self.forward_origin_message_id.is_some()
    }

    pub fn has_media(&self) -> bool {
        self.attachment.is_some()
    }

    /// First whitespace-separated word, if it looks like a bot command (`/name`).
    /// A `@botname` suffix is stripped.
    pub fn command(&self) -> Option<&str> {
        let first = self.text.split_whitespace().next()?;
        if !first.starts_with('/') {
            return None;
        }
        Some(first.split('@').next().unwrap_or(first))
    }

    /// Arguments following the command word.
    pub fn command_args(&self) -> Vec<&str> {
        self.text.split_whitespace().skip(1).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(chat: i64, id: i64) -> InboundMessage {
        InboundMessage {
            chat_id: chat,
            message_id: id,
            sender_id: chat,
            ..Default::default()
        }
    }

    #[test]
    fn synthesized_key_for_single_messages() {
        assert_eq!(msg(42, 7).correlation_key(), "42_7");
        let mut empty_album = msg(42, 7);
        empty_album.album_id = Some(String::new());
        assert_eq!(empty_album.correlation_key(), "42_7");
        assert!(!empty_album.is_album_part());
    }

    #[test]
    fn album_key_wins() {
        let mut m = msg(42, 7);
        m.album_id = Some("1337".into());
        assert_eq!(m.correlation_key(), "1337");
        assert!(m.is_album_part());
    }

    #[test]
    fn command_parsing() {
        let mut m = msg(1, 1);
        m.text = "/schedule@chanpost_bot 10:00 12:00".into();
        assert_eq!(m.command(), Some("/schedule"));
        assert_eq!(m.command_args(), vec!["10:00", "12:00"]);

        m.text = "just text".into();
        assert_eq!(m.command(), None);
    }

    #[test]
    fn channel_echo_requires_service_sender_and_origin() {
        let mut m = msg(-100, 5);
        m.sender_id = CHANNEL_SERVICE_ACCOUNT_ID;
        assert!(!m.is_channel_echo());
        m.forward_origin_message_id = Some(99);
        assert!(m.is_channel_echo());
    }
}

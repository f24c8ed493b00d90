//! Bot API wire types, limited to the fields the bot reads.

use chanpost_core::{Attachment, InboundMessage, MessageLink, TextEntity};
use serde::{Deserialize, Serialize};

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub file_id: String,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageOrigin {
    #[serde(rename = "type")]
    pub kind: String,
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub media_group_id: Option<String>,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub caption_entities: Vec<MessageEntity>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub video: Option<FileRef>,
    pub document: Option<FileRef>,
    pub sticker: Option<serde_json::Value>,
    pub voice: Option<serde_json::Value>,
    pub audio: Option<serde_json::Value>,
    pub reply_to_message: Option<Box<Message>>,
    pub forward_origin: Option<MessageOrigin>,
    /// Pre-7.0 servers report the channel message id here.
    pub forward_from_message_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

impl BotCommand {
    pub fn new(command: &str, description: &str) -> Self {
        Self {
            command: command.to_string(),
            description: description.to_string(),
        }
    }
}

// ── Conversion ──────────────────────────────────────────────────────

impl Message {
    pub fn link(&self) -> MessageLink {
        MessageLink::new(self.chat.id, self.message_id)
    }

    fn attachment(&self) -> Option<Attachment> {
        // Sizes are listed smallest first.
        if let Some(largest) = self.photo.last() {
            return Some(Attachment::Photo {
                file_id: largest.file_id.clone(),
            });
        }
        if let Some(video) = &self.video {
            return Some(Attachment::Video {
                file_id: video.file_id.clone(),
            });
        }
        if let Some(doc) = &self.document {
            return Some(Attachment::Document {
                file_id: doc.file_id.clone(),
                mime_type: doc.mime_type.clone(),
            });
        }
        let unsupported = [
            ("sticker", &self.sticker),
            ("voice", &self.voice),
            ("audio", &self.audio),
        ];
        unsupported
            .into_iter()
            .find(|(_, v)| v.is_some())
            .map(|(name, _)| Attachment::Unsupported {
                kind_name: name.to_string(),
            })
    }

    fn forwarded_message_id(&self) -> Option<i64> {
        self.forward_origin
            .as_ref()
            .filter(|o| o.kind == "channel")
            .and_then(|o| o.message_id)
            .or(self.forward_from_message_id)
    }

    /// Flatten into the transport-independent message shape.
    pub fn to_inbound(&self) -> InboundMessage {
        let (text, entities) = match (&self.text, &self.caption) {
            (Some(text), _) => (text.clone(), &self.entities),
            (None, Some(caption)) => (caption.clone(), &self.caption_entities),
            (None, None) => (String::new(), &self.entities),
        };
        InboundMessage {
            chat_id: self.chat.id,
            message_id: self.message_id,
            sender_id: self.from.as_ref().map(|u| u.id).unwrap_or_default(),
            album_id: self.media_group_id.clone(),
            text,
            entities: entities
                .iter()
                .map(|e| TextEntity {
                    kind: e.kind.clone(),
                    offset: e.offset,
                    length: e.length,
                    url: e.url.clone(),
                })
                .collect(),
            attachment: self.attachment(),
            reply_to: self.reply_to_message.as_ref().map(|r| r.link()),
            forward_origin_message_id: self.forwarded_message_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Message {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn album_photo_with_caption() {
        let msg = parse(
            r#"{"message_id": 12, "chat": {"id": 55}, "from": {"id": 55, "is_bot": false, "first_name": "op"},
                "media_group_id": "1337",
                "photo": [{"file_id": "small", "width": 90, "height": 90},
                          {"file_id": "large", "width": 1280, "height": 1280}],
                "caption": "hello", "caption_entities": [{"type": "bold", "offset": 0, "length": 5}],
                "reply_to_message": {"message_id": 3, "chat": {"id": 55}}}"#,
        )
        .to_inbound();

        assert_eq!(msg.correlation_key(), "1337");
        assert!(msg.is_private());
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.entities[0].kind, "bold");
        assert_eq!(
            msg.attachment,
            Some(Attachment::Photo {
                file_id: "large".into()
            })
        );
        assert_eq!(msg.reply_to, Some(MessageLink::new(55, 3)));
    }

    #[test]
    fn document_keeps_mime_type() {
        let msg = parse(
            r#"{"message_id": 1, "chat": {"id": 5}, "from": {"id": 5},
                "document": {"file_id": "doc", "mime_type": "image/png"}}"#,
        )
        .to_inbound();
        assert_eq!(
            msg.attachment,
            Some(Attachment::Document {
                file_id: "doc".into(),
                mime_type: Some("image/png".into())
            })
        );
        assert_eq!(msg.correlation_key(), "5_1");
    }

    #[test]
    fn channel_echo_in_discussion_chat() {
        let msg = parse(
            r#"{"message_id": 900, "chat": {"id": -100200}, "from": {"id": 777000, "is_bot": false},
                "is_automatic_forward": true,
                "forward_origin": {"type": "channel", "chat": {"id": -100100}, "message_id": 4242, "date": 0},
                "text": "caption"}"#,
        )
        .to_inbound();
        assert!(msg.is_channel_echo());
        assert_eq!(msg.forward_origin_message_id, Some(4242));

        let legacy = parse(
            r#"{"message_id": 901, "chat": {"id": -100200}, "from": {"id": 777000},
                "forward_from_message_id": 17}"#,
        )
        .to_inbound();
        assert_eq!(legacy.forward_origin_message_id, Some(17));
    }

    #[test]
    fn sticker_is_unsupported() {
        let msg = parse(
            r#"{"message_id": 2, "chat": {"id": 5}, "from": {"id": 5}, "sticker": {"file_id": "s"}}"#,
        )
        .to_inbound();
        assert!(matches!(
            msg.attachment,
            Some(Attachment::Unsupported { ref kind_name }) if kind_name == "sticker"
        ));
    }

    #[test]
    fn error_envelope() {
        let resp: ApiResponse<serde_json::Value> = serde_json::from_str(
            r#"{"ok": false, "error_code": 429, "description": "Too Many Requests: retry after 5",
                "parameters": {"retry_after": 5}}"#,
        )
        .unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.parameters.and_then(|p| p.retry_after), Some(5));
    }
}

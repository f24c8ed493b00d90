//! Bot API client implementing [`Transport`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chanpost_core::{Destination, MessageLink, Record, Transport, TransportError};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::{ApiResponse, BotCommand, File, Message, Update, User};
use crate::error::TelegramError;
use crate::media::{self, DeliveryPlan, ItemSource, PlannedItem};

pub const PARSE_MODE: &str = "MarkdownV2";

/// How long a downloaded file is kept before it is removed.
pub const TEMP_FILE_TTL: Duration = Duration::from_secs(5 * 60);

/// Fallback wait when a 429 response carries no `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Per-message send options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    pub reply_to: Option<i64>,
    pub markdown: bool,
    pub protected: bool,
}

impl SendOptions {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn reply_to(mut self, message_id: Option<i64>) -> Self {
        self.reply_to = message_id;
        self
    }
}

/// Sends and receives through the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    temp_dir: PathBuf,
    operators: Vec<i64>,
}

impl TelegramClient {
    /// Create a client. The temporary directory is created if missing.
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        temp_dir: impl Into<PathBuf>,
        operators: Vec<i64>,
    ) -> Result<Self, TelegramError> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir)?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            temp_dir,
            operators,
        })
    }

    pub fn operators(&self) -> &[i64] {
        &self.operators
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_url, self.token, file_path)
    }

    // ── Raw calls ───────────────────────────────────────────────────

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, TelegramError> {
        debug!(method, "Telegram API call");
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &str,
        form: Form,
    ) -> Result<T, TelegramError> {
        debug!(method, "Telegram API multipart call");
        let response = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await?;
        parse_response(response).await
    }

    // ── Methods ─────────────────────────────────────────────────────

    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &json!({})).await
    }

    /// Long-poll for message updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        options: SendOptions,
    ) -> Result<Message, TelegramError> {
        let mut body = options_body(chat_id, options);
        body["text"] = Value::String(text.to_string());
        if options.markdown {
            body["parse_mode"] = Value::String(PARSE_MODE.to_string());
        }
        self.call("sendMessage", &body).await
    }

    pub async fn delete(&self, link: MessageLink) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": link.chat_id, "message_id": link.message_id }),
            )
            .await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File, TelegramError> {
        self.call("getFile", &json!({ "file_id": file_id })).await
    }

    pub async fn set_my_commands(&self, commands: &[BotCommand]) -> Result<(), TelegramError> {
        let _: bool = self
            .call("setMyCommands", &json!({ "commands": commands }))
            .await?;
        Ok(())
    }

    /// Download a Telegram-held file into the temporary directory. The local
    /// copy is removed after [`TEMP_FILE_TTL`].
    pub async fn download(&self, file_id: &str) -> Result<PathBuf, TelegramError> {
        let file = self.get_file(file_id).await?;
        let remote = file
            .file_path
            .ok_or_else(|| TelegramError::Empty(format!("no file path for {file_id}")))?;

        let bytes = self
            .http
            .get(self.file_url(&remote))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let local = self.temp_dir.join(local_file_name(file_id));
        tokio::fs::write(&local, &bytes).await?;
        debug!(file_id, path = %local.display(), size = bytes.len(), "file downloaded");
        schedule_removal(local.clone());
        Ok(local)
    }

    // ── Delivery ────────────────────────────────────────────────────

    async fn send_plan(
        &self,
        plan: DeliveryPlan,
        destination: Destination,
        protected: bool,
    ) -> Result<Vec<Message>, TelegramError> {
        let options = SendOptions {
            reply_to: destination.reply_to,
            markdown: true,
            protected,
        };

        let batches = match plan {
            DeliveryPlan::Text(text) => {
                let sent = self.send_message(destination.chat_id, &text, options).await?;
                return Ok(vec![sent]);
            }
            DeliveryPlan::Media(batches) => batches,
        };

        let mut sent = Vec::new();
        for (i, batch) in batches.into_iter().enumerate() {
            // Only the first batch replies; the rest follow it.
            let options = if i == 0 { options } else { options.reply_to(None) };
            let mut resolved = Vec::with_capacity(batch.len());
            for item in batch {
                let local = match &item.source {
                    ItemSource::Reupload(file_id) => Some(self.download(file_id).await?),
                    ItemSource::FileId(_) => None,
                };
                resolved.push((item, local));
            }

            if resolved.len() == 1 {
                let (item, local) = resolved.remove(0);
                sent.push(self.send_single(destination.chat_id, item, local, options).await?);
            } else {
                sent.extend(self.send_group(destination.chat_id, resolved, options).await?);
            }
        }
        Ok(sent)
    }

    async fn send_single(
        &self,
        chat_id: i64,
        item: PlannedItem,
        local: Option<PathBuf>,
        options: SendOptions,
    ) -> Result<Message, TelegramError> {
        let field = item.kind.as_str();
        let mut body = options_body(chat_id, options);
        if let Some(caption) = &item.caption {
            body["caption"] = Value::String(caption.clone());
            body["parse_mode"] = Value::String(PARSE_MODE.to_string());
        }

        match (local, &item.source) {
            (Some(path), _) => {
                let form = text_fields(Form::new(), &body)?.part(field, file_part(&path).await?);
                self.call_multipart(item.kind.method(), form).await
            }
            (None, ItemSource::FileId(id) | ItemSource::Reupload(id)) => {
                body[field] = Value::String(id.clone());
                self.call(item.kind.method(), &body).await
            }
        }
    }

    async fn send_group(
        &self,
        chat_id: i64,
        items: Vec<(PlannedItem, Option<PathBuf>)>,
        options: SendOptions,
    ) -> Result<Vec<Message>, TelegramError> {
        let mut body = options_body(chat_id, options);
        let media: Vec<Value> = items
            .iter()
            .enumerate()
            .map(|(i, (item, local))| media_entry(item, local.as_ref().map(|_| i)))
            .collect();
        body["media"] = Value::Array(media);

        if items.iter().all(|(_, local)| local.is_none()) {
            return self.call("sendMediaGroup", &body).await;
        }

        let mut form = text_fields(Form::new(), &body)?;
        for (i, (_, local)) in items.iter().enumerate() {
            if let Some(path) = local {
                form = form.part(format!("file{i}"), file_part(path).await?);
            }
        }
        self.call_multipart("sendMediaGroup", form).await
    }
}

// ── Transport ───────────────────────────────────────────────────────

#[async_trait]
impl Transport for TelegramClient {
    async fn deliver(
        &self,
        record: &Record,
        destination: Destination,
    ) -> Result<Vec<MessageLink>, TransportError> {
        let plan = media::plan(record)
            .ok_or_else(|| TelegramError::Empty(format!("record {} has no documents", record.id)))?;
        let sent = self.send_plan(plan, destination, record.protected).await?;
        debug!(record_id = %record.id, chat_id = destination.chat_id, messages = sent.len(), "record delivered");
        Ok(sent.iter().map(Message::link).collect())
    }

    async fn download_to_local(&self, file_id: &str) -> Result<PathBuf, TransportError> {
        Ok(self.download(file_id).await?)
    }

    async fn delete_message(&self, link: MessageLink) -> Result<(), TransportError> {
        Ok(self.delete(link).await?)
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<MessageLink, TransportError> {
        let sent = self
            .send_message(chat_id, text, SendOptions::plain().reply_to(reply_to))
            .await?;
        Ok(sent.link())
    }

    async fn notify_operators(&self, text: &str) {
        for &operator in &self.operators {
            if let Err(e) = self.send_message(operator, text, SendOptions::plain()).await {
                warn!(operator, error = %e, "failed to notify operator");
            }
        }
        info!(operators = self.operators.len(), "operators notified");
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn parse_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, TelegramError> {
    let status = response.status();
    let body: ApiResponse<T> = response.json().await?;

    if body.ok {
        return body.result.ok_or_else(|| TelegramError::Api {
            code: i64::from(status.as_u16()),
            description: "response carried no result".to_string(),
        });
    }

    // Handle rate limiting (HTTP 429).
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || body.error_code == Some(429) {
        let retry_after = body
            .parameters
            .and_then(|p| p.retry_after)
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(TelegramError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    Err(TelegramError::Api {
        code: body.error_code.unwrap_or(i64::from(status.as_u16())),
        description: body
            .description
            .unwrap_or_else(|| "Unknown Telegram API error".to_string()),
    })
}

/// Common fields of every send call.
fn options_body(chat_id: i64, options: SendOptions) -> Value {
    let mut body = json!({ "chat_id": chat_id });
    if options.protected {
        body["protect_content"] = Value::Bool(true);
    }
    if let Some(message_id) = options.reply_to {
        body["reply_parameters"] = json!({
            "message_id": message_id,
            "allow_sending_without_reply": true,
        });
    }
    body
}

/// One `InputMedia` entry. `attach` names the multipart part holding the file.
fn media_entry(item: &PlannedItem, attach: Option<usize>) -> Value {
    let media = match (attach, &item.source) {
        (Some(i), _) => format!("attach://file{i}"),
        (None, ItemSource::FileId(id) | ItemSource::Reupload(id)) => id.clone(),
    };
    let mut entry = json!({ "type": item.kind.as_str(), "media": media });
    if let Some(caption) = &item.caption {
        entry["caption"] = Value::String(caption.clone());
        entry["parse_mode"] = Value::String(PARSE_MODE.to_string());
    }
    entry
}

/// Copy a JSON body into multipart text fields; nested values are JSON-encoded.
fn text_fields(mut form: Form, body: &Value) -> Result<Form, TelegramError> {
    if let Value::Object(map) = body {
        for (key, value) in map {
            let text = match value {
                Value::String(s) => s.clone(),
                other => serde_json::to_string(other)?,
            };
            form = form.text(key.clone(), text);
        }
    }
    Ok(form)
}

async fn file_part(path: &Path) -> Result<Part, TelegramError> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    Ok(Part::bytes(bytes).file_name(name))
}

fn local_file_name(file_id: &str) -> String {
    file_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn schedule_removal(path: PathBuf) {
    tokio::spawn(async move {
        tokio::time::sleep(TEMP_FILE_TTL).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "temporary file removed"),
            Err(e) => debug!(path = %path.display(), error = %e, "temporary file already gone"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ItemKind;

    fn client() -> (tempfile::TempDir, TelegramClient) {
        let dir = tempfile::tempdir().unwrap();
        let client =
            TelegramClient::new("https://api.example.org/", "123:ABC", dir.path(), vec![1, 2])
                .unwrap();
        (dir, client)
    }

    #[test]
    fn builds_urls() {
        let (_dir, client) = client();
        assert_eq!(
            client.method_url("getMe"),
            "https://api.example.org/bot123:ABC/getMe"
        );
        assert_eq!(
            client.file_url("photos/file_1.jpg"),
            "https://api.example.org/file/bot123:ABC/photos/file_1.jpg"
        );
        assert_eq!(client.operators(), &[1, 2]);
    }

    #[test]
    fn creates_missing_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("tmp").join("media");
        TelegramClient::new("https://api.example.org", "t", &nested, vec![]).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn options_body_reply_and_protection() {
        let body = options_body(
            -100,
            SendOptions {
                reply_to: Some(7),
                markdown: true,
                protected: true,
            },
        );
        assert_eq!(body["chat_id"], -100);
        assert_eq!(body["protect_content"], true);
        assert_eq!(body["reply_parameters"]["message_id"], 7);
        assert_eq!(body["reply_parameters"]["allow_sending_without_reply"], true);

        let plain = options_body(5, SendOptions::plain());
        assert!(plain.get("protect_content").is_none());
        assert!(plain.get("reply_parameters").is_none());
    }

    #[test]
    fn media_entries() {
        let remote = PlannedItem {
            kind: ItemKind::Video,
            source: ItemSource::FileId("vid".into()),
            caption: Some("hi".into()),
        };
        let entry = media_entry(&remote, None);
        assert_eq!(entry["type"], "video");
        assert_eq!(entry["media"], "vid");
        assert_eq!(entry["caption"], "hi");
        assert_eq!(entry["parse_mode"], PARSE_MODE);

        let upload = PlannedItem {
            kind: ItemKind::Photo,
            source: ItemSource::Reupload("doc".into()),
            caption: None,
        };
        let entry = media_entry(&upload, Some(3));
        assert_eq!(entry["media"], "attach://file3");
        assert!(entry.get("caption").is_none());
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(local_file_name("AgAD-x_1"), "AgAD-x_1");
        assert_eq!(local_file_name("../etc/passwd"), "___etc_passwd");
    }
}

//! Operator commands and the record edits they perform.

use chanpost_core::schedule::is_time_label;
use chanpost_core::{InboundMessage, Record, ScheduleLabel};
use chanpost_telegram::entities_to_markdown;

const NOTHING_CHANGED: &str = "Nothing could be changed.";

/// Suffix marking a reply as the new post text.
const POST_TEXT_SUFFIX: &str = ".p";

/// A parsed operator message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Start,
    Info,
    /// Post the referenced record now.
    Post,
    /// Post a random unscheduled record now.
    Random,
    Preview { all: bool },
    Schedule(Vec<String>),
    Clear { confirmed: bool },
    Shutdown { confirmed: bool },
    Reconcile,
    /// An edit of the record whose origin message is replied to.
    Edit(RecordEdit),
}

/// Edits applied to a record referenced by reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEdit {
    SetTime(ScheduleLabel),
    Source,
    Docs,
    Remove,
    NoText,
    NoComment,
    NoCommentText,
    Protected,
    Debug,
    /// New post text, already rendered as MarkdownV2.
    PostText(String),
    /// New comment text, already rendered as MarkdownV2.
    CommentText(String),
}

impl AdminCommand {
    pub fn parse(msg: &InboundMessage) -> Self {
        let first_arg = msg.command_args().first().map(|a| a.to_lowercase());
        let arg_is = |word: &str| first_arg.as_deref() == Some(word);

        match msg.command() {
            Some("/start") => return AdminCommand::Start,
            Some("/info") => return AdminCommand::Info,
            Some("/post") => return AdminCommand::Post,
            Some("/random") => return AdminCommand::Random,
            Some("/preview") => return AdminCommand::Preview { all: arg_is("all") },
            Some("/schedule") => {
                return AdminCommand::Schedule(
                    msg.command_args().into_iter().map(str::to_string).collect(),
                )
            }
            Some("/clear") => return AdminCommand::Clear { confirmed: arg_is("all") },
            Some("/shutdown") => {
                return AdminCommand::Shutdown {
                    confirmed: arg_is("please"),
                }
            }
            Some("/reconcile") => return AdminCommand::Reconcile,
            _ => {}
        }

        let text = msg.text.trim();
        let edit = match text {
            "/source" => RecordEdit::Source,
            "/docs" => RecordEdit::Docs,
            "/remove" => RecordEdit::Remove,
            "/notext" => RecordEdit::NoText,
            "/nocomment" => RecordEdit::NoComment,
            "/nocommenttext" => RecordEdit::NoCommentText,
            "/protected" => RecordEdit::Protected,
            "/debug" => RecordEdit::Debug,
            t if is_time_label(t) => RecordEdit::SetTime(ScheduleLabel::At(t.to_string())),
            _ => match msg.text.strip_suffix(POST_TEXT_SUFFIX) {
                Some(body) => RecordEdit::PostText(entities_to_markdown(body, &msg.entities)),
                None => RecordEdit::CommentText(entities_to_markdown(&msg.text, &msg.entities)),
            },
        };
        AdminCommand::Edit(edit)
    }
}

/// How the store must change after an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditEffect {
    Unchanged,
    Update,
    /// Replace the record's comment with this one.
    Attach(Record),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditResult {
    /// Reply shown to the operator.
    pub reply: String,
    pub effect: EditEffect,
}

impl EditResult {
    fn new(reply: impl Into<String>, effect: EditEffect) -> Self {
        Self {
            reply: reply.into(),
            effect,
        }
    }

    fn unchanged() -> Self {
        Self::new(NOTHING_CHANGED, EditEffect::Unchanged)
    }
}

impl RecordEdit {
    /// Apply the edit to `record` in memory. `msg` is the operator's message,
    /// used as the origin of a newly created text comment.
    pub fn apply(&self, record: &mut Record, msg: &InboundMessage) -> EditResult {
        match self {
            RecordEdit::SetTime(label) => {
                let reply = format!("Time '{}' --> '{}'", record.scheduled_time, label);
                record.scheduled_time = label.clone();
                EditResult::new(reply, EditEffect::Update)
            }
            RecordEdit::Source => {
                if record.media.is_empty() || !record.is_documents() {
                    return EditResult::unchanged();
                }
                EditResult::new(
                    "Sources shall be posted.",
                    EditEffect::Attach(record.sources_copy()),
                )
            }
            RecordEdit::Docs => {
                let Some(comment) = record.comment.as_mut() else {
                    return EditResult::unchanged();
                };
                if comment.media.is_empty() || !comment.is_documents() {
                    return EditResult::unchanged();
                }
                let reply = format!(
                    "Converting sources to pictures ({}) --> ({})",
                    !comment.as_sources, comment.as_sources
                );
                comment.as_sources = !comment.as_sources;
                EditResult::new(reply, EditEffect::Update)
            }
            RecordEdit::Remove => EditResult::new("Removed", EditEffect::Remove),
            RecordEdit::NoText => {
                let reply = format!("Post text '{}' --> ''", record.text);
                record.text.clear();
                EditResult::new(reply, EditEffect::Update)
            }
            RecordEdit::NoComment => {
                record.comment = None;
                EditResult::new("Comment is removed.", EditEffect::Update)
            }
            RecordEdit::NoCommentText => {
                let Some(comment) = record.comment.as_mut() else {
                    return EditResult::unchanged();
                };
                let reply = format!("Comment text '{}' --> ''", comment.text);
                comment.text.clear();
                EditResult::new(reply, EditEffect::Update)
            }
            RecordEdit::Protected => {
                let reply = format!(
                    "Post protection ({}) --> ({})",
                    record.protected, !record.protected
                );
                record.protected = !record.protected;
                if let Some(comment) = record.comment.as_mut() {
                    comment.protected = record.protected;
                }
                EditResult::new(reply, EditEffect::Update)
            }
            RecordEdit::Debug => {
                let reply = serde_json::to_string_pretty(record)
                    .unwrap_or_else(|e| format!("failed to encode record: {e}"));
                EditResult::new(reply, EditEffect::Unchanged)
            }
            RecordEdit::PostText(text) => {
                let reply = format!("Post text '{}' --> '{}'", record.text, text);
                record.text = text.clone();
                EditResult::new(reply, EditEffect::Update)
            }
            RecordEdit::CommentText(text) => match record.comment.as_mut() {
                Some(comment) => {
                    let reply = format!("Comment text '{}' --> '{}'", comment.text, text);
                    comment.text = text.clone();
                    EditResult::new(reply, EditEffect::Update)
                }
                None => {
                    let mut comment = Record::from_text(msg);
                    comment.text = text.clone();
                    let reply = format!("Comment text '' --> '{text}'");
                    EditResult::new(reply, EditEffect::Attach(comment))
                }
            },
        }
    }

    /// Whether the operator's reply should disappear after a while.
    pub fn ack_expires(&self) -> bool {
        !matches!(self, RecordEdit::Debug)
    }
}

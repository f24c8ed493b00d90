//! Telegram Bot API transport.
//!
//! [`TelegramClient`] talks to the Bot API over HTTPS and implements the
//! [`chanpost_core::Transport`] interface used by the posting loop and the
//! operator surface. [`UpdatePoller`] long-polls `getUpdates` and turns
//! each message into an [`chanpost_core::InboundMessage`].

pub mod api;
pub mod client;
pub mod error;
pub mod markdown;
pub mod media;
pub mod poller;

pub use api::{BotCommand, Update, User};
pub use client::TelegramClient;
pub use error::TelegramError;
pub use markdown::{entities_to_markdown, escape_markdown_v2};
pub use poller::UpdatePoller;

//! Operator surface of the channel bot: command parsing, record edits and
//! routing of inbound messages to the correlator, the store and the posting loop.

pub mod admin;
pub mod app;
pub mod commands;

pub use admin::{AdminCommand, EditEffect, EditResult, RecordEdit};
pub use app::{App, Route, ACK_TTL, PREVIEW_TTL};

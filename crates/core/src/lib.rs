pub mod config;
pub mod error;
pub mod event;
pub mod record;
pub mod schedule;
pub mod transport;

pub use config::BotConfig;
pub use error::CoreError;
pub use event::{Attachment, InboundMessage, TextEntity};
pub use record::{MediaKind, MediaRef, MessageLink, Record};
pub use schedule::ScheduleLabel;
pub use transport::{Destination, Transport, TransportError};

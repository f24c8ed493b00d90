//! Time-driven posting of stored records to the channel.

pub mod error;
pub mod posting;
pub mod ticker;

pub use error::SchedulerError;
pub use posting::{LoopState, PostOutcome, PostingLoop, TickReport, MAX_ATTEMPTS};
pub use ticker::{first_tick_delay, TICK_INTERVAL};

//! Debounced grouping of message events.
//!
//! Events that belong to one logical submission (an album) arrive as separate
//! updates, in no guaranteed order, with no marker for the last one. The
//! [`Correlator`] collects them per correlation key for a fixed window opened
//! by the first event, then hands the whole group, ordered by sequence, to a
//! single handler invocation.

pub mod correlator;
pub mod error;

pub use correlator::{Correlate, Correlator, CorrelatorBuilder, FaultReporter, GroupHandler};
pub use error::CorrelatorError;

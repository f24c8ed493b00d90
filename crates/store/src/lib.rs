//! Indexed record store.
//!
//! Records live as JSON bodies in a key-value backend, with derived set
//! indices maintained by [`RecordStore`]:
//!
//! ```text
//! prefix:posts                               set of live record ids
//! prefix:times                               set of labels in use
//! prefix:time:<label>                        set of ids under <label>
//! prefix:post:<id>                           record body
//! prefix:admin-chat:<chat>:msg-id:<msg>      origin → id (1h)
//! prefix:recent:<delivery id>                delivered message → id (1m)
//! ```
//!
//! The backend offers no multi-key transactions. Writes are ordered so a
//! body always exists before any index points at it, and
//! [`RecordStore::reconcile`] repairs whatever drift a partial failure leaves.

pub mod backend;
pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod store;

pub use backend::KvBackend;
pub use error::StoreError;
pub use keys::KeySpace;
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;
pub use store::{BucketCount, ReconcileReport, RecordStore, Summary, ORIGIN_TTL, RECENT_TTL};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chanpost_core::InboundMessage;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::error::CorrelatorError;

/// Default debounce window opened by the first event of a group.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

// ── Correlate trait ─────────────────────────────────────────────────

/// An event that can be grouped by the [`Correlator`].
pub trait Correlate: Send + 'static {
    /// Key shared by every event of one submission.
    fn correlation_key(&self) -> String;

    /// Ordering of events inside a group.
    fn sequence(&self) -> i64;

    /// False for events that can never have siblings; those dispatch immediately.
    fn is_grouped(&self) -> bool;
}

impl Correlate for InboundMessage {
    fn correlation_key(&self) -> String {
        InboundMessage::correlation_key(self)
    }

    fn sequence(&self) -> i64 {
        self.message_id
    }

    fn is_grouped(&self) -> bool {
        self.is_album_part()
    }
}

// ── Handler types ───────────────────────────────────────────────────

/// Boxed async function receiving one complete, ordered group.
pub type GroupHandler<T> = Box<
    dyn Fn(Vec<T>) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync,
>;

/// Receives handler faults. Called from the dispatch task.
pub type FaultReporter = Box<dyn Fn(CorrelatorError) + Send + Sync>;

// ── CorrelatorBuilder ───────────────────────────────────────────────

/// Fluent builder for a [`Correlator`].
///
/// ```ignore
/// let correlator = CorrelatorBuilder::new()
///     .debounce(Duration::from_millis(800))
///     .on_group(|events: Vec<InboundMessage>| async move {
///         println!("{} events", events.len());
///         Ok(())
///     })
///     .build()?;
/// ```
pub struct CorrelatorBuilder<T> {
    debounce: Duration,
    handler: Option<GroupHandler<T>>,
    on_fault: Option<FaultReporter>,
}

impl<T: Correlate> CorrelatorBuilder<T> {
    pub fn new() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            handler: None,
            on_fault: None,
        }
    }

    /// Set the debounce window (default: 1s).
    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Register the group handler.
    pub fn on_group<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler = Some(Box::new(move |events| Box::pin(handler(events))));
        self
    }

    /// Register a fault reporter. Faults are always logged; this adds a side channel.
    pub fn on_fault<F>(mut self, reporter: F) -> Self
    where
        F: Fn(CorrelatorError) + Send + Sync + 'static,
    {
        self.on_fault = Some(Box::new(reporter));
        self
    }

    pub fn build(self) -> Result<Correlator<T>, CorrelatorError> {
        let handler = self.handler.ok_or(CorrelatorError::MissingHandler)?;
        Ok(Correlator {
            inner: Arc::new(Inner {
                debounce: self.debounce,
                handler,
                on_fault: self.on_fault,
                groups: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl<T: Correlate> Default for CorrelatorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Correlator ──────────────────────────────────────────────────────

struct Group<T> {
    events: Vec<T>,
    timer: JoinHandle<()>,
}

struct Inner<T> {
    debounce: Duration,
    handler: GroupHandler<T>,
    on_fault: Option<FaultReporter>,
    groups: Mutex<HashMap<String, Group<T>>>,
}

/// Groups events by correlation key and dispatches each group exactly once.
///
/// Cloning is cheap and every clone shares the same group table. Must be used
/// from within a Tokio runtime.
pub struct Correlator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Correlator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Correlate> Correlator<T> {
    pub fn builder() -> CorrelatorBuilder<T> {
        CorrelatorBuilder::new()
    }

    /// Hand an event to the correlator. Never blocks on dispatch.
    ///
    /// The first event of a key opens a group and starts its timer; later
    /// events are appended without extending the window. An event whose group
    /// has already fired opens a new group.
    pub fn register(&self, event: T) {
        let key = event.correlation_key();
        if !event.is_grouped() {
            debug!(key = %key, "dispatching single event");
            tokio::spawn(Inner::dispatch(self.inner.clone(), key, vec![event]));
            return;
        }

        let mut groups = self.inner.lock();
        match groups.entry(key) {
            Entry::Occupied(mut open) => {
                open.get_mut().events.push(event);
                debug!(key = %open.key(), size = open.get().events.len(), "event joined group");
            }
            Entry::Vacant(slot) => {
                let inner = self.inner.clone();
                let timer_key = slot.key().clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(inner.debounce).await;
                    Inner::fire(inner, timer_key).await;
                });
                debug!(key = %slot.key(), "group opened");
                slot.insert(Group {
                    events: vec![event],
                    timer,
                });
            }
        }
    }

    /// Number of groups still waiting for their timer.
    pub fn open_groups(&self) -> usize {
        self.inner.lock().len()
    }

    /// Abort every pending timer and drop the open groups. Returns how many were dropped.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(String, Group<T>)> = self.inner.lock().drain().collect();
        for (key, group) in &drained {
            group.timer.abort();
            warn!(key = %key, events = group.events.len(), "dropping undispatched group");
        }
        drained.len()
    }
}

impl<T: Correlate> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Group<T>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer expiry: take the group out of the table, order it and dispatch.
    async fn fire(inner: Arc<Self>, key: String) {
        let removed = {
            let mut groups = inner.lock();
            groups.remove(&key)
        };
        let Some(group) = removed else {
            return;
        };
        let mut events = group.events;
        events.sort_by_key(|e| e.sequence());
        Self::dispatch(inner, key, events).await;
    }

    async fn dispatch(inner: Arc<Self>, key: String, events: Vec<T>) {
        let size = events.len();
        let runner = inner.clone();
        let outcome = tokio::spawn(async move { (runner.handler)(events).await }).await;

        let fault = match outcome {
            Ok(Ok(())) => {
                debug!(key = %key, size, "group dispatched");
                return;
            }
            Ok(Err(e)) => CorrelatorError::Handler {
                key,
                message: format!("{e:#}"),
            },
            Err(join) if join.is_panic() => CorrelatorError::Panicked {
                key,
                message: panic_message(join),
            },
            Err(_) => {
                debug!(key = %key, "group dispatch cancelled");
                return;
            }
        };

        warn!(error = %fault, size, "group dispatch failed");
        if let Some(report) = &inner.on_fault {
            report(fault);
        }
    }
}

fn panic_message(join: JoinError) -> String {
    let payload = join.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

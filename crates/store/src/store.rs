//! Record store with manually maintained indices.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chanpost_core::{MessageLink, Record, ScheduleLabel};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::backend::KvBackend;
use crate::error::StoreError;
use crate::keys::KeySpace;

/// Lifetime of an origin reverse-lookup entry.
pub const ORIGIN_TTL: Duration = Duration::from_secs(60 * 60);

/// Lifetime of a delivered-message correlation entry.
pub const RECENT_TTL: Duration = Duration::from_secs(60);

/// Random draws `query_random_due` makes before scanning the whole bucket.
const MAX_RANDOM_DRAWS: usize = 8;

// ── Summary types ───────────────────────────────────────────────────

/// Number of records under one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketCount {
    pub label: ScheduleLabel,
    pub count: u64,
}

/// Per-bucket counts, sorted by label (unscheduled first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub buckets: Vec<BucketCount>,
    pub total: u64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .buckets
            .iter()
            .map(|b| format!("{}  -  {}", b.label.display_label(), b.count))
            .collect();
        f.write_str(&lines.join("\n"))
    }
}

/// What a `reconcile` pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Bodies that were missing from `posts` and have been indexed again.
    pub reindexed_bodies: usize,
    /// Ids in `posts` whose body was gone.
    pub dropped_ids: usize,
    /// Live records re-added to the bucket matching their label.
    pub restored_bucket_entries: usize,
    /// Labels re-added to `times`.
    pub restored_labels: usize,
    /// Bucket members removed because their body was gone or carried another label.
    pub pruned_bucket_entries: usize,
    /// Empty labels removed from `times`.
    pub pruned_labels: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reindexed bodies: {}, dropped ids: {}, restored entries: {}, restored labels: {}, pruned entries: {}, pruned labels: {}",
            self.reindexed_bodies,
            self.dropped_ids,
            self.restored_bucket_entries,
            self.restored_labels,
            self.pruned_bucket_entries,
            self.pruned_labels
        )
    }
}

// ── RecordStore ─────────────────────────────────────────────────────

/// Persists records and keeps the `posts`, `times`, bucket, origin and
/// recent indices consistent with them.
///
/// Safe to share across tasks (`Arc<RecordStore>`); every method takes `&self`
/// and holds no in-process lock, so unrelated ids are never serialized.
pub struct RecordStore {
    backend: Arc<dyn KvBackend>,
    keys: KeySpace,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        let keys = KeySpace::new(prefix);
        debug!(backend = backend.backend_name(), prefix = keys.prefix(), "record store ready");
        Self { backend, keys }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Insert a new record. The body is written before any index entry.
    ///
    /// Creating an id that already exists behaves like [`update`](Self::update)
    /// and then writes every index entry again, so a resubmitted id never
    /// lingers in a stale bucket and a body left unindexed is picked up.
    pub async fn create(&self, record: &Record) -> Result<(), StoreError> {
        if record.id.is_empty() {
            return Err(StoreError::Invalid("record id must not be empty".to_string()));
        }
        if self.backend.get(&self.keys.post(&record.id)).await?.is_some() {
            debug!(record_id = %record.id, "record exists, creating as update");
            self.update(record).await?;
            let errs = self.index(record).await;
            return partial(&record.id, "create", errs);
        }

        self.write_body(record).await?;
        let errs = self.index(record).await;

        info!(record_id = %record.id, label = %record.scheduled_time, "record created");
        partial(&record.id, "create", errs)
    }

    pub async fn get(&self, id: &str) -> Result<Record, StoreError> {
        let key = self.keys.post(id);
        let body = self
            .backend
            .get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("record {id}")))?;
        serde_json::from_str(&body).map_err(|source| StoreError::Corrupt { key, source })
    }

    /// Re-persist a record, migrating it between buckets if its label changed.
    ///
    /// Migration adds to the new bucket before removing from the old one, so a
    /// concurrent reader may briefly see the id in both, never in neither.
    pub async fn update(&self, record: &Record) -> Result<(), StoreError> {
        let original = self.get(&record.id).await?;
        self.write_body(record).await?;

        let mut errs = Vec::new();
        let old = &original.scheduled_time;
        let new = &record.scheduled_time;
        if old != new {
            collect(&mut errs, self.backend.sadd(&self.keys.times(), new.as_str()).await);
            collect(&mut errs, self.backend.sadd(&self.keys.time(new), &record.id).await);
            collect(&mut errs, self.backend.srem(&self.keys.time(old), &record.id).await);
            collect(&mut errs, self.prune_label(old).await);
            info!(record_id = %record.id, from = %old, to = %new, "record rescheduled");
        } else {
            debug!(record_id = %record.id, "record updated");
        }

        partial(&record.id, "update", errs)
    }

    /// Remove a record and every index entry pointing at it. Returns the removed record.
    ///
    /// Index entries go first and the body last, so an interrupted delete
    /// leaves at worst an unindexed body, never an index entry without one.
    pub async fn delete(&self, id: &str) -> Result<Record, StoreError> {
        let record = match self.get(id).await {
            Ok(record) => record,
            Err(StoreError::NotFound(what)) => {
                // Drop a dangling id left by an earlier partial delete.
                self.backend.srem(&self.keys.posts(), id).await?;
                return Err(StoreError::NotFound(what));
            }
            Err(e) => return Err(e),
        };

        let mut errs = Vec::new();
        let label = &record.scheduled_time;
        collect(&mut errs, self.backend.srem(&self.keys.posts(), id).await);
        collect(&mut errs, self.backend.srem(&self.keys.time(label), id).await);
        collect(&mut errs, self.prune_label(label).await);
        for link in record.all_origins() {
            collect(&mut errs, self.backend.del(&self.keys.origin(link)).await);
        }

        if !errs.is_empty() {
            // Keep the body so reconcile can still find what to clean up.
            return partial(id, "delete", errs).map(|_| record);
        }
        self.backend.del(&self.keys.post(id)).await?;
        info!(record_id = %id, "record removed");
        Ok(record)
    }

    /// Replace a record's comment and point the comment's origins at the parent.
    pub async fn attach_child(&self, id: &str, child: Record) -> Result<Record, StoreError> {
        let mut parent = self.get(id).await?;
        let child_origins = child.origins.clone();
        parent.comment = Some(Box::new(child));
        self.update(&parent).await?;

        let mut errs = Vec::new();
        for link in &child_origins {
            collect(&mut errs, self.link_origin(link, id).await);
        }
        info!(record_id = %id, "comment attached");
        partial(id, "attach_child", errs).map(|_| parent)
    }

    /// A uniformly random record scheduled under `label`.
    ///
    /// Bucket members whose body is gone, or whose body now carries another
    /// label, are stale leftovers of an interrupted write: they are pruned and
    /// never returned.
    pub async fn query_random_due(&self, label: &ScheduleLabel) -> Result<Record, StoreError> {
        let bucket = self.keys.time(label);
        for _ in 0..MAX_RANDOM_DRAWS {
            let Some(id) = self.backend.srandmember(&bucket).await? else {
                return Err(StoreError::NotFound(format!("no record scheduled for {label}")));
            };
            if let Some(record) = self.due_member(label, &id).await? {
                return Ok(record);
            }
        }

        // Mostly stale bucket: check every member instead of drawing again.
        let mut live = Vec::new();
        for id in self.backend.smembers(&bucket).await? {
            if let Some(record) = self.due_member(label, &id).await? {
                live.push(record);
            }
        }
        live.choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("no record scheduled for {label}")))
    }

    /// The record behind bucket member `id`, or `None` after pruning it as stale.
    async fn due_member(
        &self,
        label: &ScheduleLabel,
        id: &str,
    ) -> Result<Option<Record>, StoreError> {
        match self.get(id).await {
            Ok(record) if record.scheduled_time == *label => return Ok(Some(record)),
            Ok(record) => {
                warn!(record_id = %id, bucket = %label, actual = %record.scheduled_time, "pruning stale bucket entry");
            }
            Err(StoreError::NotFound(_)) => {
                warn!(record_id = %id, bucket = %label, "pruning bucket entry without body");
            }
            Err(e) => return Err(e),
        }
        self.backend.srem(&self.keys.time(label), id).await?;
        self.prune_label(label).await?;
        Ok(None)
    }

    /// Every live record, sorted by id. Ids whose body is missing are skipped.
    pub async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        let ids = self.backend.smembers(&self.keys.posts()).await?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(record) => records.push(record),
                Err(StoreError::NotFound(_)) => {
                    warn!(record_id = %id, "listed id has no body");
                }
                Err(e) => return Err(e),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Point an origin message at a record id for [`ORIGIN_TTL`].
    pub async fn link_origin(&self, link: &MessageLink, id: &str) -> Result<(), StoreError> {
        self.backend
            .set(&self.keys.origin(link), id, Some(ORIGIN_TTL))
            .await
    }

    /// Record an origin message resolves to. An expired entry, or one whose
    /// record is gone, is NotFound.
    pub async fn resolve_by_origin(&self, link: &MessageLink) -> Result<Record, StoreError> {
        let id = self
            .backend
            .get(&self.keys.origin(link))
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "origin {}:{}",
                    link.chat_id, link.message_id
                ))
            })?;
        self.get(&id).await
    }

    /// Remember which record produced a freshly delivered message, for [`RECENT_TTL`].
    pub async fn remember_delivery(&self, id: &str, delivery_id: i64) -> Result<(), StoreError> {
        self.get(id).await?;
        self.backend
            .set(&self.keys.recent(delivery_id), id, Some(RECENT_TTL))
            .await?;
        debug!(record_id = %id, delivery_id, "delivery remembered");
        Ok(())
    }

    pub async fn resolve_by_delivery(&self, delivery_id: i64) -> Result<Record, StoreError> {
        let id = self
            .backend
            .get(&self.keys.recent(delivery_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("delivery {delivery_id}")))?;
        self.get(&id).await
    }

    /// Per-bucket record counts.
    pub async fn summarize(&self) -> Result<Summary, StoreError> {
        let mut buckets = Vec::new();
        for raw in self.backend.smembers(&self.keys.times()).await? {
            let label: ScheduleLabel = match raw.parse() {
                Ok(label) => label,
                Err(_) => {
                    warn!(label = %raw, "ignoring malformed label in times index");
                    continue;
                }
            };
            let count = self.backend.scard(&self.keys.time(&label)).await?;
            buckets.push(BucketCount { label, count });
        }
        buckets.sort_by(|a, b| a.label.cmp(&b.label));
        let total = buckets.iter().map(|b| b.count).sum();
        Ok(Summary { buckets, total })
    }

    /// Number of live record ids.
    pub async fn size(&self) -> Result<u64, StoreError> {
        self.backend.scard(&self.keys.posts()).await
    }

    /// Delete every listed record. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut errs = Vec::new();
        for record in self.list_all().await? {
            match self.delete(&record.id).await {
                Ok(_) => removed += 1,
                Err(e) => errs.push(format!("{}: {e}", record.id)),
            }
        }
        if errs.is_empty() {
            Ok(removed)
        } else {
            Err(StoreError::Partial(errs))
        }
    }

    /// Cross-check bodies, `posts` and buckets against each other and repair drift.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();

        let body_prefix = self.keys.post("");
        for key in self.backend.scan_prefix(&body_prefix).await? {
            let id = &key[body_prefix.len()..];
            if self.backend.sismember(&self.keys.posts(), id).await? {
                continue;
            }
            let record = match self.get(id).await {
                Ok(record) => record,
                // Deleted since the scan.
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let errs = self.index(&record).await;
            if !errs.is_empty() {
                return Err(StoreError::Partial(errs));
            }
            warn!(record_id = %id, "indexed orphan record body");
            report.reindexed_bodies += 1;
        }

        for id in self.backend.smembers(&self.keys.posts()).await? {
            let record = match self.get(&id).await {
                Ok(record) => record,
                Err(StoreError::NotFound(_)) => {
                    self.backend.srem(&self.keys.posts(), &id).await?;
                    report.dropped_ids += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let label = &record.scheduled_time;
            if !self.backend.sismember(&self.keys.time(label), &id).await? {
                self.backend.sadd(&self.keys.time(label), &id).await?;
                report.restored_bucket_entries += 1;
            }
            if !self.backend.sismember(&self.keys.times(), label.as_str()).await? {
                self.backend.sadd(&self.keys.times(), label.as_str()).await?;
                report.restored_labels += 1;
            }
        }

        for raw in self.backend.smembers(&self.keys.times()).await? {
            let Ok(label) = raw.parse::<ScheduleLabel>() else {
                self.backend.srem(&self.keys.times(), &raw).await?;
                report.pruned_labels += 1;
                continue;
            };
            let bucket = self.keys.time(&label);
            for id in self.backend.smembers(&bucket).await? {
                let stale = match self.get(&id).await {
                    Ok(record) => record.scheduled_time != label,
                    Err(StoreError::NotFound(_)) => true,
                    Err(e) => return Err(e),
                };
                if stale {
                    self.backend.srem(&bucket, &id).await?;
                    report.pruned_bucket_entries += 1;
                }
            }
            if self.backend.scard(&bucket).await? == 0 {
                self.backend.srem(&self.keys.times(), label.as_str()).await?;
                report.pruned_labels += 1;
            }
        }

        if report.is_clean() {
            debug!("reconcile found no drift");
        } else {
            warn!(%report, "reconcile repaired index drift");
        }
        Ok(report)
    }

    /// Add `record` to `posts`, `times` and its bucket and link its origins.
    /// Every write is idempotent; failures are collected, not short-circuited.
    async fn index(&self, record: &Record) -> Vec<String> {
        let mut errs = Vec::new();
        let label = &record.scheduled_time;
        collect(&mut errs, self.backend.sadd(&self.keys.posts(), &record.id).await);
        collect(&mut errs, self.backend.sadd(&self.keys.times(), label.as_str()).await);
        collect(&mut errs, self.backend.sadd(&self.keys.time(label), &record.id).await);
        for link in record.all_origins() {
            collect(&mut errs, self.link_origin(link, &record.id).await);
        }
        errs
    }

    async fn write_body(&self, record: &Record) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        self.backend.set(&self.keys.post(&record.id), &body, None).await
    }

    /// Drop `label` from `times` once its bucket is empty.
    async fn prune_label(&self, label: &ScheduleLabel) -> Result<(), StoreError> {
        if self.backend.scard(&self.keys.time(label)).await? == 0 {
            self.backend.srem(&self.keys.times(), label.as_str()).await?;
        }
        Ok(())
    }
}

fn collect(errs: &mut Vec<String>, result: Result<(), StoreError>) {
    if let Err(e) = result {
        errs.push(e.to_string());
    }
}

fn partial(id: &str, op: &str, errs: Vec<String>) -> Result<(), StoreError> {
    if errs.is_empty() {
        Ok(())
    } else {
        warn!(record_id = %id, op, errors = errs.len(), "index write failed, run reconcile");
        Err(StoreError::Partial(errs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn store() -> (Arc<MemoryBackend>, RecordStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::new(backend.clone(), "test:1");
        (backend, store)
    }

    fn record(id: &str, label: &str, origin: (i64, i64)) -> Record {
        Record {
            id: id.to_string(),
            scheduled_time: label.parse().unwrap(),
            origins: vec![MessageLink::new(origin.0, origin.1)],
            as_sources: false,
            text: String::new(),
            protected: false,
            media: Vec::new(),
            comment: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_empty_id() {
        let (_, store) = store();
        let err = store.create(&record("", "NA", (1, 1))).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn create_twice_migrates_instead_of_duplicating() {
        let (backend, store) = store();
        store.create(&record("a", "09:00", (1, 1))).await.unwrap();
        store.create(&record("a", "10:00", (1, 1))).await.unwrap();

        assert_eq!(backend.scard("test:1:time:09:00").await.unwrap(), 0);
        assert_eq!(backend.scard("test:1:time:10:00").await.unwrap(), 1);
        assert!(!backend.sismember("test:1:times", "09:00").await.unwrap());
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let (_, store) = store();
        let err = store.update(&record("ghost", "NA", (1, 1))).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn corrupt_body_is_reported() {
        let (backend, store) = store();
        backend.set("test:1:post:bad", "{not json", None).await.unwrap();
        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn query_prunes_bucket_entry_without_body() {
        let (backend, store) = store();
        backend.sadd("test:1:times", "11:00").await.unwrap();
        backend.sadd("test:1:time:11:00", "orphan").await.unwrap();

        let err = store
            .query_random_due(&ScheduleLabel::At("11:00".into()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(backend.scard("test:1:time:11:00").await.unwrap(), 0);
        assert!(!backend.sismember("test:1:times", "11:00").await.unwrap());
    }

    #[tokio::test]
    async fn query_skips_member_with_other_label() {
        let (backend, store) = store();
        store.create(&record("a", "12:00", (1, 1))).await.unwrap();
        // Leftover of an interrupted migration.
        backend.sadd("test:1:time:13:00", "a").await.unwrap();

        let err = store
            .query_random_due(&ScheduleLabel::At("13:00".into()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let found = store
            .query_random_due(&ScheduleLabel::At("12:00".into()))
            .await
            .unwrap();
        assert_eq!(found.id, "a");
    }

    #[tokio::test]
    async fn summary_display() {
        let (_, store) = store();
        store.create(&record("a", "09:00", (1, 1))).await.unwrap();
        store.create(&record("b", "09:00", (1, 2))).await.unwrap();
        store.create(&record("c", "NA", (1, 3))).await.unwrap();

        let summary = store.summarize().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.to_string(), "--:--  -  1\n09:00  -  2");
        assert_eq!(store.size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn remember_delivery_requires_record() {
        let (_, store) = store();
        assert!(store.remember_delivery("nope", 5).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_of_dangling_id_cleans_posts() {
        let (backend, store) = store();
        backend.sadd("test:1:posts", "ghost").await.unwrap();
        assert!(store.delete("ghost").await.unwrap_err().is_not_found());
        assert!(!backend.sismember("test:1:posts", "ghost").await.unwrap());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (_, store) = store();
        store.create(&record("a", "09:00", (1, 1))).await.unwrap();
        store.create(&record("b", "NA", (1, 2))).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.size().await.unwrap(), 0);
        assert!(store.summarize().await.unwrap().buckets.is_empty());
    }
}

//! Posting loop against the in-memory store and a recording transport.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chanpost_core::{
    Destination, MediaKind, MediaRef, MessageLink, Record, ScheduleLabel, Transport,
    TransportError,
};
use chanpost_scheduler::{LoopState, PostOutcome, PostingLoop};
use chanpost_store::{MemoryBackend, RecordStore};

const CHANNEL: i64 = -1001;
const OPERATOR: i64 = 42;

// ============================================================================
// Recording transport
// ============================================================================

#[derive(Default)]
struct RecordingTransport {
    next_id: AtomicI64,
    fail_ids: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<(String, Destination)>>,
    texts: Mutex<Vec<(i64, String, Option<i64>)>>,
    notices: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn failing(ids: &[&str]) -> Self {
        let t = Self::default();
        t.fail_ids
            .lock()
            .unwrap()
            .extend(ids.iter().map(|s| s.to_string()));
        t
    }

    fn delivered_ids(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(
        &self,
        record: &Record,
        destination: Destination,
    ) -> Result<Vec<MessageLink>, TransportError> {
        if self.fail_ids.lock().unwrap().contains(&record.id) {
            return Err(TransportError::Api("Bad Request: wrong file identifier".into()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((record.id.clone(), destination));
        let parts = record.media.len().max(1);
        Ok((0..parts)
            .map(|_| {
                let id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst);
                MessageLink::new(destination.chat_id, id)
            })
            .collect())
    }

    async fn download_to_local(&self, file_id: &str) -> Result<PathBuf, TransportError> {
        Ok(PathBuf::from(file_id))
    }

    async fn delete_message(&self, _link: MessageLink) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<MessageLink, TransportError> {
        self.texts
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), reply_to));
        Ok(MessageLink::new(chat_id, 1))
    }

    async fn notify_operators(&self, text: &str) {
        self.notices.lock().unwrap().push(text.to_string());
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn label(s: &str) -> ScheduleLabel {
    s.parse().unwrap()
}

fn record(id: &str, time: &str, origin_msg: i64) -> Record {
    Record {
        id: id.to_string(),
        scheduled_time: label(time),
        origins: vec![MessageLink::new(OPERATOR, origin_msg)],
        as_sources: false,
        text: "caption".into(),
        protected: false,
        media: vec![
            MediaRef {
                kind: MediaKind::Photo,
                file_id: format!("{id}-a"),
            },
            MediaRef {
                kind: MediaKind::Video,
                file_id: format!("{id}-b"),
            },
        ],
        comment: None,
    }
}

fn with_comment(mut parent: Record) -> Record {
    let mut comment = record(&format!("{}-c", parent.id), "NA", 900);
    comment.as_sources = true;
    parent.comment = Some(Box::new(comment));
    parent
}

fn setup(
    transport: RecordingTransport,
    defaults: &[&str],
) -> (Arc<RecordStore>, Arc<RecordingTransport>, PostingLoop) {
    let store = Arc::new(RecordStore::new(Arc::new(MemoryBackend::new()), "test:7"));
    let transport = Arc::new(transport);
    let posting = PostingLoop::new(
        store.clone(),
        transport.clone(),
        CHANNEL,
        defaults.iter().map(|d| label(d)).collect(),
    );
    (store, transport, posting)
}

// ============================================================================
// Tick
// ============================================================================

#[tokio::test]
async fn tick_posts_and_removes_record_without_comment() {
    let (store, transport, posting) = setup(RecordingTransport::default(), &["09:00"]);
    store.create(&record("a", "09:00", 1)).await.unwrap();

    let report = posting.tick(&label("09:00")).await;
    assert!(report.is_ok(), "{report}");
    assert_eq!(report.posted, Some(("a".into(), PostOutcome::Deleted)));
    assert_eq!(transport.delivered_ids(), vec!["a"]);
    assert_eq!(
        transport.delivered.lock().unwrap()[0].1,
        Destination::chat(CHANNEL)
    );
    assert!(store.get("a").await.unwrap_err().is_not_found());
    assert_eq!(posting.state(), LoopState::Idle);
}

#[tokio::test]
async fn tick_with_comment_waits_for_reply() {
    let (store, _, posting) = setup(RecordingTransport::default(), &["09:00"]);
    store.create(&with_comment(record("a", "09:00", 1))).await.unwrap();

    let report = posting.tick(&label("09:00")).await;
    let Some((id, PostOutcome::AwaitingReply { delivery_id })) = report.posted else {
        panic!("expected pending reply, got {:?}", report.posted);
    };
    assert_eq!(id, "a");
    assert!(store.get("a").await.is_ok());
    assert_eq!(store.resolve_by_delivery(delivery_id).await.unwrap().id, "a");
}

#[tokio::test]
async fn default_label_falls_back_to_unscheduled_once() {
    let (store, transport, posting) = setup(RecordingTransport::default(), &["09:00"]);
    store.create(&record("loose", "NA", 1)).await.unwrap();

    let report = posting.tick(&label("09:00")).await;
    assert_eq!(report.attempted, vec![label("09:00"), ScheduleLabel::Unscheduled]);
    assert_eq!(report.posted_id(), Some("loose"));
    assert_eq!(transport.delivered_ids(), vec!["loose"]);
}

#[tokio::test]
async fn non_default_label_does_not_fall_back() {
    let (store, transport, posting) = setup(RecordingTransport::default(), &["09:00"]);
    store.create(&record("loose", "NA", 1)).await.unwrap();

    let report = posting.tick(&label("09:01")).await;
    assert!(report.is_ok());
    assert_eq!(report.attempted, vec![label("09:01")]);
    assert!(report.posted.is_none());
    assert!(transport.delivered_ids().is_empty());
}

#[tokio::test]
async fn empty_default_and_unscheduled_is_quiet() {
    let (_, transport, posting) = setup(RecordingTransport::default(), &["09:00"]);
    let report = posting.tick(&label("09:00")).await;
    assert!(report.is_ok());
    assert_eq!(report.attempted.len(), 2);
    assert!(transport.notices.lock().unwrap().is_empty());
}

#[tokio::test]
async fn scheduled_record_is_preferred_over_unscheduled() {
    let (store, transport, posting) = setup(RecordingTransport::default(), &["09:00"]);
    store.create(&record("pinned", "09:00", 1)).await.unwrap();
    store.create(&record("loose", "NA", 2)).await.unwrap();

    posting.tick(&label("09:00")).await;
    assert_eq!(transport.delivered_ids(), vec!["pinned"]);
    assert!(store.get("loose").await.is_ok());
}

#[tokio::test]
async fn failed_delivery_keeps_record_and_replies_to_origin() {
    let (store, transport, posting) = setup(RecordingTransport::failing(&["bad"]), &["09:00"]);
    store.create(&record("bad", "09:00", 17)).await.unwrap();

    let report = posting.tick(&label("09:00")).await;
    assert!(!report.is_ok());
    assert!(report.to_string().contains("bad"));
    assert!(report.posted.is_none());
    assert!(store.get("bad").await.is_ok());

    let texts = transport.texts.lock().unwrap();
    assert_eq!(texts.len(), 1);
    let (chat, text, reply_to) = &texts[0];
    assert_eq!(*chat, OPERATOR);
    assert_eq!(*reply_to, Some(17));
    assert!(text.starts_with("an error while trying to post"));
}

// ============================================================================
// Manual posting and reply completion
// ============================================================================

#[tokio::test]
async fn post_now_uses_same_completion_rules() {
    let (store, _, posting) = setup(RecordingTransport::default(), &[]);
    let plain = record("plain", "12:00", 1);
    store.create(&plain).await.unwrap();

    assert_eq!(posting.post_now(&plain).await.unwrap(), PostOutcome::Deleted);
    assert!(store.get("plain").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn post_random_on_empty_bucket_is_not_found() {
    let (_, _, posting) = setup(RecordingTransport::default(), &[]);
    let err = posting
        .post_random(&ScheduleLabel::Unscheduled)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn echo_completes_pending_record() {
    let (store, transport, posting) = setup(RecordingTransport::default(), &["09:00"]);
    store
        .create(&with_comment(record("a", "09:00", 1)))
        .await
        .unwrap();
    let report = posting.tick(&label("09:00")).await;
    let Some((_, PostOutcome::AwaitingReply { delivery_id })) = report.posted else {
        panic!("record should await its reply");
    };

    let echo = MessageLink::new(-2002, 55);
    let done = posting.complete_with_reply(delivery_id, echo).await.unwrap();
    assert_eq!(done.as_deref(), Some("a"));

    let delivered = transport.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].0, "a-c");
    assert_eq!(delivered[1].1, Destination::reply(echo));
    assert!(store.get("a").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn unknown_echo_is_ignored() {
    let (_, transport, posting) = setup(RecordingTransport::default(), &[]);
    let done = posting
        .complete_with_reply(31337, MessageLink::new(-2002, 1))
        .await
        .unwrap();
    assert!(done.is_none());
    assert!(transport.delivered_ids().is_empty());
}

#[tokio::test]
async fn failed_comment_still_completes_and_notifies() {
    let (store, transport, posting) =
        setup(RecordingTransport::failing(&["a-c"]), &["09:00"]);
    store
        .create(&with_comment(record("a", "09:00", 1)))
        .await
        .unwrap();
    let report = posting.tick(&label("09:00")).await;
    let Some((_, PostOutcome::AwaitingReply { delivery_id })) = report.posted else {
        panic!("record should await its reply");
    };

    let done = posting
        .complete_with_reply(delivery_id, MessageLink::new(-2002, 9))
        .await
        .unwrap();
    assert_eq!(done.as_deref(), Some("a"));
    assert_eq!(transport.notices.lock().unwrap().len(), 1);
    assert!(store.get("a").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn concurrent_ticks_never_post_the_same_record_twice() {
    let (store, transport, posting) = setup(RecordingTransport::default(), &["09:00"]);
    store.create(&record("only", "09:00", 1)).await.unwrap();
    let posting = Arc::new(posting);

    let a = tokio::spawn({
        let p = posting.clone();
        async move { p.tick(&label("09:00")).await }
    });
    let b = tokio::spawn({
        let p = posting.clone();
        async move { p.tick(&label("09:00")).await }
    });
    let (ra, rb) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(transport.delivered_ids(), vec!["only"]);
    let posted = [ra.posted_id(), rb.posted_id()]
        .into_iter()
        .flatten()
        .count();
    assert_eq!(posted, 1);
}

#[tokio::test]
async fn default_labels_can_be_replaced() {
    let (_, _, posting) = setup(RecordingTransport::default(), &["09:00"]);
    assert!(posting.is_default(&label("09:00")));
    posting.set_default_labels(vec![label("10:30")]);
    assert!(!posting.is_default(&label("09:00")));
    assert_eq!(posting.default_labels(), vec![label("10:30")]);
}

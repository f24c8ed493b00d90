//! Planning how a record is sent: which Bot API method, which items, which
//! files must be fetched and re-uploaded first.

use chanpost_core::{MediaKind, Record};

/// Most items a single `sendMediaGroup` call accepts.
pub const MAX_GROUP_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Photo,
    Video,
    Document,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Photo => "photo",
            ItemKind::Video => "video",
            ItemKind::Document => "document",
        }
    }

    /// Single-item send method.
    pub fn method(self) -> &'static str {
        match self {
            ItemKind::Photo => "sendPhoto",
            ItemKind::Video => "sendVideo",
            ItemKind::Document => "sendDocument",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// Reuse a file already held by Telegram.
    FileId(String),
    /// Download the file and upload it again, so a document is shown as media.
    Reupload(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem {
    pub kind: ItemKind,
    pub source: ItemSource,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPlan {
    Text(String),
    /// Batches of at most [`MAX_GROUP_SIZE`] items, sent in order.
    Media(Vec<Vec<PlannedItem>>),
}

/// Decide how `record` is rendered. `None` when there is nothing to send
/// (a sources-mode record without documents).
pub fn plan(record: &Record) -> Option<DeliveryPlan> {
    if record.media.is_empty() {
        return Some(DeliveryPlan::Text(record.text.clone()));
    }

    let mut items: Vec<PlannedItem> = record
        .media
        .iter()
        .filter_map(|m| {
            let id = m.file_id.clone();
            let (kind, source) = match (record.as_sources, m.kind) {
                (true, MediaKind::DocPhoto | MediaKind::DocVideo) => {
                    (ItemKind::Document, ItemSource::FileId(id))
                }
                (true, _) => return None,
                (false, MediaKind::Photo) => (ItemKind::Photo, ItemSource::FileId(id)),
                (false, MediaKind::Video) => (ItemKind::Video, ItemSource::FileId(id)),
                (false, MediaKind::DocPhoto) => (ItemKind::Photo, ItemSource::Reupload(id)),
                (false, MediaKind::DocVideo) => (ItemKind::Video, ItemSource::Reupload(id)),
            };
            Some(PlannedItem {
                kind,
                source,
                caption: None,
            })
        })
        .collect();

    let last = items.last_mut()?;
    if !record.text.is_empty() {
        last.caption = Some(record.text.clone());
    }

    let batches = items
        .chunks(MAX_GROUP_SIZE)
        .map(|chunk| chunk.to_vec())
        .collect();
    Some(DeliveryPlan::Media(batches))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanpost_core::{MediaRef, ScheduleLabel};

    fn record(kinds: &[MediaKind], as_sources: bool) -> Record {
        Record {
            id: "r".into(),
            scheduled_time: ScheduleLabel::Unscheduled,
            origins: Vec::new(),
            as_sources,
            text: "caption".into(),
            protected: false,
            media: kinds
                .iter()
                .enumerate()
                .map(|(i, k)| MediaRef {
                    kind: *k,
                    file_id: format!("f{i}"),
                })
                .collect(),
            comment: None,
        }
    }

    fn media(plan: Option<DeliveryPlan>) -> Vec<Vec<PlannedItem>> {
        match plan {
            Some(DeliveryPlan::Media(batches)) => batches,
            other => panic!("expected media plan, got {other:?}"),
        }
    }

    #[test]
    fn text_only_record() {
        assert_eq!(
            plan(&record(&[], false)),
            Some(DeliveryPlan::Text("caption".into()))
        );
    }

    #[test]
    fn documents_are_reuploaded_as_media() {
        let batches = media(plan(&record(
            &[MediaKind::Photo, MediaKind::DocPhoto, MediaKind::DocVideo],
            false,
        )));
        assert_eq!(batches.len(), 1);
        let items = &batches[0];
        assert_eq!(items[0].source, ItemSource::FileId("f0".into()));
        assert_eq!(items[1].kind, ItemKind::Photo);
        assert_eq!(items[1].source, ItemSource::Reupload("f1".into()));
        assert_eq!(items[2].kind, ItemKind::Video);
        assert_eq!(items[0].caption, None);
        assert_eq!(items[2].caption.as_deref(), Some("caption"));
    }

    #[test]
    fn sources_mode_sends_documents_only() {
        let batches = media(plan(&record(
            &[MediaKind::Photo, MediaKind::DocPhoto, MediaKind::DocVideo],
            true,
        )));
        let items = &batches[0];
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.kind == ItemKind::Document));
        assert!(items.iter().all(|i| matches!(i.source, ItemSource::FileId(_))));
        assert_eq!(items[1].caption.as_deref(), Some("caption"));
    }

    #[test]
    fn sources_mode_without_documents_is_empty() {
        assert_eq!(plan(&record(&[MediaKind::Photo], true)), None);
    }

    #[test]
    fn large_records_are_batched() {
        let batches = media(plan(&record(&[MediaKind::Photo; 13], false)));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[1].len(), 3);
        assert!(batches[0].iter().all(|i| i.caption.is_none()));
        assert_eq!(batches[1][2].caption.as_deref(), Some("caption"));
    }
}

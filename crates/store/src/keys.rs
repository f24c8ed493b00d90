//! Persisted key layout. Stable across releases: existing databases depend on it.

use chanpost_core::{MessageLink, ScheduleLabel};

/// Namespace-prefixed, colon-delimited key builder.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, parts: &[&str]) -> String {
        let mut key = self.prefix.clone();
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        key
    }

    pub fn posts(&self) -> String {
        self.key(&["posts"])
    }

    pub fn times(&self) -> String {
        self.key(&["times"])
    }

    pub fn time(&self, label: &ScheduleLabel) -> String {
        self.key(&["time", label.as_str()])
    }

    pub fn post(&self, id: &str) -> String {
        self.key(&["post", id])
    }

    pub fn origin(&self, link: &MessageLink) -> String {
        self.key(&[
            "admin-chat",
            &link.chat_id.to_string(),
            "msg-id",
            &link.message_id.to_string(),
        ])
    }

    pub fn recent(&self, delivery_id: i64) -> String {
        self.key(&["recent", &delivery_id.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_stable() {
        let keys = KeySpace::new("channelbot:42");
        assert_eq!(keys.posts(), "channelbot:42:posts");
        assert_eq!(keys.times(), "channelbot:42:times");
        assert_eq!(keys.time(&ScheduleLabel::Unscheduled), "channelbot:42:time:NA");
        assert_eq!(
            keys.time(&ScheduleLabel::At("09:30".into())),
            "channelbot:42:time:09:30"
        );
        assert_eq!(keys.post("-100_5"), "channelbot:42:post:-100_5");
        assert_eq!(
            keys.origin(&MessageLink::new(11, 22)),
            "channelbot:42:admin-chat:11:msg-id:22"
        );
        assert_eq!(keys.recent(301), "channelbot:42:recent:301");
    }
}

use super::atomic::{append_json_line, read_json_lines};
use super::ProjectStore;
use crate::error::Result;
use crate::types::Message;
use chrono::{DateTime, Utc};
use std::fs;

impl ProjectStore {
    /// Append a message to its writer's log. Messages are totally
    /// ordered per writer; cross-writer order is by timestamp only.
    pub fn post_message(&self, message: &Message) -> Result<()> {
        let path = self.layout().message_log_path(&message.from);
        append_json_line(&path, message)
    }

    /// Messages visible to `recipient` (addressed to it or broadcast),
    /// strictly newer than `since`, ascending by (timestamp, id) so
    /// ties are stable.
    pub fn read_messages(
        &self,
        recipient: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let dir = self.layout().messages_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut messages: Vec<Message> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                for message in read_json_lines::<Message>(&path)? {
                    let newer = since.is_none_or(|cutoff| message.timestamp > cutoff);
                    if newer && message.visible_to(recipient) {
                        messages.push(message);
                    }
                }
            }
        }
        messages.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        Ok(messages)
    }

    /// All broadcast messages of every writer, ascending. Used by the
    /// status command and tests.
    pub fn read_broadcasts(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Message>> {
        Ok(self
            .read_messages("", since)?
            .into_iter()
            .filter(Message::is_broadcast)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::ProjectStore;
    use crate::types::{Message, MessageType, RunState, WindDownReason};
    use chrono::{Duration, Utc};

    fn store() -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = RunState::new("feature", "branch", "abc", 5, 3);
        let store = ProjectStore::init(dir.path(), &state).expect("init");
        (dir, store)
    }

    #[test]
    fn recipients_see_broadcasts_and_their_own_mail_only() {
        let (_dir, store) = store();
        store
            .post_message(&Message::new(
                "engine",
                None,
                MessageType::Broadcast,
                "hello all",
            ))
            .expect("post");
        store
            .post_message(&Message::new(
                "session-001",
                Some("session-002".to_string()),
                MessageType::Answer,
                "for two",
            ))
            .expect("post");

        let for_two = store.read_messages("session-002", None).expect("read");
        assert_eq!(for_two.len(), 2);

        let for_three = store.read_messages("session-003", None).expect("read");
        assert_eq!(for_three.len(), 1);
        assert_eq!(for_three[0].content, "hello all");
    }

    #[test]
    fn since_filter_is_strictly_newer() {
        let (_dir, store) = store();
        let mut old = Message::new("engine", None, MessageType::Status, "old");
        old.timestamp = Utc::now() - Duration::minutes(10);
        store.post_message(&old).expect("post");
        let new = Message::new("engine", None, MessageType::Status, "new");
        store.post_message(&new).expect("post");

        let cutoff = Utc::now() - Duration::minutes(5);
        let fresh = store.read_messages("session-001", Some(cutoff)).expect("read");
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].content, "new");

        let at_own_timestamp = store
            .read_messages("session-001", Some(new.timestamp))
            .expect("read");
        assert!(at_own_timestamp.is_empty());
    }

    #[test]
    fn messages_sort_ascending_across_writers() {
        let (_dir, store) = store();
        let base = Utc::now();
        for (writer, offset, text) in [
            ("session-002", 2, "third"),
            ("session-001", 0, "first"),
            ("engine", 1, "second"),
        ] {
            let mut message = Message::new(writer, None, MessageType::Status, text);
            message.timestamp = base + Duration::seconds(offset);
            store.post_message(&message).expect("post");
        }

        let all = store.read_messages("session-009", None).expect("read");
        assert_eq!(
            all.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn wind_down_broadcast_reaches_every_session() {
        let (_dir, store) = store();
        store
            .post_message(&Message::wind_down(
                "engine",
                WindDownReason::UsageLimit,
                Some(Utc::now() + Duration::hours(5)),
            ))
            .expect("post");

        let seen = store.read_messages("session-007", None).expect("read");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message_type, MessageType::WindDown);
        assert_eq!(
            seen[0].metadata.as_ref().expect("metadata")["reason"],
            "usage_limit"
        );
    }
}

//! Bounded conversation log for one session.
//!
//! The log is append-only and keeps at most `max_length` messages; once full,
//! every append drops exactly one message from the front.

use std::collections::VecDeque;
use std::sync::Arc;

use shared_types::{Message, MessageRole};

#[derive(Debug, Clone)]
pub struct ConversationLog {
    messages: VecDeque<Message>,
    max_length: usize,
    evicted: u64,
}

impl ConversationLog {
    pub fn new(max_length: usize) -> Self {
        let max_length = if max_length == 0 {
            tracing::warn!("ConversationLog max_length of 0 clamped to 1");
            1
        } else {
            max_length
        };
        Self {
            messages: VecDeque::with_capacity(max_length.min(256)),
            max_length,
            evicted: 0,
        }
    }

    /// Append a message, returning `true` when the oldest entry was evicted.
    pub fn append(&mut self, message: Message) -> bool {
        self.messages.push_back(message);
        if self.messages.len() > self.max_length {
            self.messages.pop_front();
            self.evicted += 1;
            return true;
        }
        false
    }

    /// Immutable copy of the current log, safe to hand to other tasks.
    pub fn snapshot(&self) -> Arc<[Message]> {
        self.messages.iter().cloned().collect()
    }

    /// Actor name of the newest message with `role`, skipping other roles.
    pub fn last_actor_of_role(&self, role: MessageRole) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == role)
            .and_then(|message| message.actor_name.clone())
    }

    /// Actor name of the newest actor-attributed message of any role.
    pub fn last_actor(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find_map(|message| message.actor_name.clone())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Total number of messages dropped from the front since construction.
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ActorRole;

    fn contents(log: &ConversationLog) -> Vec<String> {
        log.iter().map(|m| m.content.clone()).collect()
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut log = ConversationLog::new(3);
        assert!(!log.append(Message::user("A")));
        assert!(!log.append(Message::user("B")));
        assert!(!log.append(Message::user("C")));
        assert!(log.append(Message::user("D")));

        assert_eq!(contents(&log), vec!["B", "C", "D"]);
        assert_eq!(log.evicted_count(), 1);
    }

    #[test]
    fn test_length_never_exceeds_max() {
        let mut log = ConversationLog::new(5);
        for i in 0..50 {
            log.append(Message::user(format!("m{i}")));
            assert!(log.len() <= log.max_length());
        }
        assert_eq!(log.len(), 5);
        assert_eq!(contents(&log).first().map(String::as_str), Some("m45"));
    }

    #[test]
    fn test_zero_max_length_is_clamped() {
        let mut log = ConversationLog::new(0);
        log.append(Message::user("first"));
        assert!(log.append(Message::user("second")));
        assert_eq!(contents(&log), vec!["second"]);
    }

    #[test]
    fn test_last_actor_of_role_skips_other_roles() {
        let mut log = ConversationLog::new(10);
        log.append(Message::user("start"));
        log.append(Message::actor(ActorRole::Manager, "lead", "plan"));
        log.append(Message::actor(ActorRole::Worker, "coder", "code"));
        log.append(Message::system("note"));

        assert_eq!(
            log.last_actor_of_role(MessageRole::Manager).as_deref(),
            Some("lead")
        );
        assert_eq!(
            log.last_actor_of_role(MessageRole::Worker).as_deref(),
            Some("coder")
        );
        assert_eq!(log.last_actor_of_role(MessageRole::User), None);
        assert_eq!(log.last_actor().as_deref(), Some("coder"));
    }

    #[test]
    fn test_snapshot_is_detached_from_later_appends() {
        let mut log = ConversationLog::new(4);
        log.append(Message::user("one"));
        let snapshot = log.snapshot();
        log.append(Message::user("two"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.len(), 2);
    }
}

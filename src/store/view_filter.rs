//! Filtered view over a store snapshot
//!
//! Two predicates, each of which can be switched off independently:
//!
//! - **Publisher**: the message topic equals the selected topic exactly.
//! - **Text**: the query is a case-insensitive substring of the topic or of the
//!   payload decoded as text.
//!
//! A message is visible when every active predicate accepts it. The view is
//! recomputed in full from a snapshot; nothing here mutates the store.

use std::sync::Arc;

use super::message::{Message, SequenceId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    text_query: String,
    // lower-cased once, compared against lower-cased haystacks
    needle: String,
    selected_publisher: Option<String>,
}

impl FilterState {
    /// An empty query or an empty publisher name disables that predicate
    pub fn new(text_query: impl Into<String>, selected_publisher: Option<String>) -> Self {
        let text_query = text_query.into();
        Self {
            needle: text_query.to_lowercase(),
            text_query,
            selected_publisher: selected_publisher.filter(|topic| !topic.is_empty()),
        }
    }

    pub fn text_query(&self) -> &str {
        &self.text_query
    }

    pub fn selected_publisher(&self) -> Option<&str> {
        self.selected_publisher.as_deref()
    }

    pub fn is_active(&self) -> bool {
        !self.text_query.is_empty() || self.selected_publisher.is_some()
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.matches_publisher(message) && self.matches_text(message)
    }

    fn matches_publisher(&self, message: &Message) -> bool {
        match &self.selected_publisher {
            Some(topic) => message.topic() == topic,
            None => true,
        }
    }

    fn matches_text(&self, message: &Message) -> bool {
        if self.needle.is_empty() {
            return true;
        }
        message.topic().to_lowercase().contains(&self.needle)
            || message
                .payload_text()
                .to_lowercase()
                .contains(&self.needle)
    }
}

/// Sequence ids of the visible messages, in snapshot order
pub fn visible(snapshot: &[Arc<Message>], filter: &FilterState) -> Vec<SequenceId> {
    snapshot
        .iter()
        .filter(|msg| filter.matches(msg))
        .map(|msg| msg.sequence_id())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::message::Qos;
    use chrono::Local;

    fn snapshot(entries: &[(&str, &str)]) -> Vec<Arc<Message>> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (topic, payload))| {
                Arc::new(Message::new(
                    i as SequenceId + 1,
                    Local::now(),
                    topic.to_string(),
                    payload.as_bytes().to_vec(),
                    Qos::AtMostOnce,
                    false,
                ))
            })
            .collect()
    }

    fn sample() -> Vec<Arc<Message>> {
        snapshot(&[
            ("sensors/temp", "21.0"),
            ("sensors/hum", "40"),
            ("sensors/temp", "23.5"),
            ("Kitchen/Light", "ON"),
            ("sensors/temp", r#"{"status":"Online"}"#),
        ])
    }

    #[test]
    fn inactive_filter_returns_everything_in_order() {
        let snap = sample();
        let filter = FilterState::default();
        assert!(!filter.is_active());
        assert_eq!(visible(&snap, &filter), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn publisher_filter_matches_exact_topic() {
        let snap = sample();
        let filter = FilterState::new("", Some("sensors/temp".into()));
        assert_eq!(visible(&snap, &filter), [1, 3, 5]);

        let filter = FilterState::new("", Some("sensors".into()));
        assert!(visible(&snap, &filter).is_empty());
    }

    #[test]
    fn text_filter_is_case_insensitive_over_topic_and_payload() {
        let snap = sample();
        assert_eq!(visible(&snap, &FilterState::new("kitchen", None)), [4]);
        assert_eq!(visible(&snap, &FilterState::new("ONLINE", None)), [5]);
        assert_eq!(visible(&snap, &FilterState::new("23.5", None)), [3]);
        assert!(visible(&snap, &FilterState::new("99.9", None)).is_empty());
    }

    #[test]
    fn predicates_compose_with_and() {
        let snap = sample();
        let filter = FilterState::new("online", Some("sensors/temp".into()));
        assert_eq!(visible(&snap, &filter), [5]);

        let filter = FilterState::new("kitchen", Some("sensors/temp".into()));
        assert!(visible(&snap, &filter).is_empty());
    }

    #[test]
    fn composition_does_not_depend_on_evaluation_order() {
        let snap = sample();
        let filter = FilterState::new("2", Some("sensors/temp".into()));
        let text_first: Vec<_> = snap
            .iter()
            .filter(|m| filter.matches_text(m) && filter.matches_publisher(m))
            .map(|m| m.sequence_id())
            .collect();
        assert_eq!(visible(&snap, &filter), text_first);
    }

    #[test]
    fn unseen_publisher_yields_empty_view() {
        let snap = sample();
        let filter = FilterState::new("", Some("no/such/topic".into()));
        assert!(visible(&snap, &filter).is_empty());
    }

    #[test]
    fn empty_publisher_name_disables_the_predicate() {
        let filter = FilterState::new("", Some(String::new()));
        assert_eq!(filter.selected_publisher(), None);
        assert!(!filter.is_active());
    }
}

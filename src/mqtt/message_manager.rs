use tokio::sync::mpsc;
use tracing::debug;

use super::error::TransportError;
use crate::store::{Message, Qos};

/// Requests from consumers to the transport task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Subscribe {
        topic: String,
        qos: Qos,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: Qos,
        retain: bool,
    },
    Disconnect,
}

/// Cloneable sender side of the transport task
#[derive(Debug, Clone)]
pub struct TransportHandle {
    commands: mpsc::Sender<TransportCommand>,
}

impl TransportHandle {
    pub fn new(commands: mpsc::Sender<TransportCommand>) -> Self {
        Self { commands }
    }

    pub async fn subscribe(&self, topic: impl Into<String>, qos: Qos) -> Result<(), TransportError> {
        let topic = non_empty(topic.into())?;
        self.send(TransportCommand::Subscribe { topic, qos }).await
    }

    pub async fn unsubscribe(&self, topic: impl Into<String>) -> Result<(), TransportError> {
        let topic = non_empty(topic.into())?;
        self.send(TransportCommand::Unsubscribe { topic }).await
    }

    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        let topic = non_empty(topic.into())?;
        self.send(TransportCommand::Publish {
            topic,
            payload: payload.into(),
            qos,
            retain,
        })
        .await
    }

    /// Sends a stored message again with its original topic, payload, QoS and retain flag
    pub async fn republish(&self, message: &Message) -> Result<(), TransportError> {
        self.publish(
            message.topic(),
            message.payload().to_vec(),
            message.qos(),
            message.retain(),
        )
        .await
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.send(TransportCommand::Disconnect).await
    }

    async fn send(&self, command: TransportCommand) -> Result<(), TransportError> {
        debug!("Queueing transport command {:?}", command);
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

fn non_empty(topic: String) -> Result<String, TransportError> {
    let topic = topic.trim().to_string();
    if topic.is_empty() {
        Err(TransportError::EmptyTopic)
    } else {
        Ok(topic)
    }
}

/// Remembered subscriptions, re-sent after every reconnect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionBook {
    entries: Vec<(String, Qos)>,
}

impl SubscriptionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a topic or updates its QoS; first subscription order is kept
    pub fn add(&mut self, topic: &str, qos: Qos) {
        match self.entries.iter_mut().find(|(t, _)| t == topic) {
            Some(entry) => entry.1 = qos,
            None => self.entries.push((topic.to_string(), qos)),
        }
    }

    pub fn remove(&mut self, topic: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| t != topic);
        self.entries.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Qos)> {
        self.entries.iter().map(|(t, q)| (t.as_str(), *q))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DeliveryEvent, IngestionBridge};

    #[test]
    fn book_deduplicates_and_keeps_order() {
        let mut book = SubscriptionBook::new();
        book.add("sensors/#", Qos::AtMostOnce);
        book.add("home/+/light", Qos::AtLeastOnce);
        book.add("sensors/#", Qos::ExactlyOnce);

        let entries: Vec<_> = book.iter().collect();
        assert_eq!(
            entries,
            [("sensors/#", Qos::ExactlyOnce), ("home/+/light", Qos::AtLeastOnce)]
        );

        assert!(book.remove("sensors/#"));
        assert!(!book.remove("sensors/#"));
        assert_eq!(book.len(), 1);
    }

    #[tokio::test]
    async fn empty_topics_never_reach_the_transport() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = TransportHandle::new(tx);

        let err = handle.publish("  ", "x", Qos::AtMostOnce, false).await;
        assert!(matches!(err, Err(TransportError::EmptyTopic)));
        let err = handle.subscribe("", Qos::AtMostOnce).await;
        assert!(matches!(err, Err(TransportError::EmptyTopic)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn republish_preserves_message_fields() {
        let bridge = IngestionBridge::new(4).unwrap();
        let id = bridge
            .on_message_delivered(DeliveryEvent::new("home/door", "open", 2, true))
            .unwrap();
        let message = bridge.get(id).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        TransportHandle::new(tx).republish(&message).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportCommand::Publish {
                topic: "home/door".into(),
                payload: b"open".to_vec(),
                qos: Qos::ExactlyOnce,
                retain: true,
            })
        );
    }

    #[tokio::test]
    async fn closed_transport_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = TransportHandle::new(tx).disconnect().await;
        assert!(matches!(err, Err(TransportError::ChannelClosed)));
    }
}

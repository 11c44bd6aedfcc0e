//! Error definitions for the MQTT transport

use thiserror::Error;

/// Errors surfaced by [`TransportHandle`](super::message_manager::TransportHandle)
#[derive(Debug, Error)]
pub enum TransportError {
    /// Publishing and subscribing need a topic
    #[error("Topic cannot be empty")]
    EmptyTopic,

    /// QoS outside 0..=2 in a subscription
    #[error("Invalid QoS level {qos} for topic '{topic}'")]
    InvalidQos { topic: String, qos: u8 },

    /// The transport task has stopped
    #[error("Transport channel closed")]
    ChannelClosed,

    /// The rumqttc client refused the request
    #[error("Client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

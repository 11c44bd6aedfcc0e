//! # MQTT Transport Module
//!
//! Connects the monitor to a broker. This module owns everything that speaks the wire
//! protocol (through rumqttc) and nothing that stores or filters messages: inbound
//! PUBLISH packets are turned into [`DeliveryEvent`](crate::store::DeliveryEvent)s and
//! handed straight to the [`IngestionBridge`](crate::store::IngestionBridge).
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and subscription entries
//! ├── message_manager.rs  - Command channel, transport handle, subscription book
//! ├── mqtt_handler.rs     - Connection state machine and event loop task
//! └── error.rs            - Transport errors
//! ```
//!
//! ## Behaviour
//!
//! - Subscriptions are remembered and re-sent after every successful CONNACK.
//! - Subscribing or unsubscribing while disconnected only updates the book.
//! - Publishing while disconnected is refused and reported as a notice.
//! - Poll errors are reported as `ConnectionState::Error`, followed by a short pause and
//!   a reconnect attempt.

pub mod config;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::{BrokerSettings, Subscription};
pub use error::TransportError;
pub use message_manager::{SubscriptionBook, TransportCommand, TransportHandle};
pub use mqtt_handler::{LinkStatus, MqttHandle};

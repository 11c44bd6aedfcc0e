//! Error definitions for the message store and the ingestion path

use thiserror::Error;

use super::message::SequenceId;

/// Errors raised by the message store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store was configured without room for a single message
    #[error("Store capacity must be greater than zero")]
    ZeroCapacity,

    /// Messages need a topic to be indexed by
    #[error("Topic must not be empty")]
    EmptyTopic,

    /// The message was evicted, cleared or never existed
    #[error("Message {0} not found")]
    NotFound(SequenceId),
}

/// Reasons a delivery event from the transport is dropped
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Topic is not valid UTF-8: {0}")]
    InvalidTopic(#[from] std::string::FromUtf8Error),

    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),

    /// Passed the transport checks but was refused by the store
    #[error("Store rejected message: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_refusal_keeps_its_reason() {
        let err = DeliveryError::from(StoreError::NotFound(9));
        assert_eq!(err, DeliveryError::Store(StoreError::NotFound(9)));
        assert_eq!(err.to_string(), "Store rejected message: Message 9 not found");
    }
}

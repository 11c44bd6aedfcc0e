//! # Message Store Module
//!
//! The ingestion, retention and filtering engine behind the monitor. Everything the
//! transport receives ends up here, and everything a consumer renders is read from
//! here.
//!
//! ## Module Architecture
//!
//! ```text
//! store/
//! ├── message.rs          - Immutable message record and its text renderings
//! ├── message_store.rs    - Bounded FIFO ring buffer with sequence ids
//! ├── publisher_index.rs  - Live per-topic counts and display identities
//! ├── view_filter.rs      - Text and publisher predicates over a snapshot
//! ├── ingestion.rs        - Locking, notification fan-out, consumer API
//! └── error.rs            - Store and delivery errors
//! ```
//!
//! ## Consistency Rules
//!
//! - The store never holds more than its capacity; the oldest message goes first.
//! - The publisher counts always sum to the store size when observed.
//! - Sequence ids only grow, including across clears.
//! - Only [`IngestionBridge`] mutates; consumers get `Arc<Message>` handles.

pub mod error;
pub mod ingestion;
pub mod message;
pub mod message_store;
pub mod publisher_index;
pub mod view_filter;

pub use error::{DeliveryError, StoreError};
pub use ingestion::{
    ConnectionState, DataChange, DeliveryEvent, IngestionBridge, MonitorEvent, MonitorStats,
    MonitorView,
};
pub use message::{ExportRow, LogLine, Message, Qos, SequenceId};
pub use message_store::{InsertOutcome, MessageStore, DEFAULT_CAPACITY};
pub use publisher_index::{DisplayIdentity, PublisherEntry, PublisherIndex, PALETTE_SIZE};
pub use view_filter::{visible, FilterState};

//! Ingestion bridge between the transport task and consumers
//!
//! The transport delivers messages from its own tokio task while consumers read from
//! theirs. [`IngestionBridge`] is the only path that mutates the message store and the
//! publisher index, and it does so under a single write lock so that both always
//! agree whenever anyone else can look at them.
//!
//! ```text
//! Transport task ──DeliveryEvent──► IngestionBridge ──MonitorEvent──► Consumers
//!                                    │  RwLock<MonitorState>
//!                                    │   ├── MessageStore
//!                                    │   └── PublisherIndex
//!                                    └── RwLock<FilterState>
//! ```
//!
//! Notifications are pushed onto unbounded channels while the write lock is still held,
//! which makes the notification order identical to the mutation order. Every
//! subscriber receives every notification exactly once.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::{DeliveryError, StoreError};
use super::message::{ExportRow, Message, Qos, SequenceId};
use super::message_store::MessageStore;
use super::publisher_index::{DisplayIdentity, PublisherEntry, PublisherIndex};
use super::view_filter::{self, FilterState};

/// Raw inbound message as produced by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    pub topic: Vec<u8>,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
    pub received_at: DateTime<Local>,
}

impl DeliveryEvent {
    pub fn new(topic: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>, qos: u8, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            received_at: Local::now(),
        }
    }
}

/// Broker connection lifecycle as reported by the transport
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// One accepted insert and the eviction it caused
#[derive(Debug, Clone)]
pub struct DataChange {
    pub inserted: Arc<Message>,
    pub evicted: Option<Arc<Message>>,
}

impl DataChange {
    pub fn inserted_id(&self) -> SequenceId {
        self.inserted.sequence_id()
    }

    pub fn evicted_id(&self) -> Option<SequenceId> {
        self.evicted.as_ref().map(|msg| msg.sequence_id())
    }
}

/// Notification sent to every subscriber
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    DataChanged(DataChange),
    Cleared { removed: usize },
    ConnectionChanged(ConnectionState),
    /// Non-fatal diagnostic, e.g. a dropped delivery
    Notice(String),
}

/// Store and index as seen by a single read
#[derive(Debug, Clone)]
pub struct MonitorView {
    pub messages: Vec<Arc<Message>>,
    pub publishers: Vec<PublisherEntry>,
}

/// Message counters for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStats {
    pub total: usize,
    pub visible: usize,
    pub filtered: bool,
}

impl fmt::Display for MonitorStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.filtered {
            write!(f, "Messages: {}/{}", self.visible, self.total)
        } else {
            write!(f, "Messages: {}", self.total)
        }
    }
}

#[derive(Debug)]
struct MonitorState {
    store: MessageStore,
    publishers: PublisherIndex,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<MonitorState>,
    filter: RwLock<FilterState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<MonitorEvent>>>,
}

/// Cloneable handle to the shared store, index and filter
#[derive(Debug, Clone)]
pub struct IngestionBridge {
    shared: Arc<Shared>,
}

impl IngestionBridge {
    pub fn new(capacity: usize) -> Result<Self, StoreError> {
        let state = MonitorState {
            store: MessageStore::new(capacity)?,
            publishers: PublisherIndex::new(),
        };
        info!("Ingestion bridge created with capacity {}", capacity);
        Ok(Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                filter: RwLock::new(FilterState::default()),
                subscribers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Registers a consumer for all future notifications
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MonitorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(tx);
        rx
    }

    pub fn on_message_delivered(&self, event: DeliveryEvent) -> Result<SequenceId, DeliveryError> {
        let (topic, qos) = match decode(&event) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping malformed delivery: {}", e);
                self.notify(MonitorEvent::Notice(format!("Dropped message: {}", e)));
                return Err(e);
            }
        };

        let mut state = self.write_state();
        let inserted = state.store.insert(
            topic,
            event.payload,
            qos,
            event.retain,
            event.received_at,
        );
        let outcome = match inserted {
            Ok(outcome) => outcome,
            Err(e) => {
                drop(state);
                let e = DeliveryError::from(e);
                warn!("Dropping delivery: {}", e);
                self.notify(MonitorEvent::Notice(format!("Dropped message: {}", e)));
                return Err(e);
            }
        };

        if let Some(evicted) = &outcome.evicted {
            state.publishers.on_evict(evicted.topic());
        }
        state.publishers.on_insert(outcome.inserted.topic());

        let change = DataChange {
            inserted: outcome.inserted,
            evicted: outcome.evicted,
        };
        let sequence_id = change.inserted_id();
        debug!(
            "Stored message {} on '{}' (evicted: {:?})",
            sequence_id,
            change.inserted.topic(),
            change.evicted_id()
        );
        self.notify(MonitorEvent::DataChanged(change));
        drop(state);

        Ok(sequence_id)
    }

    pub fn on_connection_state_changed(&self, state: ConnectionState) {
        info!("Connection state: {}", state);
        self.notify(MonitorEvent::ConnectionChanged(state));
    }

    /// Surfaces a non-fatal diagnostic to consumers
    pub fn report_notice(&self, notice: impl Into<String>) {
        self.notify(MonitorEvent::Notice(notice.into()));
    }

    /// Empties store and index, returns the number of removed messages
    pub fn clear(&self) -> usize {
        let mut state = self.write_state();
        let removed = state.store.clear();
        state.publishers.clear();
        info!("Cleared {} messages", removed);
        self.notify(MonitorEvent::Cleared { removed });
        removed
    }

    pub fn snapshot(&self) -> Vec<Arc<Message>> {
        self.read_state().store.snapshot()
    }

    pub fn publishers(&self) -> Vec<PublisherEntry> {
        self.read_state().publishers.snapshot()
    }

    pub fn identity(&self, topic: &str) -> Option<DisplayIdentity> {
        self.read_state().publishers.identity(topic)
    }

    /// Messages and publishers taken under the same read lock
    pub fn view(&self) -> MonitorView {
        let state = self.read_state();
        MonitorView {
            messages: state.store.snapshot(),
            publishers: state.publishers.snapshot(),
        }
    }

    pub fn get(&self, sequence_id: SequenceId) -> Result<Arc<Message>, StoreError> {
        self.read_state().store.get(sequence_id)
    }

    pub fn len(&self) -> usize {
        self.read_state().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().store.is_empty()
    }

    pub fn set_filter(&self, text_query: impl Into<String>, selected_publisher: Option<String>) {
        let filter = FilterState::new(text_query, selected_publisher);
        debug!("Filter set to {:?}", filter);
        *self
            .shared
            .filter
            .write()
            .unwrap_or_else(PoisonError::into_inner) = filter;
    }

    pub fn filter(&self) -> FilterState {
        self.shared
            .filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn visible(&self) -> Vec<SequenceId> {
        view_filter::visible(&self.snapshot(), &self.filter())
    }

    pub fn visible_messages(&self) -> Vec<Arc<Message>> {
        let filter = self.filter();
        self.snapshot()
            .into_iter()
            .filter(|msg| filter.matches(msg))
            .collect()
    }

    /// Rows for the currently visible messages
    pub fn export_rows(&self) -> Vec<ExportRow> {
        self.visible_messages()
            .iter()
            .map(|msg| msg.export_row())
            .collect()
    }

    pub fn stats(&self) -> MonitorStats {
        let filter = self.filter();
        let snapshot = self.snapshot();
        let visible = snapshot.iter().filter(|msg| filter.matches(msg)).count();
        MonitorStats {
            total: snapshot.len(),
            visible,
            filtered: filter.is_active(),
        }
    }

    fn notify(&self, event: MonitorEvent) {
        // closed receivers are pruned on the way
        self.subscribers()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<MonitorEvent>>> {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MonitorState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MonitorState> {
        self.shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn decode(event: &DeliveryEvent) -> Result<(String, Qos), DeliveryError> {
    let topic = String::from_utf8(event.topic.clone())?;
    if topic.is_empty() {
        return Err(DeliveryError::EmptyTopic);
    }
    let qos = Qos::try_from(event.qos)?;
    Ok((topic, qos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deliver(bridge: &IngestionBridge, topic: &str, payload: &str) -> SequenceId {
        bridge
            .on_message_delivered(DeliveryEvent::new(topic, payload, 0, false))
            .unwrap()
    }

    #[test]
    fn zero_capacity_bridge_is_refused() {
        assert_eq!(IngestionBridge::new(0).unwrap_err(), StoreError::ZeroCapacity);
    }

    #[test]
    fn index_total_matches_store_size() {
        let bridge = IngestionBridge::new(4).unwrap();
        for i in 0..11 {
            deliver(&bridge, &format!("t/{}", i % 3), "x");
            let view = bridge.view();
            let total: usize = view.publishers.iter().map(|p| p.count).sum();
            assert_eq!(total, view.messages.len());
        }
        assert_eq!(bridge.len(), 4);
    }

    #[test]
    fn malformed_topic_is_dropped_with_notice() {
        let bridge = IngestionBridge::new(4).unwrap();
        let mut rx = bridge.subscribe();

        let err = bridge
            .on_message_delivered(DeliveryEvent::new(vec![0xc3u8, 0x28], "x", 0, false))
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidTopic(_)));

        let err = bridge
            .on_message_delivered(DeliveryEvent::new("", "x", 0, false))
            .unwrap_err();
        assert_eq!(err, DeliveryError::EmptyTopic);

        let err = bridge
            .on_message_delivered(DeliveryEvent::new("a", "x", 7, false))
            .unwrap_err();
        assert_eq!(err, DeliveryError::InvalidQos(7));

        assert!(bridge.is_empty());
        assert!(bridge.publishers().is_empty());
        for _ in 0..3 {
            assert!(matches!(rx.try_recv(), Ok(MonitorEvent::Notice(_))));
        }

        // ingestion keeps working afterwards
        assert_eq!(deliver(&bridge, "a", "x"), 1);
    }

    #[test]
    fn each_delivery_emits_one_notification() {
        let bridge = IngestionBridge::new(2).unwrap();
        let mut rx = bridge.subscribe();

        deliver(&bridge, "a", "1");
        deliver(&bridge, "b", "2");
        deliver(&bridge, "c", "3");

        let mut changes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                MonitorEvent::DataChanged(change) => {
                    changes.push((change.inserted_id(), change.evicted_id()))
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(changes, [(1, None), (2, None), (3, Some(1))]);
    }

    #[test]
    fn connection_changes_pass_through_without_touching_store() {
        let bridge = IngestionBridge::new(2).unwrap();
        let mut rx = bridge.subscribe();
        bridge.on_connection_state_changed(ConnectionState::Error("refused".into()));

        match rx.try_recv() {
            Ok(MonitorEvent::ConnectionChanged(state)) => {
                assert_eq!(state, ConnectionState::Error("refused".into()))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(bridge.is_empty());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bridge = IngestionBridge::new(2).unwrap();
        let rx = bridge.subscribe();
        let mut live = bridge.subscribe();
        drop(rx);

        deliver(&bridge, "a", "1");
        assert!(live.try_recv().is_ok());
        assert_eq!(bridge.subscribers().len(), 1);
    }

    #[test]
    fn stats_report_visible_over_total_when_filtered() {
        let bridge = IngestionBridge::new(10).unwrap();
        deliver(&bridge, "a", "1");
        deliver(&bridge, "b", "2");
        assert_eq!(bridge.stats().to_string(), "Messages: 2");

        bridge.set_filter("", Some("a".into()));
        let stats = bridge.stats();
        assert_eq!((stats.visible, stats.total), (1, 2));
        assert_eq!(stats.to_string(), "Messages: 1/2");
    }

    #[test]
    fn export_rows_follow_the_filter() {
        let bridge = IngestionBridge::new(10).unwrap();
        deliver(&bridge, "a", "keep");
        deliver(&bridge, "b", "skip");
        bridge.set_filter("keep", None);

        let rows = bridge.export_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].topic, "a");
        assert_eq!(rows[0].retain, "No");
    }
}

//! Bounded FIFO store of received messages
//!
//! Backed by a `VecDeque` used as a ring buffer: inserting at capacity pops the oldest
//! message from the front before the new one is pushed to the back, so every insert
//! is O(1) and no index shifting happens. Sequence ids are handed out from a counter
//! that survives [`MessageStore::clear`], which keeps ids unambiguous for the whole
//! session.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::Arc;

use super::error::StoreError;
use super::message::{Message, Qos, SequenceId};

/// Default number of messages kept in memory
pub const DEFAULT_CAPACITY: usize = 2000;

/// Result of a single insert
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub inserted: Arc<Message>,
    /// Oldest message pushed out to make room, if the store was full
    pub evicted: Option<Arc<Message>>,
}

#[derive(Debug)]
pub struct MessageStore {
    messages: VecDeque<Arc<Message>>,
    capacity: usize,
    next_sequence: SequenceId,
}

impl MessageStore {
    pub fn new(capacity: usize) -> Result<Self, StoreError> {
        if capacity == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        Ok(Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 1,
        })
    }

    pub fn insert(
        &mut self,
        topic: String,
        payload: Vec<u8>,
        qos: Qos,
        retain: bool,
        received_at: DateTime<Local>,
    ) -> Result<InsertOutcome, StoreError> {
        if topic.is_empty() {
            return Err(StoreError::EmptyTopic);
        }

        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };

        let sequence_id = self.next_sequence;
        self.next_sequence += 1;

        let inserted = Arc::new(Message::new(
            sequence_id,
            received_at,
            topic,
            payload,
            qos,
            retain,
        ));
        self.messages.push_back(inserted.clone());

        Ok(InsertOutcome { inserted, evicted })
    }

    /// Drops every message and returns how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.messages.len();
        self.messages.clear();
        removed
    }

    /// Messages oldest first
    pub fn snapshot(&self) -> Vec<Arc<Message>> {
        self.messages.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Message>> {
        self.messages.iter()
    }

    pub fn get(&self, sequence_id: SequenceId) -> Result<Arc<Message>, StoreError> {
        // ids are strictly increasing front to back
        self.messages
            .binary_search_by_key(&sequence_id, |msg| msg.sequence_id())
            .map(|idx| self.messages[idx].clone())
            .map_err(|_| StoreError::NotFound(sequence_id))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Id the next insert will receive
    pub fn next_sequence_id(&self) -> SequenceId {
        self.next_sequence
    }
}

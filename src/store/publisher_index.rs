//! Per-topic aggregate derived from the message store
//!
//! Every topic that has delivered a message gets a [`PublisherEntry`] holding the
//! number of messages currently live in the store and a [`DisplayIdentity`]. Entries
//! are listed in first-seen order. When a topic's count drops to zero its entry stays
//! in place as a dormant entry, so listings never reshuffle while topics go quiet.
//!
//! Identities are handed out per session: the k-th distinct topic ever seen gets
//! ordinal `k` and palette slot `k % PALETTE_SIZE`. They survive [`PublisherIndex::clear`],
//! so a topic keeps its colour across clears.
//!
//! Dormant entries and identities are only dropped by [`PublisherIndex::clear`] (entries)
//! or never (identities). A wildcard subscription that keeps seeing new topic names
//! therefore grows the index with the number of distinct topics, independent of the
//! store capacity.

use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Number of distinct slots consumers map to colours
pub const PALETTE_SIZE: usize = 8;

/// Stable display identity of a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DisplayIdentity {
    ordinal: usize,
}

impl DisplayIdentity {
    pub fn from_ordinal(ordinal: usize) -> Self {
        Self { ordinal }
    }

    /// Position of the topic in the session's first-seen order
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Palette slot in `0..PALETTE_SIZE`
    pub fn slot(&self) -> usize {
        self.ordinal % PALETTE_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublisherEntry {
    pub topic: String,
    pub count: usize,
    pub identity: DisplayIdentity,
}

impl PublisherEntry {
    pub fn is_dormant(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Default)]
pub struct PublisherIndex {
    entries: Vec<PublisherEntry>,
    positions: HashMap<String, usize>,
    identities: HashMap<String, DisplayIdentity>,
}

impl PublisherIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_insert(&mut self, topic: &str) -> DisplayIdentity {
        if let Some(&pos) = self.positions.get(topic) {
            let entry = &mut self.entries[pos];
            entry.count += 1;
            return entry.identity;
        }

        let identity = self.identity_for(topic);
        self.positions.insert(topic.to_string(), self.entries.len());
        self.entries.push(PublisherEntry {
            topic: topic.to_string(),
            count: 1,
            identity,
        });
        identity
    }

    pub fn on_evict(&mut self, topic: &str) {
        match self.positions.get(topic) {
            Some(&pos) => {
                let entry = &mut self.entries[pos];
                if entry.count == 0 {
                    warn!("Eviction for dormant topic '{}' ignored", topic);
                } else {
                    entry.count -= 1;
                }
            }
            None => warn!("Eviction for unknown topic '{}' ignored", topic),
        }
    }

    /// Entries in first-seen order, dormant ones included
    pub fn snapshot(&self) -> Vec<PublisherEntry> {
        self.entries.clone()
    }

    /// Drops all entries; identity assignments stay for the session
    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    pub fn count(&self, topic: &str) -> usize {
        self.positions
            .get(topic)
            .map(|&pos| self.entries[pos].count)
            .unwrap_or(0)
    }

    pub fn identity(&self, topic: &str) -> Option<DisplayIdentity> {
        self.identities.get(topic).copied()
    }

    /// Sum of all live counts
    pub fn total(&self) -> usize {
        self.entries.iter().map(|e| e.count).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn identity_for(&mut self, topic: &str) -> DisplayIdentity {
        let next = self.identities.len();
        *self
            .identities
            .entry(topic.to_string())
            .or_insert_with(|| DisplayIdentity::from_ordinal(next))
    }
}

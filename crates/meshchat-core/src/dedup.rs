//! Seen-message ledger
//!
//! Suppresses loops and duplicate relays in a mesh with cycles. Every inbound
//! message is checked and marked exactly once, at first sight, before any relay
//! decision. Entries are keyed on `(sender, id)` so two devices that happen to
//! draw the same id do not shadow each other.
//!
//! The ledger is bounded twice: entries older than the configured window are
//! forgotten, and once the capacity is reached the oldest entry is evicted.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::DedupConfig;
use crate::message::Message;
use crate::types::{MessageId, PeerIdentity, Timestamp};

// ----------------------------------------------------------------------------
// Dedup Key
// ----------------------------------------------------------------------------

/// Identity of a message for duplicate detection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub sender: PeerIdentity,
    pub id: MessageId,
}

impl DedupKey {
    pub fn new(sender: PeerIdentity, id: MessageId) -> Self {
        Self { sender, id }
    }
}

impl From<&Message> for DedupKey {
    fn from(message: &Message) -> Self {
        Self::new(message.sender.clone(), message.id)
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters for deduplication performance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationStats {
    /// Messages checked against the ledger
    pub processed: u64,
    /// Messages detected as duplicates
    pub duplicates: u64,
    /// Entries forgotten because of age or capacity
    pub evictions: u64,
}

impl DeduplicationStats {
    pub fn duplicate_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.processed as f64
        }
    }
}

// ----------------------------------------------------------------------------
// Ledger
// ----------------------------------------------------------------------------

/// Bounded set of messages already processed by this device
#[derive(Debug)]
pub struct DedupLedger {
    /// First-sight time per key
    seen: HashMap<DedupKey, Timestamp>,
    /// Keys in first-sight order, oldest at the front
    order: VecDeque<(DedupKey, Timestamp)>,
    config: DedupConfig,
    stats: DeduplicationStats,
}

impl DedupLedger {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            seen: HashMap::default(),
            order: VecDeque::new(),
            config,
            stats: DeduplicationStats::default(),
        }
    }

    pub fn has_seen(&self, key: &DedupKey) -> bool {
        self.seen.contains_key(key)
    }

    /// Remember `key` as seen at `now`. Marking an already seen key is a no-op.
    pub fn mark_seen(&mut self, key: DedupKey, now: Timestamp) {
        if self.seen.contains_key(&key) {
            return;
        }

        self.evict_expired(now);
        while self.seen.len() >= self.config.capacity {
            if !self.evict_oldest() {
                break;
            }
        }

        self.seen.insert(key.clone(), now);
        self.order.push_back((key, now));
    }

    /// Check and mark in one step. Returns `true` if the key was already seen.
    pub fn check_and_mark(&mut self, key: DedupKey, now: Timestamp) -> bool {
        self.stats.processed += 1;
        self.evict_expired(now);

        if self.has_seen(&key) {
            self.stats.duplicates += 1;
            return true;
        }

        self.mark_seen(key, now);
        false
    }

    /// Forget `key` so a later copy is processed again. Returns whether it was known.
    pub fn forget(&mut self, key: &DedupKey) -> bool {
        if self.seen.remove(key).is_none() {
            return false;
        }
        self.order.retain(|(known, _)| known != key);
        true
    }

    /// Periodic maintenance: forget entries outside the window
    pub fn maintain(&mut self, now: Timestamp) {
        self.evict_expired(now);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn stats(&self) -> &DeduplicationStats {
        &self.stats
    }

    fn evict_expired(&mut self, now: Timestamp) {
        let window = self.config.window();
        while let Some((_, seen_at)) = self.order.front() {
            if now.duration_since(*seen_at) <= window {
                break;
            }
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) -> bool {
        match self.order.pop_front() {
            Some((key, _)) => {
                self.seen.remove(&key);
                self.stats.evictions += 1;
                true
            }
            None => false,
        }
    }
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

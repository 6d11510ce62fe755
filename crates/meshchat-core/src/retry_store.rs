//! Store-and-forward queue for messages without a route
//!
//! Durability belongs to the `RecordStore` collaborator; the retry policy
//! (expiry, attempt budget, what is due) lives here. A persistence failure is
//! logged and the call degrades to a no-op so the router keeps running.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::message::Message;
use crate::storage::{MemoryRecordStore, Record, RecordStore};
use crate::types::{MessageId, Timestamp};

// ----------------------------------------------------------------------------
// Stored Message
// ----------------------------------------------------------------------------

/// A queued outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Identifier of the queue entry itself
    pub id: Uuid,
    pub original_message: Message,
    pub created_at: Timestamp,
    /// Failed delivery attempts so far, never above the policy maximum
    pub attempt_count: u32,
}

impl StoredMessage {
    pub fn new(original_message: Message, created_at: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_message,
            created_at,
            attempt_count: 0,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.original_message.id
    }

    /// Expired once the attempt budget is spent or the entry outlived the window
    pub fn is_expired(&self, now: Timestamp, policy: &RetryPolicy) -> bool {
        self.attempt_count >= policy.max_attempts
            || now.duration_since(self.created_at) > policy.retry_window()
    }
}

impl Record for StoredMessage {
    type Key = MessageId;

    fn key(&self) -> MessageId {
        self.original_message.id
    }

    fn timestamp(&self) -> Timestamp {
        self.created_at
    }
}

// ----------------------------------------------------------------------------
// Retry Store
// ----------------------------------------------------------------------------

/// Retry queue keyed by message id
pub struct RetryStore {
    store: Box<dyn RecordStore<StoredMessage>>,
    policy: RetryPolicy,
}

impl RetryStore {
    pub fn new(store: Box<dyn RecordStore<StoredMessage>>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Retry store kept only in memory
    pub fn in_memory(policy: RetryPolicy) -> Self {
        Self::new(Box::new(MemoryRecordStore::new()), policy)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Queue `message` for later delivery.
    ///
    /// Returns `false` when it is already queued (the original entry and its
    /// creation time are kept) or when persistence failed.
    pub fn enqueue(&mut self, message: Message, now: Timestamp) -> bool {
        if self.contains(&message.id) {
            return false;
        }

        let id = message.id;
        match self.store.insert(StoredMessage::new(message, now)) {
            Ok(()) => {
                debug!(message_id = %id.short(), "queued message for retry");
                true
            }
            Err(e) => {
                warn!(message_id = %id.short(), "failed to persist queued message: {}", e);
                false
            }
        }
    }

    /// Remove and return every expired entry, in one finite pass
    pub fn dequeue_expired(&mut self, now: Timestamp) -> Vec<StoredMessage> {
        let policy = self.policy.clone();
        let expired = match self.store.query(&|entry: &StoredMessage| entry.is_expired(now, &policy)) {
            Ok(expired) => expired,
            Err(e) => {
                warn!("failed to query retry store: {}", e);
                return Vec::new();
            }
        };

        expired
            .into_iter()
            .filter(|entry| match self.store.delete(&entry.message_id()) {
                Ok(_) => true,
                Err(e) => {
                    warn!(message_id = %entry.message_id().short(), "failed to drop expired entry: {}", e);
                    false
                }
            })
            .collect()
    }

    /// Entries still worth retrying, oldest first
    pub fn pending(&self, now: Timestamp) -> Vec<StoredMessage> {
        let policy = &self.policy;
        self.store
            .query(&|entry: &StoredMessage| !entry.is_expired(now, policy))
            .unwrap_or_else(|e| {
                warn!("failed to query retry store: {}", e);
                Vec::new()
            })
    }

    /// Drop the entry for a delivered message
    pub fn remove(&mut self, id: &MessageId) -> Option<StoredMessage> {
        self.store.delete(id).unwrap_or_else(|e| {
            warn!(message_id = %id.short(), "failed to remove queued message: {}", e);
            None
        })
    }

    /// Record one failed attempt. Returns the new attempt count.
    pub fn increment_attempt(&mut self, id: &MessageId) -> Option<u32> {
        let mut entry = match self.store.get(id) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(message_id = %id.short(), "failed to load queued message: {}", e);
                return None;
            }
        };

        entry.attempt_count = (entry.attempt_count + 1).min(self.policy.max_attempts);
        let attempts = entry.attempt_count;

        match self.store.update(entry) {
            Ok(()) => Some(attempts),
            Err(e) => {
                warn!(message_id = %id.short(), "failed to record retry attempt: {}", e);
                None
            }
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        matches!(self.store.get(id), Ok(Some(_)))
    }

    pub fn get(&self, id: &MessageId) -> Option<StoredMessage> {
        self.store.get(id).ok().flatten()
    }

    pub fn len(&self) -> usize {
        self.store.len().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl core::fmt::Debug for RetryStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryStore")
            .field("entries", &self.len())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PeerIdentity, Ttl};

    fn message(id: u128) -> Message {
        Message::data(
            MessageId::from_u128(id),
            PeerIdentity::new("alice").unwrap(),
            PeerIdentity::new("bob").unwrap(),
            "hi".into(),
            Ttl::DEFAULT,
        )
    }

    fn at(secs: u64) -> Timestamp {
        Timestamp::new(secs * 1000)
    }

    #[test]
    fn test_expiry_by_attempts_regardless_of_age() {
        let policy = RetryPolicy::default();
        let mut entry = StoredMessage::new(message(1), at(0));
        entry.attempt_count = 10;
        assert!(entry.is_expired(at(0), &policy));

        entry.attempt_count = 9;
        assert!(!entry.is_expired(at(0), &policy));
    }

    #[test]
    fn test_expiry_by_age_regardless_of_attempts() {
        let policy = RetryPolicy::default();
        let entry = StoredMessage::new(message(1), at(0));
        assert!(!entry.is_expired(at(600), &policy));
        assert!(entry.is_expired(at(601), &policy));
    }

    #[test]
    fn test_enqueue_remove_contains() {
        let mut store = RetryStore::in_memory(RetryPolicy::default());
        let id = MessageId::from_u128(1);

        assert!(store.enqueue(message(1), at(0)));
        assert!(!store.enqueue(message(1), at(5)));
        assert!(store.contains(&id));
        assert_eq!(store.get(&id).unwrap().created_at, at(0));

        assert!(store.remove(&id).is_some());
        assert!(!store.contains(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn test_increment_attempt_is_clamped() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        };
        let mut store = RetryStore::in_memory(policy);
        let id = MessageId::from_u128(1);
        store.enqueue(message(1), at(0));

        assert_eq!(store.increment_attempt(&id), Some(1));
        assert_eq!(store.increment_attempt(&id), Some(2));
        assert_eq!(store.increment_attempt(&id), Some(2));
        assert_eq!(store.increment_attempt(&MessageId::from_u128(9)), None);
    }

    #[test]
    fn test_dequeue_expired_and_pending() {
        let mut store = RetryStore::in_memory(RetryPolicy::default());
        store.enqueue(message(1), at(0));
        store.enqueue(message(2), at(300));
        store.enqueue(message(3), at(100));

        let pending: Vec<_> = store.pending(at(500)).iter().map(|e| e.message_id()).collect();
        assert_eq!(
            pending,
            vec![
                MessageId::from_u128(1),
                MessageId::from_u128(3),
                MessageId::from_u128(2)
            ]
        );

        let expired = store.dequeue_expired(at(650));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].message_id(), MessageId::from_u128(1));
        assert_eq!(store.len(), 2);

        assert!(store.dequeue_expired(at(650)).is_empty());
    }

    #[test]
    fn test_persistence_failure_is_non_fatal() {
        let mut backing = MemoryRecordStore::new();
        backing.set_fail_writes(true);
        let mut store = RetryStore::new(Box::new(backing), RetryPolicy::default());

        assert!(!store.enqueue(message(1), at(0)));
        assert!(store.is_empty());
        assert!(store.remove(&MessageId::from_u128(1)).is_none());
    }
}

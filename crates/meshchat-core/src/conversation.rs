//! Per-peer message history
//!
//! Pure data container: one `Conversation` per peer identity, created on the
//! first message to or from that peer, ordered by arrival. When a record store
//! is attached every entry is mirrored into it and can be restored on startup.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dedup::DedupKey;
use crate::errors::Result;
use crate::message::{Message, MessageStatus};
use crate::storage::{Record, RecordStore};
use crate::types::{PeerIdentity, Timestamp};

// ----------------------------------------------------------------------------
// Conversation Entry
// ----------------------------------------------------------------------------

/// One message in a conversation together with its delivery status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// The other party of the conversation
    pub peer: PeerIdentity,
    pub message: Message,
    pub status: MessageStatus,
    pub recorded_at: Timestamp,
    /// Arrival order, breaks ties between equal timestamps
    pub sequence: u64,
}

impl ConversationEntry {
    pub fn key(&self) -> DedupKey {
        DedupKey::from(&self.message)
    }
}

impl Record for ConversationEntry {
    type Key = DedupKey;

    fn key(&self) -> DedupKey {
        DedupKey::from(&self.message)
    }

    fn timestamp(&self) -> Timestamp {
        self.recorded_at
    }
}

// ----------------------------------------------------------------------------
// Conversation
// ----------------------------------------------------------------------------

/// Message history with one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub peer: PeerIdentity,
    pub entries: Vec<ConversationEntry>,
    pub last_message: Option<Message>,
}

impl Conversation {
    fn new(peer: PeerIdentity) -> Self {
        Self {
            peer,
            entries: Vec::new(),
            last_message: None,
        }
    }

    fn position(&self, key: &DedupKey) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.message.id == key.id && entry.message.sender == key.sender)
    }

    fn last_activity(&self) -> (Timestamp, u64) {
        self.entries
            .last()
            .map(|entry| (entry.recorded_at, entry.sequence))
            .unwrap_or((Timestamp::new(0), 0))
    }
}

// ----------------------------------------------------------------------------
// Conversation Book
// ----------------------------------------------------------------------------

/// All conversations of this device, keyed by peer identity
pub struct ConversationBook {
    conversations: HashMap<PeerIdentity, Conversation>,
    store: Option<Box<dyn RecordStore<ConversationEntry>>>,
    next_sequence: u64,
}

impl ConversationBook {
    pub fn new() -> Self {
        Self {
            conversations: HashMap::default(),
            store: None,
            next_sequence: 0,
        }
    }

    /// Conversation book mirrored into `store`
    pub fn with_store(store: Box<dyn RecordStore<ConversationEntry>>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    /// Rebuild the in-memory view from the attached store. Returns the number
    /// of entries loaded.
    pub fn restore(&mut self) -> Result<usize> {
        let mut records = match &self.store {
            Some(store) => store.all_sorted_by_timestamp()?,
            None => return Ok(0),
        };
        records.sort_by_key(|entry| (entry.recorded_at, entry.sequence));

        let loaded = records.len();
        for entry in records {
            self.next_sequence = self.next_sequence.max(entry.sequence + 1);
            let conversation = self
                .conversations
                .entry(entry.peer.clone())
                .or_insert_with(|| Conversation::new(entry.peer.clone()));
            if conversation.position(&entry.key()).is_none() {
                conversation.last_message = Some(entry.message.clone());
                conversation.entries.push(entry);
            }
        }
        Ok(loaded)
    }

    /// Append `message` to the conversation with `peer`, creating it if absent.
    ///
    /// Returns `false` if the same `(sender, id)` is already in that conversation.
    pub fn add_message(
        &mut self,
        peer: &PeerIdentity,
        message: Message,
        status: MessageStatus,
        now: Timestamp,
    ) -> bool {
        let conversation = self
            .conversations
            .entry(peer.clone())
            .or_insert_with(|| Conversation::new(peer.clone()));

        if conversation.position(&DedupKey::from(&message)).is_some() {
            return false;
        }

        let entry = ConversationEntry {
            peer: peer.clone(),
            message: message.clone(),
            status,
            recorded_at: now,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        conversation.entries.push(entry.clone());
        self.update_last_message(peer, message);

        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.insert(entry) {
                warn!(peer = %peer, "failed to persist conversation entry: {}", e);
            }
        }
        true
    }

    pub fn update_last_message(&mut self, peer: &PeerIdentity, message: Message) {
        if let Some(conversation) = self.conversations.get_mut(peer) {
            conversation.last_message = Some(message);
        }
    }

    /// Messages exchanged with `peer`, in arrival order
    pub fn messages_with(&self, peer: &PeerIdentity) -> Vec<Message> {
        self.entries_with(peer)
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn entries_with(&self, peer: &PeerIdentity) -> &[ConversationEntry] {
        self.conversations
            .get(peer)
            .map(|conversation| conversation.entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn conversation(&self, peer: &PeerIdentity) -> Option<&Conversation> {
        self.conversations.get(peer)
    }

    /// Look an entry up across every conversation
    pub fn find(&self, key: &DedupKey) -> Option<&ConversationEntry> {
        self.conversations.values().find_map(|conversation| {
            conversation
                .position(key)
                .map(|index| &conversation.entries[index])
        })
    }

    pub fn status_of(&self, peer: &PeerIdentity, key: &DedupKey) -> Option<MessageStatus> {
        let conversation = self.conversations.get(peer)?;
        conversation
            .position(key)
            .map(|index| conversation.entries[index].status)
    }

    /// Move an entry to `status` if the transition is allowed.
    ///
    /// Returns the new status when the entry changed.
    pub fn set_status(
        &mut self,
        peer: &PeerIdentity,
        key: &DedupKey,
        status: MessageStatus,
    ) -> Option<MessageStatus> {
        let conversation = self.conversations.get_mut(peer)?;
        let index = conversation.position(key)?;
        let entry = &mut conversation.entries[index];

        if !entry.status.can_transition_to(status) {
            return None;
        }
        entry.status = status;

        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.update(entry.clone()) {
                warn!(peer = %peer, "failed to persist status change: {}", e);
            }
        }
        Some(status)
    }

    /// Peers with a conversation, most recent activity first
    pub fn peers(&self) -> Vec<PeerIdentity> {
        let mut conversations: Vec<&Conversation> = self.conversations.values().collect();
        conversations.sort_by_key(|conversation| core::cmp::Reverse(conversation.last_activity()));
        conversations
            .into_iter()
            .map(|conversation| conversation.peer.clone())
            .collect()
    }

    /// Number of conversations
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

impl Default for ConversationBook {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ConversationBook {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConversationBook")
            .field("conversations", &self.conversations.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

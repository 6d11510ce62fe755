//! Router state machine
//!
//! The router owns the conversation book, the dedup ledger, the retry store and
//! the router-side peer directory. It is driven from a single task: every input
//! (a local send, a radio event, a retry tick) is a synchronous method call
//! returning the effects for the radio and the app events for the UI. It never
//! performs I/O itself.
//!
//! ## Message lifecycle
//!
//! An own message is either dispatched right away (status `Sent`) or parked in
//! the retry store (status `Stored`). Sends are fire-and-forget `SendPacket`
//! effects carrying a `SendTicket`; once every ticket of an attempt has been
//! answered the attempt resolves:
//!
//! - at least one send succeeded: `Delivered` when it went over the receiver's
//!   own link, `Sent` when it was flooded to neighbours
//! - every send failed: a fresh message is queued, a retried one has its attempt
//!   counter bumped
//!
//! The retry sweep drops expired entries (`Expired`, reported as
//! `DeliveryExpired`) and re-dispatches the rest unless an attempt for the same
//! message is still in flight.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use tracing::{debug, info, warn};

use crate::channel::{AppEvent, Command, Effect, Event};
use crate::codec::WireFormat;
use crate::config::MeshChatConfig;
use crate::conversation::{ConversationBook, ConversationEntry};
use crate::dedup::{DedupKey, DedupLedger, DeduplicationStats};
use crate::errors::{MeshChatError, Result};
use crate::message::{Message, MessageKind, MessageStatus};
use crate::retry_store::{RetryStore, StoredMessage};
use crate::storage::{MemoryRecordStore, RecordStore};
use crate::transport::PeerDirectory;
use crate::types::{ConnectionHandle, MessageId, PeerIdentity, SendTicket, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Router Output
// ----------------------------------------------------------------------------

/// Everything one router transition asks the outside world to do
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterOutput {
    pub effects: Vec<Effect>,
    pub app_events: Vec<AppEvent>,
}

impl RouterOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.app_events.is_empty()
    }

    pub fn merge(&mut self, other: RouterOutput) {
        self.effects.extend(other.effects);
        self.app_events.extend(other.app_events);
    }

    pub fn into_parts(self) -> (Vec<Effect>, Vec<AppEvent>) {
        (self.effects, self.app_events)
    }

    fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn event(&mut self, event: AppEvent) {
        self.app_events.push(event);
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Session counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Own messages accepted for sending
    pub messages_sent: u64,
    /// Messages for this device appended to a conversation
    pub messages_received: u64,
    /// Foreign messages forwarded to at least one neighbour
    pub messages_routed: u64,
    /// Own messages confirmed over the receiver's own link
    pub messages_delivered: u64,
    pub read_receipts_sent: u64,
    pub duplicates_dropped: u64,
    pub corrupt_packets: u64,
    /// Relays dropped because their ttl was spent
    pub ttl_exhausted: u64,
    /// Own messages parked in the retry store
    pub queued: u64,
    pub expired: u64,
}

/// Snapshot answering `Command::GetSystemStatus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub identity: PeerIdentity,
    pub connected_devices: usize,
    pub conversations: usize,
    pub pending_retries: usize,
    pub in_flight_sends: usize,
    pub stats: RouterStats,
    pub dedup: DeduplicationStats,
}

// ----------------------------------------------------------------------------
// Routing Internals
// ----------------------------------------------------------------------------

/// Where an outbound message goes
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    /// The receiver's own link
    Direct(ConnectionHandle),
    /// Every neighbour, relays carry it further
    Flood(SmallVec<[ConnectionHandle; 8]>),
    Unreachable,
}

impl Route {
    fn handles(&self) -> SmallVec<[ConnectionHandle; 8]> {
        match self {
            Route::Direct(handle) => smallvec![*handle],
            Route::Flood(handles) => handles.clone(),
            Route::Unreachable => SmallVec::new(),
        }
    }
}

/// One dispatch of an own message, waiting for its send outcomes
#[derive(Debug, Clone)]
struct Attempt {
    message: Message,
    outstanding: usize,
    succeeded: bool,
    direct: bool,
    dispatched_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

/// Mesh routing state machine for one device
pub struct Router<T: TimeSource> {
    identity: PeerIdentity,
    config: MeshChatConfig,
    clock: T,
    peers: PeerDirectory,
    ledger: DedupLedger,
    conversations: ConversationBook,
    retry_store: RetryStore,
    attempts: HashMap<MessageId, Attempt>,
    tickets: HashMap<SendTicket, (MessageId, ConnectionHandle)>,
    next_ticket: u64,
    stats: RouterStats,
}

impl<T: TimeSource> Router<T> {
    /// Build a router. Conversations found in `conversation_store` are restored.
    pub fn new(
        identity: PeerIdentity,
        config: MeshChatConfig,
        retry_store: Option<Box<dyn RecordStore<StoredMessage>>>,
        conversation_store: Option<Box<dyn RecordStore<ConversationEntry>>>,
        clock: T,
    ) -> Result<Self> {
        config.validate()?;

        let retry_backend = retry_store.unwrap_or_else(|| Box::new(MemoryRecordStore::new()));
        let retry_store = RetryStore::new(retry_backend, config.retry.clone());

        let mut conversations = match conversation_store {
            Some(store) => ConversationBook::with_store(store),
            None => ConversationBook::new(),
        };
        match conversations.restore() {
            Ok(0) => {}
            Ok(loaded) => info!(%identity, loaded, "restored conversation history"),
            Err(e) => warn!(%identity, "failed to restore conversations: {}", e),
        }

        Ok(Self {
            ledger: DedupLedger::new(config.dedup.clone()),
            identity,
            config,
            clock,
            peers: PeerDirectory::new(),
            conversations,
            retry_store,
            attempts: HashMap::default(),
            tickets: HashMap::default(),
            next_ticket: 0,
            stats: RouterStats::default(),
        })
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn config(&self) -> &MeshChatConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Presentation boundary
    // ------------------------------------------------------------------------

    /// Accept a message from the local user.
    ///
    /// Empty and over-long texts are rejected before anything is sent or queued.
    pub fn send_message(
        &mut self,
        id: MessageId,
        receiver: PeerIdentity,
        text: String,
    ) -> Result<RouterOutput> {
        Self::check_text(&text, self.config.router.max_message_length)?;
        if receiver == self.identity {
            return Err(MeshChatError::InvalidIdentity {
                reason: "cannot send a message to this device".into(),
            });
        }

        let key = DedupKey::new(self.identity.clone(), id);
        if self.conversations.find(&key).is_some() {
            warn!(message_id = %id.short(), "message id already used, ignoring send");
            return Ok(RouterOutput::new());
        }

        let now = self.clock.now();
        let message = Message::data(
            id,
            self.identity.clone(),
            receiver.clone(),
            text,
            self.config.router.ttl(),
        );
        let data = WireFormat::encode(&message)?;

        // Copies flooded back to us are duplicates
        self.ledger.mark_seen(key, now);
        self.stats.messages_sent += 1;

        let mut output = RouterOutput::new();
        let route = self.route_to(&receiver);
        if let Route::Direct(_) = route {
            self.dispatch(&message, data, &route, now, &mut output);
            self.record_own(&receiver, message, MessageStatus::Sent, now, &mut output);
            return Ok(output);
        }

        // Only the receiver's own link settles a message; a flood is a head start
        debug!(message_id = %id.short(), %receiver, "receiver not connected, queueing");
        self.queue(message.clone(), now);
        if let Route::Flood(_) = route {
            self.dispatch(&message, data, &route, now, &mut output);
        }
        self.record_own(&receiver, message, MessageStatus::Stored, now, &mut output);
        Ok(output)
    }

    /// Validate user text the same way `send_message` does
    pub fn check_text(text: &str, max_length: usize) -> Result<()> {
        if text.trim().is_empty() {
            return Err(MeshChatError::EmptyMessage);
        }
        let length = text.chars().count();
        if length > max_length {
            return Err(MeshChatError::MessageTooLong {
                length,
                max: max_length,
            });
        }
        Ok(())
    }

    /// Messages exchanged with `peer`, in arrival order
    pub fn conversation(&self, peer: &PeerIdentity) -> Vec<Message> {
        self.conversations.messages_with(peer)
    }

    pub fn conversations(&self) -> &ConversationBook {
        &self.conversations
    }

    /// Status of an own message
    pub fn status_of(&self, id: MessageId) -> Option<MessageStatus> {
        self.conversations
            .find(&DedupKey::new(self.identity.clone(), id))
            .map(|entry| entry.status)
    }

    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.peers.identities()
    }

    pub fn retry_store(&self) -> &RetryStore {
        &self.retry_store
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn system_status(&self) -> SystemStatus {
        SystemStatus {
            identity: self.identity.clone(),
            connected_devices: self.peers.identities().len(),
            conversations: self.conversations.len(),
            pending_retries: self.retry_store.len(),
            in_flight_sends: self.tickets.len(),
            stats: self.stats.clone(),
            dedup: self.ledger.stats().clone(),
        }
    }

    /// Handle every command except `Shutdown`, which belongs to the task loop
    pub fn handle_command(&mut self, command: Command) -> Result<RouterOutput> {
        let mut output = RouterOutput::new();
        match command {
            Command::SendMessage { id, receiver, text } => {
                return self.send_message(id, receiver, text);
            }
            Command::GetConversation { peer } => {
                let entries = self.conversations.entries_with(&peer).to_vec();
                output.event(AppEvent::ConversationSnapshot { peer, entries });
            }
            Command::StartDiscovery => {
                output.effect(Effect::StartAdvertising);
                output.effect(Effect::StartScanning);
            }
            Command::StopDiscovery => output.effect(Effect::StopDiscovery),
            Command::ConnectToPeer { identity } => {
                if self.peers.handle_for(&identity).is_none() {
                    output.effect(Effect::Connect { identity });
                }
            }
            Command::DisconnectFromPeer { identity } => {
                for handle in self.peers.handles() {
                    if self.peers.identity_of(handle) == Some(&identity) {
                        output.effect(Effect::Disconnect { handle });
                    }
                }
            }
            Command::RetryNow => return Ok(self.retry_due()),
            Command::GetSystemStatus => output.event(AppEvent::SystemStatusReport {
                status: self.system_status(),
            }),
            Command::Shutdown => {}
        }
        Ok(output)
    }

    // ------------------------------------------------------------------------
    // Radio events
    // ------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: Event) -> RouterOutput {
        match event {
            Event::PeerAppeared { handle, identity } => self.on_peer_appeared(handle, identity),
            Event::PacketReceived { handle, data } => self.on_packet(handle, &data),
            Event::PeerLost { handle } => self.on_peer_lost(handle),
            Event::SendCompleted { ticket } => self.on_send_outcome(ticket, true),
            Event::SendFailed { ticket, reason } => {
                debug!(ticket = ticket.value(), "send failed: {}", reason);
                self.on_send_outcome(ticket, false)
            }
            Event::TransportError { error } => {
                warn!("radio error: {}", error);
                let mut output = RouterOutput::new();
                output.event(AppEvent::SystemError { error });
                output
            }
        }
    }

    fn on_peer_appeared(&mut self, handle: ConnectionHandle, identity: PeerIdentity) -> RouterOutput {
        if identity == self.identity {
            warn!(%handle, "ignoring link that claims our own identity");
            return RouterOutput::new();
        }

        let now = self.clock.now();
        let mut output = RouterOutput::new();
        if self.peers.insert(identity.clone(), handle, now) {
            info!(%identity, %handle, "peer connected");
            output.event(AppEvent::PeerConnected { identity, handle });
        }

        // A new link may be the route a queued message was waiting for
        output.merge(self.retry_due());
        output
    }

    fn on_peer_lost(&mut self, handle: ConnectionHandle) -> RouterOutput {
        let mut output = RouterOutput::new();
        match self.peers.remove(handle) {
            Some(peer) => {
                info!(identity = %peer.identity, %handle, "peer disconnected");
                output.event(AppEvent::PeerDisconnected {
                    identity: peer.identity,
                    handle,
                });
            }
            None => debug!(%handle, "lost unknown link"),
        }

        // Sends still pending on this link will never complete
        let cancelled: Vec<SendTicket> = self
            .tickets
            .iter()
            .filter(|(_, (_, on))| *on == handle)
            .map(|(ticket, _)| *ticket)
            .collect();
        for ticket in cancelled {
            output.merge(self.on_send_outcome(ticket, false));
        }
        output
    }

    fn on_packet(&mut self, handle: ConnectionHandle, data: &[u8]) -> RouterOutput {
        let mut output = RouterOutput::new();

        let message = match WireFormat::decode(data) {
            Ok(message) => message,
            Err(e) => {
                self.stats.corrupt_packets += 1;
                warn!(%handle, "dropping corrupt packet: {}", e);
                output.event(AppEvent::CorruptPacket {
                    handle,
                    reason: e.to_string(),
                });
                return output;
            }
        };

        let now = self.clock.now();
        if self.ledger.check_and_mark(DedupKey::from(&message), now) {
            self.stats.duplicates_dropped += 1;
            debug!(message_id = %message.id.short(), sender = %message.sender, "duplicate dropped");
            return output;
        }

        if message.sender == self.identity {
            debug!(message_id = %message.id.short(), "own message echoed back, dropping");
            return output;
        }

        if message.is_addressed_to(&self.identity) {
            match message.kind {
                MessageKind::Data => self.deliver(message, now, &mut output),
                MessageKind::ReadAck => self.apply_read_ack(&message, &mut output),
            }
        } else {
            self.relay(message, handle, &mut output);
        }
        output
    }

    fn deliver(&mut self, message: Message, now: Timestamp, output: &mut RouterOutput) {
        let sender = message.sender.clone();
        if !self
            .conversations
            .add_message(&sender, message.clone(), MessageStatus::Delivered, now)
        {
            return;
        }
        self.stats.messages_received += 1;
        debug!(message_id = %message.id.short(), %sender, "message delivered");

        self.conversation_updated(&sender, now, output);
        output.event(AppEvent::MessageReceived {
            message: message.clone(),
        });

        if self.config.router.read_receipts_enabled {
            self.send_read_ack(&message, now, output);
        }
    }

    fn send_read_ack(&mut self, original: &Message, now: Timestamp, output: &mut RouterOutput) {
        let ack = Message::read_ack_for(original, self.identity.clone(), self.config.router.ttl());
        let route = self.route_to(&ack.receiver);
        if route == Route::Unreachable {
            debug!(message_id = %ack.id.short(), "no route for read receipt");
            return;
        }

        match WireFormat::encode(&ack) {
            Ok(data) => {
                self.ledger.mark_seen(DedupKey::from(&ack), now);
                for handle in route.handles() {
                    let ticket = self.issue_ticket();
                    output.effect(Effect::SendPacket {
                        handle,
                        data: data.clone(),
                        ticket,
                    });
                }
                self.stats.read_receipts_sent += 1;
            }
            Err(e) => warn!(message_id = %ack.id.short(), "failed to encode read receipt: {}", e),
        }
    }

    fn apply_read_ack(&mut self, ack: &Message, output: &mut RouterOutput) {
        let reader = ack.sender.clone();
        let key = DedupKey::new(self.identity.clone(), ack.id);

        let Some(entry) = self.conversations.find(&key) else {
            debug!(message_id = %ack.id.short(), %reader, "read receipt for unknown message");
            return;
        };
        let peer = entry.peer.clone();

        // Read implies delivered, nothing left to retry
        self.retry_store.remove(&ack.id);
        self.attempts.remove(&ack.id);
        self.tickets.retain(|_, (id, _)| *id != ack.id);

        self.transition(&peer, ack.id, MessageStatus::Read, output);
    }

    fn relay(&mut self, message: Message, arrived_on: ConnectionHandle, output: &mut RouterOutput) {
        if !self.config.router.relay_enabled {
            debug!(message_id = %message.id.short(), "relaying disabled, dropping");
            return;
        }

        let Some(forward) = message.relayed() else {
            self.stats.ttl_exhausted += 1;
            debug!(message_id = %message.id.short(), "ttl exhausted, dropping");
            return;
        };

        let targets: SmallVec<[ConnectionHandle; 8]> = self
            .peers
            .handles()
            .into_iter()
            .filter(|handle| *handle != arrived_on)
            .collect();

        if targets.is_empty() {
            // A later copy may find a link that does not exist yet
            self.ledger.forget(&DedupKey::from(&message));
            debug!(message_id = %message.id.short(), "no onward link for relay");
            return;
        }

        let data = match WireFormat::encode(&forward) {
            Ok(data) => data,
            Err(e) => {
                warn!(message_id = %message.id.short(), "failed to encode relay: {}", e);
                return;
            }
        };

        for handle in &targets {
            let ticket = self.issue_ticket();
            output.effect(Effect::SendPacket {
                handle: *handle,
                data: data.clone(),
                ticket,
            });
        }

        self.stats.messages_routed += 1;
        debug!(
            message_id = %forward.id.short(),
            receiver = %forward.receiver,
            fanout = targets.len(),
            "relayed message"
        );
        output.event(AppEvent::MessageRelayed {
            id: forward.id,
            sender: forward.sender,
            receiver: forward.receiver,
            hop_count: forward.hop_count,
            fanout: targets.len(),
        });
    }

    // ------------------------------------------------------------------------
    // Send outcomes and retries
    // ------------------------------------------------------------------------

    fn on_send_outcome(&mut self, ticket: SendTicket, success: bool) -> RouterOutput {
        let mut output = RouterOutput::new();

        // Relays and read receipts are not tracked
        let Some((id, _)) = self.tickets.remove(&ticket) else {
            return output;
        };
        let Some(attempt) = self.attempts.get_mut(&id) else {
            return output;
        };

        attempt.outstanding = attempt.outstanding.saturating_sub(1);
        attempt.succeeded |= success;
        if attempt.outstanding > 0 {
            return output;
        }

        if let Some(attempt) = self.attempts.remove(&id) {
            self.settle(attempt, &mut output);
        }
        output
    }

    /// Apply the combined outcome of a finished attempt
    fn settle(&mut self, attempt: Attempt, output: &mut RouterOutput) {
        let id = attempt.message.id;
        let receiver = attempt.message.receiver.clone();

        if attempt.succeeded && attempt.direct {
            if self.retry_store.contains(&id) {
                self.retry_store.remove(&id);
            }
            if self.transition(&receiver, id, MessageStatus::Delivered, output) {
                self.stats.messages_delivered += 1;
            }
        } else if attempt.succeeded {
            // Flooded copies stay queued until a direct send or a read receipt
            debug!(message_id = %id.short(), "flooded, still waiting for the receiver");
        } else if self.retry_store.contains(&id) {
            let attempts = self.retry_store.increment_attempt(&id);
            debug!(message_id = %id.short(), ?attempts, "retry attempt failed");
        } else {
            debug!(message_id = %id.short(), "every send failed, queueing");
            self.queue(attempt.message, self.clock.now());
            self.transition(&receiver, id, MessageStatus::Stored, output);
        }
    }

    /// Fail attempts whose outcomes never arrived
    fn settle_overdue(&mut self, now: Timestamp, output: &mut RouterOutput) {
        let timeout = self.config.retry.send_timeout();
        let overdue: Vec<MessageId> = self
            .attempts
            .iter()
            .filter(|(_, attempt)| now.duration_since(attempt.dispatched_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in overdue {
            let Some(attempt) = self.attempts.remove(&id) else {
                continue;
            };
            self.tickets.retain(|_, (ticket_id, _)| *ticket_id != id);
            warn!(
                message_id = %id.short(),
                outstanding = attempt.outstanding,
                "no send outcome reported, counting as failed"
            );
            self.settle(attempt, output);
        }
    }

    /// Periodic sweep: expire what ran out of time or attempts, re-dispatch
    /// what now has a route.
    pub fn retry_due(&mut self) -> RouterOutput {
        let now = self.clock.now();
        let mut output = RouterOutput::new();
        self.ledger.maintain(now);
        self.settle_overdue(now, &mut output);

        for entry in self.retry_store.dequeue_expired(now) {
            let id = entry.message_id();
            let receiver = entry.original_message.receiver.clone();
            if self.attempts.remove(&id).is_some() {
                self.tickets.retain(|_, (ticket_id, _)| *ticket_id != id);
            }

            self.stats.expired += 1;
            warn!(
                message_id = %id.short(),
                %receiver,
                attempts = entry.attempt_count,
                "delivery expired"
            );
            self.transition(&receiver, id, MessageStatus::Expired, &mut output);
            output.event(AppEvent::DeliveryExpired {
                id,
                receiver,
                attempts: entry.attempt_count,
            });
        }

        for entry in self.retry_store.pending(now) {
            let id = entry.message_id();
            if self.attempts.contains_key(&id) {
                continue;
            }

            let route = self.route_to(&entry.original_message.receiver);
            if route == Route::Unreachable {
                continue;
            }

            match WireFormat::encode(&entry.original_message) {
                Ok(data) => {
                    debug!(message_id = %id.short(), attempt = entry.attempt_count + 1, "retrying");
                    self.dispatch(&entry.original_message, data, &route, now, &mut output);
                }
                Err(e) => warn!(message_id = %id.short(), "failed to encode queued message: {}", e),
            }
        }
        output
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn route_to(&self, receiver: &PeerIdentity) -> Route {
        if let Some(handle) = self.peers.handle_for(receiver) {
            return Route::Direct(handle);
        }
        if self.config.router.flood_own_messages && !self.peers.is_empty() {
            return Route::Flood(self.peers.handles());
        }
        Route::Unreachable
    }

    fn dispatch(
        &mut self,
        message: &Message,
        data: Vec<u8>,
        route: &Route,
        now: Timestamp,
        output: &mut RouterOutput,
    ) {
        let handles = route.handles();
        for handle in &handles {
            let ticket = self.issue_ticket();
            self.tickets.insert(ticket, (message.id, *handle));
            output.effect(Effect::SendPacket {
                handle: *handle,
                data: data.clone(),
                ticket,
            });
        }

        self.attempts.insert(
            message.id,
            Attempt {
                message: message.clone(),
                outstanding: handles.len(),
                succeeded: false,
                direct: matches!(route, Route::Direct(_)),
                dispatched_at: now,
            },
        );
    }

    fn queue(&mut self, message: Message, now: Timestamp) {
        if self.retry_store.enqueue(message, now) {
            self.stats.queued += 1;
        }
    }

    fn issue_ticket(&mut self) -> SendTicket {
        self.next_ticket += 1;
        SendTicket::new(self.next_ticket)
    }

    fn record_own(
        &mut self,
        receiver: &PeerIdentity,
        message: Message,
        status: MessageStatus,
        now: Timestamp,
        output: &mut RouterOutput,
    ) {
        let id = message.id;
        if self.conversations.add_message(receiver, message, status, now) {
            output.event(AppEvent::StatusChanged {
                peer: receiver.clone(),
                id,
                status,
            });
            self.conversation_updated(receiver, now, output);
        }
    }

    /// Move an own message to `status`. Returns whether it changed.
    fn transition(
        &mut self,
        peer: &PeerIdentity,
        id: MessageId,
        status: MessageStatus,
        output: &mut RouterOutput,
    ) -> bool {
        let key = DedupKey::new(self.identity.clone(), id);
        match self.conversations.set_status(peer, &key, status) {
            Some(status) => {
                output.event(AppEvent::StatusChanged {
                    peer: peer.clone(),
                    id,
                    status,
                });
                true
            }
            None => false,
        }
    }

    fn conversation_updated(&self, peer: &PeerIdentity, now: Timestamp, output: &mut RouterOutput) {
        output.event(AppEvent::ConversationUpdated {
            peer: peer.clone(),
            message_count: self.conversations.entries_with(peer).len(),
            last_message_time: now.as_millis(),
        });
    }
}

impl<T: TimeSource> core::fmt::Debug for Router<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Router")
            .field("identity", &self.identity)
            .field("peers", &self.peers.len())
            .field("conversations", &self.conversations.len())
            .field("pending_retries", &self.retry_store.len())
            .field("in_flight", &self.tickets.len())
            .finish()
    }
}

//! Radio capability abstraction
//!
//! The raw radio driver is an external collaborator. The core only needs a
//! capability that can advertise, scan, connect and exchange byte packets, plus
//! an asynchronous stream of link events. Discovery and connection mechanics
//! stay behind this trait.

use async_trait::async_trait;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::types::{ConnectionHandle, PeerIdentity, Timestamp};
use crate::Result;

// ----------------------------------------------------------------------------
// Radio Trait
// ----------------------------------------------------------------------------

/// Short-range radio capability used by the radio task
#[async_trait]
pub trait Radio: Send {
    /// Start advertising this device. No-op if already advertising.
    async fn advertise(&mut self) -> Result<()>;

    /// Start scanning for nearby devices. No-op if already scanning.
    async fn scan(&mut self) -> Result<()>;

    /// Stop advertising and scanning
    async fn stop_discovery(&mut self) -> Result<()>;

    /// Open a link to a discoverable peer.
    ///
    /// Fails with `TransportError::PeerUnreachable` if the peer is not currently
    /// discoverable.
    async fn connect(&mut self, identity: &PeerIdentity) -> Result<ConnectionHandle>;

    /// Close a link. Unknown handles are ignored.
    async fn disconnect(&mut self, handle: ConnectionHandle) -> Result<()>;

    /// Send one packet over a link.
    ///
    /// Fails with `TransportError::LinkDown` if the handle is stale.
    async fn send(&mut self, handle: ConnectionHandle, bytes: Vec<u8>) -> Result<()>;

    /// Next link event, or `None` once the radio is shut down.
    ///
    /// Must be cancel safe: the radio task polls it inside `tokio::select!`.
    async fn next_event(&mut self) -> Option<RadioEvent>;

    /// Identities currently in range
    fn discovered_peers(&self) -> SmallVec<[PeerIdentity; 8]>;
}

// ----------------------------------------------------------------------------
// Radio Events
// ----------------------------------------------------------------------------

/// Asynchronous notifications produced by a radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A link to `identity` is up
    PeerAppeared {
        handle: ConnectionHandle,
        identity: PeerIdentity,
    },
    /// A packet arrived over a link
    Received {
        handle: ConnectionHandle,
        bytes: Vec<u8>,
    },
    /// A link went away
    PeerLost { handle: ConnectionHandle },
}

// ----------------------------------------------------------------------------
// Peer Directory
// ----------------------------------------------------------------------------

/// A peer with a live link, as seen by the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub identity: PeerIdentity,
    pub handle: ConnectionHandle,
    pub discovered_at: Timestamp,
}

/// Router-side view of the live links.
///
/// The radio owns the links; the directory only remembers which identity sits
/// behind which handle so the router can pick routes.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<ConnectionHandle, Peer>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live link. Returns `false` if the handle was already known.
    pub fn insert(&mut self, identity: PeerIdentity, handle: ConnectionHandle, now: Timestamp) -> bool {
        if self.peers.contains_key(&handle) {
            return false;
        }
        self.peers.insert(
            handle,
            Peer {
                identity,
                handle,
                discovered_at: now,
            },
        );
        true
    }

    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<Peer> {
        self.peers.remove(&handle)
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<&Peer> {
        self.peers.get(&handle)
    }

    pub fn identity_of(&self, handle: ConnectionHandle) -> Option<&PeerIdentity> {
        self.peers.get(&handle).map(|peer| &peer.identity)
    }

    /// Handle of the most recently discovered link to `identity`
    pub fn handle_for(&self, identity: &PeerIdentity) -> Option<ConnectionHandle> {
        self.peers
            .values()
            .filter(|peer| &peer.identity == identity)
            .max_by_key(|peer| (peer.discovered_at, peer.handle.value()))
            .map(|peer| peer.handle)
    }

    /// All live handles in ascending order
    pub fn handles(&self) -> SmallVec<[ConnectionHandle; 8]> {
        let mut handles: SmallVec<[ConnectionHandle; 8]> = self.peers.keys().copied().collect();
        handles.sort_by_key(|handle| handle.value());
        handles
    }

    /// Distinct identities with at least one live link
    pub fn identities(&self) -> Vec<PeerIdentity> {
        let mut identities: Vec<PeerIdentity> =
            self.peers.values().map(|peer| peer.identity.clone()).collect();
        identities.sort();
        identities.dedup();
        identities
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> PeerIdentity {
        PeerIdentity::new(name).unwrap()
    }

    #[test]
    fn test_directory_lookup() {
        let mut directory = PeerDirectory::new();
        assert!(directory.insert(identity("bob"), ConnectionHandle::new(1), Timestamp::new(0)));
        assert!(!directory.insert(identity("bob"), ConnectionHandle::new(1), Timestamp::new(5)));
        directory.insert(identity("carol"), ConnectionHandle::new(2), Timestamp::new(1));

        assert_eq!(directory.handle_for(&identity("bob")), Some(ConnectionHandle::new(1)));
        assert_eq!(directory.identity_of(ConnectionHandle::new(2)), Some(&identity("carol")));
        assert_eq!(directory.handle_for(&identity("dave")), None);
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_newest_link_wins() {
        let mut directory = PeerDirectory::new();
        directory.insert(identity("bob"), ConnectionHandle::new(1), Timestamp::new(0));
        directory.insert(identity("bob"), ConnectionHandle::new(4), Timestamp::new(10));

        assert_eq!(directory.handle_for(&identity("bob")), Some(ConnectionHandle::new(4)));
        assert_eq!(directory.identities(), vec![identity("bob")]);

        directory.remove(ConnectionHandle::new(4));
        assert_eq!(directory.handle_for(&identity("bob")), Some(ConnectionHandle::new(1)));
    }

    #[test]
    fn test_handles_sorted() {
        let mut directory = PeerDirectory::new();
        for value in [5, 2, 9] {
            directory.insert(identity("peer"), ConnectionHandle::new(value), Timestamp::new(0));
        }
        let handles: Vec<u64> = directory.handles().iter().map(|h| h.value()).collect();
        assert_eq!(handles, vec![2, 5, 9]);
    }
}

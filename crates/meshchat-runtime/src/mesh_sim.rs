//! Simulated radio mesh
//!
//! An in-process stand-in for the short-range radio. Every node gets a
//! `SimulatedRadio` from a shared `SimulatedMesh`; the test or CLI decides which
//! nodes are in range of each other with `link` and `unlink`. Packets hop across
//! a link through unbounded tokio channels, so delivery order on one link is
//! preserved and nothing is lost unless the link is torn down.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use meshchat_core::{
    ConnectionHandle, MeshChatError, PeerIdentity, Radio, RadioEvent, Result, TransportError,
};
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

// ----------------------------------------------------------------------------
// Mesh
// ----------------------------------------------------------------------------

/// Far end of one link, as seen from the owning node
#[derive(Debug, Clone)]
struct Endpoint {
    peer: PeerIdentity,
    peer_handle: ConnectionHandle,
}

#[derive(Default)]
struct MeshInner {
    radios: DashMap<PeerIdentity, mpsc::UnboundedSender<RadioEvent>>,
    links: DashMap<(PeerIdentity, ConnectionHandle), Endpoint>,
    next_handle: AtomicU64,
}

/// Shared medium connecting simulated radios
#[derive(Clone, Default)]
pub struct SimulatedMesh {
    inner: Arc<MeshInner>,
}

impl SimulatedMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node to the mesh and hand out its radio.
    ///
    /// Asking again for the same identity replaces the previous radio; links
    /// created for the old one keep their handles.
    pub fn radio(&self, identity: PeerIdentity) -> SimulatedRadio {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.radios.insert(identity.clone(), sender);
        debug!(%identity, "radio attached to simulated mesh");

        SimulatedRadio {
            identity,
            mesh: self.clone(),
            events: receiver,
            advertising: false,
            scanning: false,
        }
    }

    /// Bring `a` and `b` into range. Both sides see `PeerAppeared`.
    ///
    /// Linking two nodes that already share a link is a no-op.
    pub fn link(&self, a: &PeerIdentity, b: &PeerIdentity) -> Result<()> {
        if a == b {
            return Err(MeshChatError::InvalidIdentity {
                reason: "cannot link a node to itself".to_string(),
            });
        }
        for node in [a, b] {
            if !self.inner.radios.contains_key(node) {
                return Err(MeshChatError::peer_unreachable(node.as_str()));
            }
        }
        if self.handle_between(a, b).is_some() {
            return Ok(());
        }

        let handle_a = self.allocate_handle();
        let handle_b = self.allocate_handle();
        self.inner.links.insert(
            (a.clone(), handle_a),
            Endpoint {
                peer: b.clone(),
                peer_handle: handle_b,
            },
        );
        self.inner.links.insert(
            (b.clone(), handle_b),
            Endpoint {
                peer: a.clone(),
                peer_handle: handle_a,
            },
        );
        debug!(%a, %b, %handle_a, %handle_b, "link up");

        self.notify(
            a,
            RadioEvent::PeerAppeared {
                handle: handle_a,
                identity: b.clone(),
            },
        );
        self.notify(
            b,
            RadioEvent::PeerAppeared {
                handle: handle_b,
                identity: a.clone(),
            },
        );
        Ok(())
    }

    /// Take `a` and `b` out of range. Returns false if they were not linked.
    pub fn unlink(&self, a: &PeerIdentity, b: &PeerIdentity) -> bool {
        match self.handle_between(a, b) {
            Some(handle) => {
                self.tear_down(a, handle);
                true
            }
            None => false,
        }
    }

    /// Deliver raw bytes to `to` as if `from` had sent them over their link
    pub fn inject_raw(&self, from: &PeerIdentity, to: &PeerIdentity, bytes: Vec<u8>) -> Result<()> {
        let handle = self
            .handle_between(to, from)
            .ok_or_else(|| MeshChatError::peer_unreachable(from.as_str()))?;
        if self.notify(to, RadioEvent::Received { handle, bytes }) {
            Ok(())
        } else {
            Err(MeshChatError::link_down(handle))
        }
    }

    /// Whether `a` and `b` currently share a link
    pub fn are_linked(&self, a: &PeerIdentity, b: &PeerIdentity) -> bool {
        self.handle_between(a, b).is_some()
    }

    /// Identities linked to `node`, sorted
    pub fn neighbours(&self, node: &PeerIdentity) -> Vec<PeerIdentity> {
        let mut neighbours: Vec<PeerIdentity> = self
            .inner
            .links
            .iter()
            .filter(|entry| &entry.key().0 == node)
            .map(|entry| entry.value().peer.clone())
            .collect();
        neighbours.sort();
        neighbours.dedup();
        neighbours
    }

    fn allocate_handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.inner.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Handle `owner` uses for its link to `peer`
    fn handle_between(&self, owner: &PeerIdentity, peer: &PeerIdentity) -> Option<ConnectionHandle> {
        self.inner
            .links
            .iter()
            .find(|entry| &entry.key().0 == owner && &entry.value().peer == peer)
            .map(|entry| entry.key().1)
    }

    fn endpoint(&self, owner: &PeerIdentity, handle: ConnectionHandle) -> Option<Endpoint> {
        self.inner
            .links
            .get(&(owner.clone(), handle))
            .map(|entry| entry.value().clone())
    }

    /// Remove both ends of a link and tell both nodes
    fn tear_down(&self, owner: &PeerIdentity, handle: ConnectionHandle) {
        let Some((_, endpoint)) = self.inner.links.remove(&(owner.clone(), handle)) else {
            return;
        };
        self.inner
            .links
            .remove(&(endpoint.peer.clone(), endpoint.peer_handle));
        debug!(%owner, peer = %endpoint.peer, %handle, "link down");

        self.notify(owner, RadioEvent::PeerLost { handle });
        self.notify(
            &endpoint.peer,
            RadioEvent::PeerLost {
                handle: endpoint.peer_handle,
            },
        );
    }

    fn notify(&self, node: &PeerIdentity, event: RadioEvent) -> bool {
        match self.inner.radios.get(node) {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for SimulatedMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedMesh")
            .field("radios", &self.inner.radios.len())
            .field("link_ends", &self.inner.links.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Radio
// ----------------------------------------------------------------------------

/// One node's view of the simulated mesh
#[derive(Debug)]
pub struct SimulatedRadio {
    identity: PeerIdentity,
    mesh: SimulatedMesh,
    events: mpsc::UnboundedReceiver<RadioEvent>,
    advertising: bool,
    scanning: bool,
}

impl SimulatedRadio {
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    async fn advertise(&mut self) -> Result<()> {
        if !self.advertising {
            self.advertising = true;
            debug!(identity = %self.identity, "advertising");
        }
        Ok(())
    }

    async fn scan(&mut self) -> Result<()> {
        if !self.scanning {
            self.scanning = true;
            debug!(identity = %self.identity, "scanning");
        }
        Ok(())
    }

    async fn stop_discovery(&mut self) -> Result<()> {
        self.advertising = false;
        self.scanning = false;
        Ok(())
    }

    async fn connect(&mut self, identity: &PeerIdentity) -> Result<ConnectionHandle> {
        self.mesh
            .handle_between(&self.identity, identity)
            .ok_or_else(|| MeshChatError::peer_unreachable(identity.as_str()))
    }

    async fn disconnect(&mut self, handle: ConnectionHandle) -> Result<()> {
        self.mesh.tear_down(&self.identity, handle);
        Ok(())
    }

    async fn send(&mut self, handle: ConnectionHandle, bytes: Vec<u8>) -> Result<()> {
        let endpoint = self
            .mesh
            .endpoint(&self.identity, handle)
            .ok_or(TransportError::LinkDown { handle })?;

        trace!(
            from = %self.identity,
            to = %endpoint.peer,
            len = bytes.len(),
            "packet on air"
        );
        let delivered = self.mesh.notify(
            &endpoint.peer,
            RadioEvent::Received {
                handle: endpoint.peer_handle,
                bytes,
            },
        );
        if delivered {
            Ok(())
        } else {
            warn!(from = %self.identity, to = %endpoint.peer, "peer radio is gone");
            Err(MeshChatError::link_down(handle))
        }
    }

    async fn next_event(&mut self) -> Option<RadioEvent> {
        self.events.recv().await
    }

    fn discovered_peers(&self) -> SmallVec<[PeerIdentity; 8]> {
        self.mesh.neighbours(&self.identity).into_iter().collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

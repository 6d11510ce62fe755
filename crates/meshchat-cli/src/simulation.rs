//! A set of MeshChat nodes sharing one simulated mesh

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use meshchat_core::{AppEvent, MeshChatConfig, MessageId, PeerIdentity};
use meshchat_runtime::{MeshChatRuntime, RuntimeHandle, SimulatedMesh};
use tracing::{debug, warn};

/// Parse node names, rejecting invalid and repeated identities
pub fn parse_nodes(names: &[String]) -> Result<Vec<PeerIdentity>> {
    let mut identities: Vec<PeerIdentity> = Vec::with_capacity(names.len());
    for name in names {
        let identity = PeerIdentity::new(name.trim())
            .with_context(|| format!("invalid node name {:?}", name))?;
        if identities.contains(&identity) {
            bail!("node {} listed twice", identity);
        }
        identities.push(identity);
    }
    if identities.len() < 2 {
        bail!("a simulation needs at least two nodes");
    }
    Ok(identities)
}

pub struct Simulation {
    mesh: SimulatedMesh,
    order: Vec<PeerIdentity>,
    nodes: BTreeMap<PeerIdentity, RuntimeHandle>,
}

impl Simulation {
    /// Start one runtime per identity. Nodes begin out of range of each other.
    pub fn start(identities: Vec<PeerIdentity>, config: &MeshChatConfig) -> Result<Self> {
        let mesh = SimulatedMesh::new();
        let mut nodes = BTreeMap::new();
        for identity in &identities {
            let handle = MeshChatRuntime::builder(identity.clone())
                .config(config.clone())
                .start(mesh.radio(identity.clone()))
                .with_context(|| format!("failed to start node {}", identity))?;
            nodes.insert(identity.clone(), handle);
        }
        debug!(nodes = nodes.len(), "simulation started");
        Ok(Self {
            mesh,
            order: identities,
            nodes,
        })
    }

    pub fn identities(&self) -> &[PeerIdentity] {
        &self.order
    }

    /// Link consecutive nodes: a - b - c - ...
    pub fn link_line(&self) -> Result<()> {
        for pair in self.order.windows(2) {
            self.link(&pair[0], &pair[1])?;
        }
        Ok(())
    }

    pub fn link(&self, a: &PeerIdentity, b: &PeerIdentity) -> Result<()> {
        self.mesh
            .link(a, b)
            .with_context(|| format!("cannot link {} and {}", a, b))
    }

    pub fn unlink(&self, a: &PeerIdentity, b: &PeerIdentity) -> bool {
        self.mesh.unlink(a, b)
    }

    pub fn node(&self, identity: &PeerIdentity) -> Result<&RuntimeHandle> {
        self.nodes
            .get(identity)
            .ok_or_else(|| anyhow!("unknown node {}", identity))
    }

    pub async fn send(&self, from: &PeerIdentity, to: &PeerIdentity, text: &str) -> Result<MessageId> {
        let id = self.node(from)?.send_message(to.clone(), text).await?;
        Ok(id)
    }

    /// Every app event already waiting, tagged with the node that produced it
    pub fn drain_events(&mut self) -> Vec<(PeerIdentity, AppEvent)> {
        let mut events = Vec::new();
        for (identity, handle) in self.nodes.iter_mut() {
            while let Some(event) = handle.try_next_app_event() {
                events.push((identity.clone(), event));
            }
        }
        events
    }

    pub async fn shutdown(self) {
        for (identity, handle) in self.nodes {
            if let Err(e) = handle.shutdown().await {
                warn!(%identity, "node did not stop cleanly: {}", e);
            }
        }
    }
}

/// One-line human readable rendering of an app event
pub fn describe(event: &AppEvent) -> String {
    match event {
        AppEvent::MessageReceived { message } => {
            format!("message {} from {}: {}", message.id.short(), message.sender, message.text)
        }
        AppEvent::StatusChanged { peer, id, status } => {
            format!("message {} to {} is now {}", id.short(), peer, status)
        }
        AppEvent::ConversationUpdated {
            peer,
            message_count,
            ..
        } => format!("conversation with {} has {} messages", peer, message_count),
        AppEvent::ConversationSnapshot { peer, entries } => {
            let mut out = format!("history with {} ({} entries)", peer, entries.len());
            for entry in entries {
                out.push_str(&format!(
                    "\n    [{}] {} -> {}: {}",
                    entry.status, entry.message.sender, entry.message.receiver, entry.message.text
                ));
            }
            out
        }
        AppEvent::PeerConnected { identity, handle } => {
            format!("link {} up to {}", handle, identity)
        }
        AppEvent::PeerDisconnected { identity, handle } => {
            format!("link {} to {} lost", handle, identity)
        }
        AppEvent::MessageRelayed {
            id,
            sender,
            receiver,
            hop_count,
            fanout,
        } => format!(
            "relayed {} ({} -> {}) hop {} to {} link(s)",
            id.short(),
            sender,
            receiver,
            hop_count.map_or_else(|| "-".to_string(), |hops| hops.to_string()),
            fanout
        ),
        AppEvent::CorruptPacket { handle, reason } => {
            format!("dropped corrupt packet on link {}: {}", handle, reason)
        }
        AppEvent::DeliveryExpired {
            id,
            receiver,
            attempts,
        } => format!(
            "gave up on message {} to {} after {} attempts",
            id.short(),
            receiver,
            attempts
        ),
        AppEvent::SystemStatusReport { status } => format!(
            "{} links, {} conversations, {} pending, sent {} received {} relayed {}",
            status.connected_devices,
            status.conversations,
            status.pending_retries,
            status.stats.messages_sent,
            status.stats.messages_received,
            status.stats.messages_routed
        ),
        AppEvent::SystemError { error } => format!("error: {}", error),
    }
}

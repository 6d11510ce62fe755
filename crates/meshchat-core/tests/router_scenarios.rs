//! Router scenarios driven synchronously
//!
//! A tiny in-process mesh wires several routers together: every `SendPacket`
//! effect on a live link is answered with `SendCompleted` on the sending side and
//! `PacketReceived` on the other end; a send on an unknown link fails. A shared
//! manual clock makes expiry deterministic.

use std::collections::{HashMap, VecDeque};

use meshchat_core::{
    AppEvent, ConnectionHandle, ConversationEntry, Effect, Event, ManualClock, MemoryRecordStore,
    MeshChatConfig, MeshChatError, Message, MessageId, MessageKind, MessageStatus, PeerIdentity,
    RecordStore, Router, RouterOutput, StoredMessage, Timestamp, Ttl, WireFormat,
};

fn identity(name: &str) -> PeerIdentity {
    PeerIdentity::new(name).unwrap()
}

struct Node {
    router: Router<ManualClock>,
    links: HashMap<ConnectionHandle, (usize, ConnectionHandle)>,
    events: Vec<AppEvent>,
    sent_packets: usize,
}

struct Mesh {
    nodes: Vec<Node>,
    clock: ManualClock,
    next_handle: u64,
}

impl Mesh {
    fn new(names: &[&str]) -> Self {
        Self::with_config(names, MeshChatConfig::testing())
    }

    fn with_config(names: &[&str], config: MeshChatConfig) -> Self {
        let clock = ManualClock::new(Timestamp::new(1_700_000_000_000));
        let nodes = names
            .iter()
            .map(|name| Node {
                router: Router::new(identity(name), config.clone(), None, None, clock.clone())
                    .unwrap(),
                links: HashMap::new(),
                events: Vec::new(),
                sent_packets: 0,
            })
            .collect();
        Self {
            nodes,
            clock,
            next_handle: 0,
        }
    }

    fn router(&self, node: usize) -> &Router<ManualClock> {
        &self.nodes[node].router
    }

    fn link(&mut self, a: usize, b: usize) {
        self.next_handle += 1;
        let on_a = ConnectionHandle::new(self.next_handle);
        self.next_handle += 1;
        let on_b = ConnectionHandle::new(self.next_handle);

        self.nodes[a].links.insert(on_a, (b, on_b));
        self.nodes[b].links.insert(on_b, (a, on_a));

        let identity_a = self.router(a).identity().clone();
        let identity_b = self.router(b).identity().clone();
        // Both ends learn about the link before any packet flows over it
        let output_a = self.nodes[a]
            .router
            .handle_event(Event::PeerAppeared { handle: on_a, identity: identity_b });
        let output_b = self.nodes[b]
            .router
            .handle_event(Event::PeerAppeared { handle: on_b, identity: identity_a });
        self.pump(a, output_a);
        self.pump(b, output_b);
    }

    fn send(&mut self, node: usize, id: u128, to: &str, text: &str) -> MessageId {
        let id = MessageId::from_u128(id);
        let output = self.nodes[node]
            .router
            .send_message(id, identity(to), text.into())
            .unwrap();
        self.pump(node, output);
        id
    }

    fn feed(&mut self, node: usize, event: Event) {
        let output = self.nodes[node].router.handle_event(event);
        self.pump(node, output);
    }

    fn sweep(&mut self, node: usize) {
        let output = self.nodes[node].router.retry_due();
        self.pump(node, output);
    }

    fn pump(&mut self, node: usize, output: RouterOutput) {
        let mut queue: VecDeque<(usize, Event)> = VecDeque::new();
        self.absorb(node, output, &mut queue);

        while let Some((target, event)) = queue.pop_front() {
            let output = self.nodes[target].router.handle_event(event);
            self.absorb(target, output, &mut queue);
        }
    }

    fn absorb(&mut self, node: usize, output: RouterOutput, queue: &mut VecDeque<(usize, Event)>) {
        let (effects, app_events) = output.into_parts();
        self.nodes[node].events.extend(app_events);

        for effect in effects {
            if let Effect::SendPacket { handle, data, ticket } = effect {
                self.nodes[node].sent_packets += 1;
                match self.nodes[node].links.get(&handle) {
                    Some(&(peer, peer_handle)) => {
                        queue.push_back((node, Event::SendCompleted { ticket }));
                        queue.push_back((peer, Event::PacketReceived { handle: peer_handle, data }));
                    }
                    None => queue.push_back((
                        node,
                        Event::SendFailed {
                            ticket,
                            reason: "link down".into(),
                        },
                    )),
                }
            }
        }
    }

    fn relay_count(&self, node: usize) -> usize {
        self.nodes[node]
            .events
            .iter()
            .filter(|event| matches!(event, AppEvent::MessageRelayed { .. }))
            .count()
    }
}

#[test]
fn queued_message_is_delivered_when_receiver_connects() {
    let mut mesh = Mesh::new(&["A", "B"]);

    let id = mesh.send(0, 1, "B", "hi");
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Stored));
    assert!(mesh.router(0).retry_store().contains(&id));

    mesh.clock.advance_secs(120);
    mesh.link(0, 1);

    assert!(!mesh.router(0).retry_store().contains(&id));
    // B read it and acknowledged
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Read));

    let received = mesh.router(1).conversation(&identity("A"));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text, "hi");
    assert_eq!(received[0].sender, identity("A"));
}

#[test]
fn relay_forwards_without_local_delivery() {
    let mut mesh = Mesh::new(&["A", "B", "C"]);
    mesh.link(0, 1);
    mesh.link(1, 2);

    let id = mesh.send(0, 1, "C", "hi");

    // B only forwarded it
    assert!(mesh.router(1).conversations().is_empty());
    assert_eq!(mesh.router(1).stats().messages_routed, 2);

    let received = mesh.router(2).conversation(&identity("A"));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, id);
    assert_eq!(received[0].hop_count, Some(1));
    assert_eq!(received[0].ttl, Some(Ttl::new(Ttl::DEFAULT.value() - 1)));

    // The read receipt came back over B without a new conversation entry
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Read));
    assert_eq!(mesh.router(0).conversation(&identity("C")).len(), 1);
}

#[test]
fn relayed_copy_keeps_id_sender_and_text() {
    let mut mesh = Mesh::new(&["A", "B", "C"]);
    mesh.link(0, 1);
    mesh.link(1, 2);
    mesh.send(0, 7, "C", "over the hill");

    let relayed = mesh.nodes[1]
        .events
        .iter()
        .find_map(|event| match event {
            AppEvent::MessageRelayed { id, sender, receiver, hop_count, .. } => {
                Some((*id, sender.clone(), receiver.clone(), *hop_count))
            }
            _ => None,
        })
        .unwrap();

    assert_eq!(
        relayed,
        (MessageId::from_u128(7), identity("A"), identity("C"), Some(1))
    );
    assert_eq!(
        mesh.router(2).conversation(&identity("A"))[0].text,
        "over the hill"
    );
}

#[test]
fn duplicate_copies_are_processed_once() {
    let mut mesh = Mesh::new(&["A", "B", "C"]);
    mesh.link(0, 1);
    mesh.link(1, 2);

    let message = Message::data(
        MessageId::from_u128(99),
        identity("A"),
        identity("D"),
        "anyone?".into(),
        Ttl::DEFAULT,
    );
    let data = WireFormat::encode(&message).unwrap();
    let from_a = *mesh.nodes[1]
        .links
        .iter()
        .find(|(_, (peer, _))| *peer == 0)
        .unwrap()
        .0;

    for _ in 0..5 {
        mesh.feed(1, Event::PacketReceived { handle: from_a, data: data.clone() });
    }

    assert_eq!(mesh.relay_count(1), 1);
    assert_eq!(mesh.router(1).stats().duplicates_dropped, 4);
    // C saw one copy and has no onward link
    assert_eq!(mesh.relay_count(2), 0);
}

#[test]
fn message_for_self_is_delivered_once_and_never_relayed() {
    let mut mesh = Mesh::new(&["A", "B", "C"]);
    mesh.link(0, 1);
    mesh.link(1, 2);

    let message = Message::data(
        MessageId::from_u128(3),
        identity("A"),
        identity("B"),
        "for you".into(),
        Ttl::DEFAULT,
    );
    let data = WireFormat::encode(&message).unwrap();
    let from_a = *mesh.nodes[1]
        .links
        .iter()
        .find(|(_, (peer, _))| *peer == 0)
        .unwrap()
        .0;

    for _ in 0..3 {
        mesh.feed(1, Event::PacketReceived { handle: from_a, data: data.clone() });
    }

    assert_eq!(mesh.router(1).conversation(&identity("A")).len(), 1);
    assert_eq!(mesh.relay_count(1), 0);
    assert!(mesh.router(2).conversations().is_empty());
}

#[test]
fn relay_skips_arrival_link_and_floods_the_rest() {
    let mut mesh = Mesh::new(&["A", "B", "C", "D"]);
    mesh.link(0, 1);
    mesh.link(1, 2);
    mesh.link(1, 3);

    mesh.send(0, 11, "E", "where are you");

    let fanout: Vec<usize> = mesh.nodes[1]
        .events
        .iter()
        .filter_map(|event| match event {
            AppEvent::MessageRelayed { fanout, .. } => Some(*fanout),
            _ => None,
        })
        .collect();
    assert_eq!(fanout, vec![2]);
    assert_eq!(mesh.router(0).stats().messages_routed, 0);
}

#[test]
fn relay_reaches_receiver_and_other_neighbours() {
    let mut mesh = Mesh::new(&["A", "B", "C", "D"]);
    mesh.link(0, 1);
    mesh.link(1, 2);
    mesh.link(1, 3);

    let id = mesh.send(0, 21, "C", "hello C");

    let data_fanout: Vec<usize> = mesh.nodes[1]
        .events
        .iter()
        .filter_map(|event| match event {
            AppEvent::MessageRelayed { id: relayed, sender, fanout, .. }
                if *relayed == id && *sender == identity("A") =>
            {
                Some(*fanout)
            }
            _ => None,
        })
        .collect();
    // C is one of B's links, D still gets a copy
    assert_eq!(data_fanout, vec![2]);
    assert_eq!(mesh.router(2).conversation(&identity("A")).len(), 1);
    assert!(mesh.router(3).conversations().is_empty());
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Read));
}

#[test]
fn queued_message_follows_receiver_that_links_to_a_neighbour_later() {
    let mut mesh = Mesh::new(&["A", "B", "C"]);
    mesh.link(0, 2);

    let id = mesh.send(0, 31, "B", "catch you later");
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Stored));
    assert!(mesh.router(0).retry_store().contains(&id));
    // C had nowhere to forward it
    assert_eq!(mesh.relay_count(2), 0);

    mesh.clock.advance_secs(60);
    mesh.link(2, 1);
    assert!(mesh.router(1).conversations().is_empty());

    mesh.sweep(0);

    let received = mesh.router(1).conversation(&identity("A"));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, id);
    assert_eq!(received[0].hop_count, Some(1));
    // The read receipt came back through C
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Read));
    assert!(!mesh.router(0).retry_store().contains(&id));
}

#[test]
fn flooded_message_is_retried_until_acknowledged() {
    let mut config = MeshChatConfig::testing();
    config.router.read_receipts_enabled = false;
    let mut mesh = Mesh::with_config(&["A", "C"], config);
    mesh.link(0, 1);

    let id = mesh.send(0, 41, "B", "still looking");
    let after_send = mesh.nodes[0].sent_packets;
    mesh.sweep(0);
    mesh.sweep(0);

    assert_eq!(mesh.nodes[0].sent_packets, after_send + 2);
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Stored));
    assert_eq!(mesh.router(0).retry_store().get(&id).unwrap().attempt_count, 0);

    mesh.clock.advance_secs(601);
    mesh.sweep(0);
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Expired));
}

#[test]
fn cycles_terminate() {
    let mut mesh = Mesh::new(&["A", "B", "C"]);
    mesh.link(0, 1);
    mesh.link(1, 2);
    mesh.link(2, 0);

    mesh.send(0, 5, "Z", "loop");

    assert_eq!(mesh.relay_count(1), 1);
    assert_eq!(mesh.relay_count(2), 1);
    assert!(mesh.router(1).stats().duplicates_dropped + mesh.router(2).stats().duplicates_dropped >= 1);
}

#[test]
fn queued_message_expires_after_retry_window() {
    let mut mesh = Mesh::new(&["A"]);
    let id = mesh.send(0, 1, "B", "anyone");

    mesh.clock.advance_secs(600);
    mesh.sweep(0);
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Stored));

    mesh.clock.advance_secs(1);
    mesh.sweep(0);
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Expired));
    assert!(!mesh.router(0).retry_store().contains(&id));
    assert!(mesh.nodes[0].events.iter().any(|event| matches!(
        event,
        AppEvent::DeliveryExpired { id: expired, .. } if *expired == id
    )));
    assert_eq!(mesh.router(0).stats().expired, 1);
}

#[test]
fn failing_sends_expire_after_max_attempts() {
    let mut mesh = Mesh::new(&["A"]);
    // A believes B is connected but the link is dead
    mesh.feed(
        0,
        Event::PeerAppeared {
            handle: ConnectionHandle::new(77),
            identity: identity("B"),
        },
    );

    let id = mesh.send(0, 1, "B", "hello?");
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Stored));

    for attempt in 1..=10 {
        mesh.sweep(0);
        assert_eq!(mesh.router(0).retry_store().get(&id).unwrap().attempt_count, attempt);
    }

    mesh.sweep(0);
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Expired));
    assert!(mesh.router(0).retry_store().is_empty());
}

#[test]
fn read_receipts_can_be_disabled() {
    let mut config = MeshChatConfig::testing();
    config.router.read_receipts_enabled = false;
    let mut mesh = Mesh::with_config(&["A", "B"], config);
    mesh.link(0, 1);

    let id = mesh.send(0, 1, "B", "quiet");
    assert_eq!(mesh.router(0).status_of(id), Some(MessageStatus::Delivered));
    assert_eq!(mesh.router(1).stats().read_receipts_sent, 0);
    assert_eq!(mesh.nodes[1].sent_packets, 0);
}

#[test]
fn read_ack_does_not_create_conversation_entry() {
    let mut mesh = Mesh::new(&["A", "B"]);
    mesh.link(0, 1);
    let id = mesh.send(0, 1, "B", "ping");

    let entries = mesh.router(0).conversations().entries_with(&identity("B")).to_vec();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, MessageStatus::Read);
    assert_eq!(entries[0].message.kind, MessageKind::Data);
    assert_eq!(entries[0].message.id, id);
}

#[test]
fn too_long_message_produces_no_activity() {
    let mut mesh = Mesh::new(&["A", "B"]);
    mesh.link(0, 1);
    let before = mesh.nodes[0].sent_packets;

    let result = mesh.nodes[0].router.send_message(
        MessageId::from_u128(1),
        identity("B"),
        "a".repeat(261),
    );

    assert!(matches!(result, Err(MeshChatError::MessageTooLong { length: 261, .. })));
    assert_eq!(mesh.nodes[0].sent_packets, before);
    assert!(mesh.router(0).retry_store().is_empty());
    assert!(mesh.router(0).conversations().is_empty());
}

#[test]
fn corrupt_packet_does_not_disturb_routing() {
    let mut mesh = Mesh::new(&["A", "B"]);
    mesh.link(0, 1);
    let from_a = *mesh.nodes[1].links.keys().next().unwrap();

    mesh.feed(1, Event::PacketReceived { handle: from_a, data: vec![9, 9, 9] });
    assert_eq!(mesh.router(1).stats().corrupt_packets, 1);

    mesh.send(0, 1, "B", "still works");
    assert_eq!(mesh.router(1).conversation(&identity("A")).len(), 1);
}

#[test]
fn conversations_are_restored_on_startup() {
    let mut store = MemoryRecordStore::new();
    for (sequence, text) in ["earlier", "later"].iter().enumerate() {
        store
            .insert(ConversationEntry {
                peer: identity("B"),
                message: Message::data(
                    MessageId::from_u128(sequence as u128 + 1),
                    identity("B"),
                    identity("A"),
                    text.to_string(),
                    Ttl::DEFAULT,
                ),
                status: MessageStatus::Delivered,
                recorded_at: Timestamp::new(1_000 + sequence as u64),
                sequence: sequence as u64,
            })
            .unwrap();
    }

    let router = Router::new(
        identity("A"),
        MeshChatConfig::testing(),
        None,
        Some(Box::new(store)),
        ManualClock::default(),
    )
    .unwrap();

    let texts: Vec<String> = router
        .conversation(&identity("B"))
        .into_iter()
        .map(|message| message.text)
        .collect();
    assert_eq!(texts, vec!["earlier", "later"]);
}

#[test]
fn persistence_failure_is_not_fatal() {
    let mut backing: MemoryRecordStore<StoredMessage> = MemoryRecordStore::new();
    backing.set_fail_writes(true);

    let mut router = Router::new(
        identity("A"),
        MeshChatConfig::testing(),
        Some(Box::new(backing)),
        None,
        ManualClock::default(),
    )
    .unwrap();

    let id = MessageId::from_u128(1);
    let output = router.send_message(id, identity("B"), "lost".into()).unwrap();

    assert!(output.effects.is_empty());
    assert!(router.retry_store().is_empty());
    assert_eq!(router.status_of(id), Some(MessageStatus::Stored));
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut config = MeshChatConfig::testing();
    config.dedup.capacity = 0;

    let result = Router::new(identity("A"), config, None, None, ManualClock::default());
    assert!(matches!(result, Err(MeshChatError::Configuration { .. })));
}

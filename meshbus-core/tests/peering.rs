//! Handshake, teardown, and status emission.

mod common;

use common::*;
use meshbus_core::config::CoreConfig;
use meshbus_core::error::CoreError;
use meshbus_core::filter::filter_of;
use meshbus_core::ids::{NodeId, StreamId};
use meshbus_core::mailbox::{reply_channel, CoreMsg, UnpeerTarget};
use meshbus_core::network::{AddressBook, NetworkAddress};
use meshbus_core::peer::PeerStatus;
use meshbus_core::protocol::Frame;

#[test]
fn handshake_reaches_peered_on_both_sides() {
    let log1 = EventLog::new();
    let log2 = EventLog::new();
    let mut e1 = core(1);
    e1.add_observer(log1.recorder());
    let mut e2 = core(2);
    e2.add_observer(log2.recorder());

    let info = connect(&mut e1, &mut e2).unwrap();
    assert_eq!(info.node, e2.node());
    assert_eq!(info.status, PeerStatus::Peered);
    assert_eq!(e1.governor().status_of(e2.node()), Some(PeerStatus::Peered));
    assert_eq!(e2.governor().status_of(e1.node()), Some(PeerStatus::Peered));

    let codes1 = status_codes(&log1);
    assert_eq!(codes1, vec!["endpoint_discovered", "peer_added"]);
    let codes2 = status_codes(&log2);
    assert_eq!(codes2, vec!["endpoint_discovered", "peer_added"]);
}

#[test]
fn peering_is_idempotent() {
    let mut e1 = core(1);
    let mut e2 = core(2);
    connect(&mut e1, &mut e2).unwrap();

    // A second request completes immediately against the existing entry.
    let info = connect(&mut e1, &mut e2).unwrap();
    assert_eq!(info.status, PeerStatus::Peered);
    assert_eq!(e1.governor().peer_infos().len(), 1);
    assert_eq!(e2.governor().peer_infos().len(), 1);
}

#[test]
fn crossed_handshakes_collapse_into_one_peering() {
    let mut e1 = core(1);
    let mut e2 = core(2);

    // Both sides request each other before any frame is processed.
    let (r1, rx1) = reply_channel();
    e1.handle()
        .deliver(CoreMsg::PeerToHandle {
            peer: e2.handle(),
            reply: r1,
        })
        .unwrap();
    let (r2, rx2) = reply_channel();
    e2.handle()
        .deliver(CoreMsg::PeerToHandle {
            peer: e1.handle(),
            reply: r2,
        })
        .unwrap();
    pump(&mut [&mut e1, &mut e2]);

    assert_eq!(rx1.try_recv().unwrap().unwrap().status, PeerStatus::Peered);
    assert_eq!(rx2.try_recv().unwrap().unwrap().status, PeerStatus::Peered);
    assert_eq!(e1.governor().peer_infos().len(), 1);
    assert_eq!(e2.governor().peer_infos().len(), 1);
}

#[test]
fn await_peer_completes_on_handshake() {
    let mut e1 = core(1);
    let mut e2 = core(2);

    let (reply, waited) = reply_channel();
    e1.handle()
        .deliver(CoreMsg::AwaitPeer {
            node: e2.node(),
            reply,
        })
        .unwrap();
    e1.run_to_idle();
    assert!(waited.try_recv().is_err());

    connect(&mut e1, &mut e2).unwrap();
    let info = waited.try_recv().expect("await_peer never completed");
    assert_eq!(info.node, e2.node());
}

#[test]
fn unpeer_unknown_peer_fails_with_peer_invalid() {
    let log = EventLog::new();
    let mut e1 = core(1);
    e1.add_observer(log.recorder());

    let (reply, rx) = reply_channel();
    e1.handle()
        .deliver(CoreMsg::Unpeer {
            target: UnpeerTarget::Node(NodeId::from_raw(0xDEAD)),
            reply,
        })
        .unwrap();
    e1.run_to_idle();

    assert!(matches!(
        rx.try_recv().unwrap(),
        Err(CoreError::PeerInvalid(_))
    ));
    assert!(status_codes(&log).contains(&"peer_invalid".to_string()));
}

#[test]
fn unpeer_discards_buffered_messages_and_notifies_both_sides() {
    let log1 = EventLog::new();
    let log2 = EventLog::new();
    let mut e1 = core(1);
    e1.add_observer(log1.recorder());
    let mut e2 = core(2);
    e2.add_observer(log2.recorder());
    subscribe(&mut e2, ["t"]);
    // A slow consumer pins E2's credit window: 4 + min_buffer_size.
    let (s2, rx2) = attach_worker(&mut e2, 4);
    connect(&mut e1, &mut e2).unwrap();

    // Publish without letting E2 run: everything beyond the 9-message
    // window stays buffered on the outgoing path.
    for i in 0..30u64 {
        publish(&e1, "t", i);
    }
    e1.run_to_idle();

    let (reply, rx) = reply_channel();
    e1.handle()
        .deliver(CoreMsg::Unpeer {
            target: UnpeerTarget::Node(e2.node()),
            reply,
        })
        .unwrap();
    pump(&mut [&mut e1, &mut e2]);

    rx.try_recv().unwrap().unwrap();
    assert!(!e1.governor().has_peer(e2.node()));
    assert!(!e2.governor().has_peer(e1.node()));
    assert!(status_codes(&log1).contains(&"peer_removed".to_string()));
    assert!(status_codes(&log2).contains(&"peer_lost".to_string()));

    // Only the in-flight window arrived; the buffered 21 were discarded.
    let mut received = Vec::new();
    for _ in 0..8 {
        received.extend(drain_acked(&e2, s2, &rx2));
        pump(&mut [&mut e1, &mut e2]);
    }
    assert_eq!(received.len(), 9);
}

#[test]
fn peer_by_address_resolves_through_the_book() {
    let book = AddressBook::new();
    let mut e1 = core_with(
        CoreConfig::new()
            .with_node(NodeId::from_raw(1))
            .with_book(book.clone()),
    );
    let mut e2 = core_with(
        CoreConfig::new()
            .with_node(NodeId::from_raw(2))
            .with_book(book.clone())
            .with_listen(NetworkAddress::new("node-b", 9999)),
    );

    let (reply, rx) = reply_channel();
    e1.handle()
        .deliver(CoreMsg::PeerToAddress {
            addr: NetworkAddress::new("node-b", 9999),
            reply,
        })
        .unwrap();
    pump(&mut [&mut e1, &mut e2]);

    let info = rx.try_recv().unwrap().unwrap();
    assert_eq!(info.node, e2.node());
    assert_eq!(info.address, Some(NetworkAddress::new("node-b", 9999)));
}

#[test]
fn peer_to_unknown_address_fails_immediately() {
    let log = EventLog::new();
    let mut e1 = core_with(
        CoreConfig::new()
            .with_node(NodeId::from_raw(1))
            .with_book(AddressBook::new()),
    );
    e1.add_observer(log.recorder());

    let (reply, rx) = reply_channel();
    e1.handle()
        .deliver(CoreMsg::PeerToAddress {
            addr: NetworkAddress::new("nowhere", 1),
            reply,
        })
        .unwrap();
    e1.run_to_idle();

    assert!(matches!(
        rx.try_recv().unwrap(),
        Err(CoreError::PeerUnavailable(_))
    ));
    assert!(status_codes(&log).contains(&"peer_unavailable".to_string()));
}

#[test]
fn credit_overrun_drops_the_offending_peer() {
    let log = EventLog::new();
    let mut e1 = core(1);
    e1.add_observer(log.recorder());
    let mut e2 = core(2);
    connect(&mut e1, &mut e2).unwrap();

    // Find the sid E2 pushes to E1 on, then overrun the window from a
    // hand-rolled frame: far more messages than any credit grant allows.
    let e2_out: Vec<_> = (0..1000u64)
        .map(|i| meshbus_core::message::DataMessage::data("t", i))
        .collect();
    let sid = e2_sid_at_e1(&e2);
    e1.handle()
        .deliver(CoreMsg::FromPeer {
            from: e2.handle(),
            frame: Frame::Batch {
                sid,
                batch_id: 1,
                messages: e2_out,
            },
        })
        .unwrap();
    e1.run_to_idle();

    assert!(!e1.governor().has_peer(e2.node()));
    assert!(status_codes(&log).contains(&"peer_incompatible".to_string()));
}

#[test]
fn unknown_stream_id_is_a_protocol_violation() {
    let log = EventLog::new();
    let mut e1 = core(1);
    e1.add_observer(log.recorder());
    let mut e2 = core(2);
    connect(&mut e1, &mut e2).unwrap();

    e1.handle()
        .deliver(CoreMsg::FromPeer {
            from: e2.handle(),
            frame: Frame::Batch {
                sid: StreamId::new(NodeId::from_raw(0xBAD), 1),
                batch_id: 1,
                messages: vec![],
            },
        })
        .unwrap();
    e1.run_to_idle();

    assert!(!e1.governor().has_peer(e2.node()));
    assert!(status_codes(&log).contains(&"peer_incompatible".to_string()));
}

#[test]
fn no_events_suppresses_reserved_topic_shipping() {
    let mut e1 = core(1);
    subscribe(&mut e1, ["broker"]);
    let (sink, rx) = attach_worker(&mut e1, 32);
    e1.handle().deliver(CoreMsg::NoEvents).unwrap();
    e1.run_to_idle();

    // Suppress E2's shipping as well, otherwise its statuses would still
    // travel over to E1 as ordinary data.
    let mut e2 = core(2);
    e2.handle().deliver(CoreMsg::NoEvents).unwrap();
    e2.run_to_idle();
    connect(&mut e1, &mut e2).unwrap();

    // Without the suppression this would carry discovered/added statuses.
    assert!(drain_acked(&e1, sink, &rx).is_empty());
}

#[test]
fn statuses_ship_on_the_reserved_topic() {
    let mut e1 = core(1);
    subscribe(&mut e1, ["broker/statuses"]);
    let (sink, rx) = attach_worker(&mut e1, 32);

    let mut e2 = core(2);
    connect(&mut e1, &mut e2).unwrap();

    let got = drain_acked(&e1, sink, &rx);
    assert!(!got.is_empty());
    assert!(got.iter().all(|m| m.topic.as_str() == "broker/statuses"));
}

/// The stream id `e2` pushes to `e1` on. Stream ids are allocated from a
/// per-endpoint counter: workers, stores, then the first peer downstream.
fn e2_sid_at_e1(e2: &meshbus_core::actor::Core) -> StreamId {
    StreamId::new(e2.node(), 3)
}

#[test]
fn subscribing_reuses_the_existing_handshake_state() {
    let mut e1 = core(1);
    let mut e2 = core(2);
    connect(&mut e1, &mut e2).unwrap();

    subscribe(&mut e1, ["a"]);
    subscribe(&mut e1, ["a/b"]);
    pump(&mut [&mut e1, &mut e2]);

    let infos = e2.governor().peer_infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].filter, filter_of(["a"]));
}

#[test]
fn duplicate_hello_with_conflicting_filter_reports_peer_invalid() {
    let log = EventLog::new();
    let mut e1 = core(1);
    e1.add_observer(log.recorder());
    let mut e2 = core(2);
    subscribe(&mut e2, ["real/topic"]);
    connect(&mut e1, &mut e2).unwrap();

    // Re-send a HELLO pretending e2 wants a different filter.
    e1.handle()
        .deliver(CoreMsg::FromPeer {
            from: e2.handle(),
            frame: Frame::Hello {
                node: e2.node(),
                filter: filter_of(["conflicting"]),
            },
        })
        .unwrap();
    e1.run_to_idle();

    // The duplicate is dropped; the peering survives.
    assert_eq!(e1.governor().status_of(e2.node()), Some(PeerStatus::Peered));
    assert!(status_codes(&log).contains(&"peer_invalid".to_string()));
}

#[test]
fn handshake_frames_follow_the_protocol_order() {
    let mut e1 = core(1);
    let scripted = ScriptedPeer::new(0xB0B);

    let (reply, _rx) = reply_channel();
    e1.handle()
        .deliver(CoreMsg::PeerToHandle {
            peer: scripted.handle.clone(),
            reply,
        })
        .unwrap();
    e1.run_to_idle();

    // Step 0: the initiator sends HELLO.
    let frames = scripted.frames();
    assert!(matches!(frames.as_slice(), [Frame::Hello { .. }]));

    // Step 1: the responder announces its downstream.
    let their_sid = StreamId::new(scripted.handle.node(), 1);
    e1.handle()
        .deliver(CoreMsg::FromPeer {
            from: scripted.handle.clone(),
            frame: Frame::HelloAck {
                node: scripted.handle.node(),
                filter: filter_of(["t"]),
                sid: their_sid,
            },
        })
        .unwrap();
    e1.run_to_idle();

    // Steps 2-3: confirm + initial grant + reverse open.
    let frames = scripted.frames();
    assert!(matches!(frames[0], Frame::AckOpen { sid } if sid == their_sid));
    assert!(
        matches!(frames[1], Frame::BatchAck { sid, batch_id: 0, .. } if sid == their_sid),
        "initial credit grant must reference batch 0"
    );
    let Frame::Open { sid: our_sid } = frames[2] else {
        panic!("expected OPEN, got {:?}", frames[2]);
    };

    e1.handle()
        .deliver(CoreMsg::FromPeer {
            from: scripted.handle.clone(),
            frame: Frame::AckOpen { sid: our_sid },
        })
        .unwrap();
    e1.run_to_idle();

    assert_eq!(
        e1.governor().status_of(scripted.handle.node()),
        Some(PeerStatus::Peered)
    );
}

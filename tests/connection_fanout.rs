//! Connection fan-out integration tests
//!
//! Every live connection of a consultation sees the same frames in
//! persistence order, and connects or disconnects racing with sends
//! neither lose nor duplicate messages.

mod common;

use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use uuid::Uuid;

use quickconsult::auth::{Identity, Role};
use quickconsult::consultation::{MessageLog, SessionRegistry};
use quickconsult::realtime::frames::{codes, MessageFrame};
use quickconsult::realtime::{ConnectionManager, OutboundFrame};
use quickconsult::store::{MessageRepository, SqliteStore};

use common::Fixture;

struct Room {
    f: Fixture,
    client: Identity,
    expert: Identity,
    id: Uuid,
}

fn room() -> Room {
    let f = Fixture::new();
    let client = f.identity("client@example.com", Role::Client);
    let expert = f.identity("expert@example.com", Role::Expert);
    let id = f
        .state
        .registry
        .create(client.id, expert.id, "Need AWS help")
        .unwrap()
        .consultation
        .id;
    Room {
        f,
        client,
        expert,
        id,
    }
}

fn drain(receiver: &mut mpsc::Receiver<OutboundFrame>) -> Vec<MessageFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = receiver.try_recv() {
        match frame {
            OutboundFrame::Message(message) => frames.push(message),
            OutboundFrame::Error(e) => panic!("unexpected error frame: {:?}", e),
        }
    }
    frames
}

fn ids(frames: &[MessageFrame]) -> Vec<Uuid> {
    frames.iter().map(|m| m.id).collect()
}

#[test]
fn test_every_handle_gets_every_frame_in_order() {
    let r = room();
    let connections = &r.f.state.connections;

    let mut client_tab_a = connections.connect(r.id, r.client.id).unwrap();
    let mut client_tab_b = connections.connect(r.id, r.client.id).unwrap();
    let mut expert = connections.connect(r.id, r.expert.id).unwrap();
    assert_eq!(connections.live_handles(r.id), 3);
    assert_eq!(expert.history.len(), 1);

    for i in 0..5 {
        let report = connections
            .send(r.id, r.client.id, &format!("message {}", i))
            .unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.dropped, 0);
    }

    let a = drain(&mut client_tab_a.receiver);
    let b = drain(&mut client_tab_b.receiver);
    let e = drain(&mut expert.receiver);
    assert_eq!(a.len(), 5);
    assert_eq!(a, b);
    assert_eq!(a, e);

    let stored: Vec<_> = r.f.store.list_messages(r.id).unwrap()[1..]
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids(&a), stored);
}

#[test]
fn test_sender_receives_own_message() {
    let r = room();
    let mut client = r.f.state.connections.connect(r.id, r.client.id).unwrap();

    let report = client.guard.send("Budget is $5k").unwrap();
    let frames = drain(&mut client.receiver);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].id, report.message.id);
    assert_eq!(frames[0].sender_id, r.client.id);
}

#[test]
fn test_dropped_guard_unregisters_exactly_once() {
    let r = room();
    let connections = &r.f.state.connections;

    let first = connections.connect(r.id, r.client.id).unwrap();
    let second = connections.connect(r.id, r.client.id).unwrap();
    let handle = first.guard.handle_id();
    assert_eq!(connections.live_handles(r.id), 2);

    drop(first);
    assert_eq!(connections.live_handles(r.id), 1);
    assert!(!connections.disconnect(r.id, r.client.id, handle));

    drop(second);
    assert_eq!(connections.live_handles(r.id), 0);
    assert_eq!(connections.partition_count(), 0);
}

#[test]
fn test_closing_notice_is_last_frame() {
    let r = room();
    let connections = &r.f.state.connections;
    let mut expert = connections.connect(r.id, r.expert.id).unwrap();

    connections.send(r.id, r.client.id, "Thanks").unwrap();
    connections.close(r.id, r.client.id).unwrap();
    assert!(connections.send(r.id, r.expert.id, "After close").is_err());

    let frames = drain(&mut expert.receiver);
    let contents: Vec<_> = frames.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["Thanks", "Consultation closed"]);
}

#[test]
fn test_send_after_close_maps_to_session_closed_frame() {
    let r = room();
    let connections = &r.f.state.connections;
    let expert = connections.connect(r.id, r.expert.id).unwrap();
    connections.close(r.id, r.client.id).unwrap();

    let err = expert.guard.send("Too late").unwrap_err();
    match OutboundFrame::from(&err) {
        OutboundFrame::Error(frame) => assert_eq!(frame.error.code, codes::SESSION_CLOSED),
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[test]
fn test_connect_after_close_refused() {
    let r = room();
    r.f.state.connections.close(r.id, r.client.id).unwrap();
    assert!(r.f.state.connections.connect(r.id, r.expert.id).is_err());
    assert_eq!(r.f.state.connections.partition_count(), 0);
}

#[test]
fn test_slow_consumer_dropped_without_blocking_others() {
    let r = room();
    let store: Arc<SqliteStore> = r.f.store.clone();
    let log = Arc::new(MessageLog::new(store.clone(), 1024));
    let registry = Arc::new(SessionRegistry::new(store, log.clone()));
    let connections = Arc::new(ConnectionManager::new(registry, log, 2));

    let mut fast = connections.connect(r.id, r.client.id).unwrap();
    let mut slow = connections.connect(r.id, r.expert.id).unwrap();

    let mut fast_frames = Vec::new();
    let mut dropped = 0;
    for i in 0..4 {
        let report = connections.send(r.id, r.client.id, &format!("m{}", i)).unwrap();
        dropped += report.dropped;
        fast_frames.extend(drain(&mut fast.receiver));
    }

    assert_eq!(dropped, 1);
    assert_eq!(fast_frames.len(), 4);
    assert_eq!(connections.live_handles(r.id), 1);

    // The slow connection keeps what was queued, then sees the end
    assert_eq!(drain(&mut slow.receiver).len(), 2);
    assert!(slow.receiver.try_recv().is_err());
}

#[test]
fn test_history_and_live_frames_never_overlap() {
    let r = room();
    let connections = Arc::clone(&r.f.state.connections);
    let sender = r.client.id;
    let id = r.id;

    let writer = {
        let connections = Arc::clone(&connections);
        thread::spawn(move || {
            for i in 0..40 {
                connections.send(id, sender, &format!("burst {}", i)).unwrap();
            }
        })
    };

    // Join midway through the burst, repeatedly
    let mut joined = Vec::new();
    for _ in 0..5 {
        joined.push(connections.connect(id, r.expert.id).unwrap());
        thread::yield_now();
    }
    writer.join().unwrap();

    let stored: Vec<_> = r
        .f
        .store
        .list_messages(id)
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(stored.len(), 41);

    for mut connection in joined {
        let mut seen: Vec<_> = connection.history.iter().map(|m| m.id).collect();
        seen.extend(ids(&drain(&mut connection.receiver)));
        assert_eq!(seen, stored);
    }
}

#[test]
fn test_disconnects_racing_with_broadcast() {
    let r = room();
    let connections = Arc::clone(&r.f.state.connections);
    let id = r.id;
    let client = r.client.id;
    let expert = r.expert.id;

    let mut stable = connections.connect(id, client).unwrap();

    let churn = {
        let connections = Arc::clone(&connections);
        thread::spawn(move || {
            for _ in 0..50 {
                let connection = connections.connect(id, expert).unwrap();
                thread::yield_now();
                drop(connection);
            }
        })
    };

    let writer = {
        let connections = Arc::clone(&connections);
        thread::spawn(move || {
            for i in 0..30 {
                connections.send(id, client, &format!("tick {}", i)).unwrap();
            }
        })
    };

    churn.join().unwrap();
    writer.join().unwrap();

    let frames = drain(&mut stable.receiver);
    let contents: Vec<_> = frames.iter().map(|m| m.content.clone()).collect();
    let expected: Vec<_> = (0..30).map(|i| format!("tick {}", i)).collect();
    assert_eq!(contents, expected);
    assert_eq!(connections.live_handles(id), 1);

    drop(stable);
    assert_eq!(connections.partition_count(), 0);
}

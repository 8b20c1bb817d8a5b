//! Multi-node propagation tests over the in-process substrate and TCP.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gossip_mesh::{
    BroadcastMessage, DEFAULT_WINDOW_AFTER, DEFAULT_WINDOW_BEFORE, Envelope, EventCapture,
    EventKind, Identity, METRICS_TOPIC, MemoryNetwork, MemoryTransport, MessageId, NodeRuntime,
    PubSub, RuntimeConfig, TcpTransport, ValidationResult, neighbor_window,
};
use test_case::test_case;

struct Peer {
    transport: Arc<MemoryTransport>,
    runtime: NodeRuntime,
    log: EventCapture,
}

async fn spawn_peer(net: &MemoryNetwork) -> Peer {
    let log = EventCapture::new();
    let transport = Arc::new(net.listen(&Identity::generate()));
    let runtime = NodeRuntime::start(transport.clone(), log.logger(), RuntimeConfig::default())
        .await
        .unwrap();
    Peer {
        transport,
        runtime,
        log,
    }
}

/// Starts `n` peers and has each dial its bootstrap window.
async fn mesh(net: &MemoryNetwork, n: usize) -> Vec<Peer> {
    let mut peers = Vec::with_capacity(n);
    for _ in 0..n {
        peers.push(spawn_peer(net).await);
    }
    let addrs: Vec<String> = peers
        .iter()
        .map(|p| p.transport.addr().to_string())
        .collect();
    for (i, peer) in peers.iter().enumerate() {
        let window: Vec<&String> =
            neighbor_window(i, &addrs, DEFAULT_WINDOW_BEFORE, DEFAULT_WINDOW_AFTER);
        let report = peer.runtime.bootstrap(&window).await;
        assert_eq!(report.failed(), 0);
    }
    peers
}

/// Connects `n` peers in a single cycle.
async fn ring(net: &MemoryNetwork, n: usize) -> Vec<Peer> {
    let mut peers = Vec::with_capacity(n);
    for _ in 0..n {
        peers.push(spawn_peer(net).await);
    }
    for i in 0..n {
        let next = peers[(i + 1) % n].transport.addr();
        peers[i].transport.connect(&next).await.unwrap();
    }
    peers
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn received_ids(log: &EventCapture) -> Vec<String> {
    log.events_of(EventKind::MessageReceived)
        .into_iter()
        .filter_map(|e| e.msg_id)
        .collect()
}

async fn stop_all(peers: &[Peer]) {
    for p in peers {
        p.runtime.shutdown().await;
    }
}

#[test_case(2 ; "pair")]
#[test_case(5 ; "five nodes")]
#[test_case(8 ; "eight nodes")]
#[tokio::test]
async fn broadcast_reaches_every_other_node_once(n: usize) {
    let net = MemoryNetwork::new();
    let peers = mesh(&net, n).await;

    let ack = peers[0]
        .runtime
        .broadcast_message(BroadcastMessage::new("abc"))
        .await
        .unwrap();
    assert_eq!(ack.msg_id, "abc");

    let all_arrived =
        wait_until(|| peers[1..].iter().all(|p| !received_ids(&p.log).is_empty())).await;
    assert!(all_arrived, "broadcast did not reach every node");
    tokio::time::sleep(Duration::from_millis(50)).await;

    for p in &peers[1..] {
        assert_eq!(received_ids(&p.log), vec!["abc".to_string()]);
        let event = &p.log.events_of(EventKind::MessageReceived)[0];
        assert_eq!(
            event.sender,
            Some(peers[0].runtime.local_peer_id().to_string())
        );
    }
    assert!(peers[0].log.events_of(EventKind::MessageReceived).is_empty());
    assert_eq!(peers[0].log.events_of(EventKind::MessageBroadcast).len(), 1);

    stop_all(&peers).await;
}

#[tokio::test]
async fn originator_never_logs_its_own_message_around_a_cycle() {
    let net = MemoryNetwork::new();
    let peers = ring(&net, 4).await;

    let ack = peers[2].runtime.broadcast().await.unwrap();

    let arrived = wait_until(|| {
        peers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 2)
            .all(|(_, p)| received_ids(&p.log) == vec![ack.msg_id.clone()])
    })
    .await;
    assert!(arrived);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(received_ids(&peers[2].log).is_empty());
    assert!(peers[2].runtime.stats().self_suppressed() >= 1);
    for (i, p) in peers.iter().enumerate() {
        if i != 2 {
            assert_eq!(received_ids(&p.log).len(), 1);
        }
    }

    stop_all(&peers).await;
}

#[tokio::test]
async fn malformed_metrics_are_dropped_at_the_first_hop() {
    let net = MemoryNetwork::new();
    let peers = mesh(&net, 3).await;
    let rogue = Identity::generate().peer_id();
    let garbage = vec![0xffu8; 12];

    assert_eq!(
        peers[1].runtime.engine().validate(METRICS_TOPIC, &garbage),
        ValidationResult::Reject
    );

    let envelope = Envelope::new(rogue, MessageId::new(), METRICS_TOPIC, garbage);
    let forwarded = net
        .inject(&peers[1].runtime.local_peer_id(), rogue, envelope)
        .unwrap();
    assert!(!forwarded);

    tokio::time::sleep(Duration::from_millis(50)).await;
    for p in &peers {
        assert!(p.log.events().is_empty());
    }

    stop_all(&peers).await;
}

#[tokio::test]
async fn concurrent_triggers_get_distinct_ids() {
    let net = MemoryNetwork::new();
    let peers = mesh(&net, 2).await;
    let origin = &peers[0].runtime;

    let (a, b) = tokio::join!(origin.broadcast(), origin.broadcast());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.msg_id, b.msg_id);
    assert!(uuid::Uuid::parse_str(&a.msg_id).is_ok());

    let sent: HashSet<String> = peers[0]
        .log
        .events_of(EventKind::MessageBroadcast)
        .into_iter()
        .filter_map(|e| e.msg_id)
        .collect();
    assert_eq!(sent, HashSet::from([a.msg_id.clone(), b.msg_id.clone()]));

    assert!(wait_until(|| received_ids(&peers[1].log).len() == 2).await);
    let got: HashSet<String> = received_ids(&peers[1].log).into_iter().collect();
    assert_eq!(got, sent);

    stop_all(&peers).await;
}

#[tokio::test]
async fn shutdown_is_the_last_event() {
    let net = MemoryNetwork::new();
    let peers = mesh(&net, 2).await;
    peers[0].runtime.broadcast().await.unwrap();
    stop_all(&peers).await;

    let events = peers[0].log.events();
    assert_eq!(events.last().map(|e| e.event), Some(EventKind::Shutdown));
    let stamps: Vec<i64> = events.iter().map(|e| e.timestamp_ns).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn broadcast_crosses_tcp_links() {
    let log_a = EventCapture::new();
    let log_b = EventCapture::new();
    let loopback = "127.0.0.1:0".parse().unwrap();

    let ta = Arc::new(TcpTransport::bind(&Identity::generate(), loopback).await.unwrap());
    let tb = Arc::new(TcpTransport::bind(&Identity::generate(), loopback).await.unwrap());
    let a = NodeRuntime::start(ta.clone(), log_a.logger(), RuntimeConfig::default())
        .await
        .unwrap();
    let b = NodeRuntime::start(tb.clone(), log_b.logger(), RuntimeConfig::default())
        .await
        .unwrap();

    let report = b.bootstrap(&[ta.addr().to_string()]).await;
    assert_eq!(report.connected(), 1);
    assert!(wait_until(|| ta.peers().len() == 1).await);

    let ack = a.broadcast().await.unwrap();
    assert!(wait_until(|| received_ids(&log_b).len() == 1).await);
    assert_eq!(received_ids(&log_b), vec![ack.msg_id]);
    assert!(received_ids(&log_a).is_empty());

    a.shutdown().await;
    b.shutdown().await;
}

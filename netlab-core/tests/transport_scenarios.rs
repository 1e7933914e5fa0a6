//! End-to-end scenarios over the full stack: physical substrate, link
//! framing, network routing through a real router, and the reliable
//! transport on top (§8's literal scenarios S1, S2, S3, S5). S4 and S6 are
//! exercised at the unit level instead; see `connection.rs` and
//! `network.rs`'s test modules, and `DESIGN.md`'s "Known scope limits".

use netlab_core::addr::{Port, Vip};
use netlab_core::node::Node;
use netlab_core::physical::{retransmit_timeout, ChannelProfile};
use netlab_core::shutdown::Shutdown;
use netlab_core::topology::{NodeBinding, Topology};
use netlab_core::transport::{Multiplexer, RetryPolicy};
use std::time::Duration;

/// Builds a four-node topology (router, server, two hosts) on a distinct
/// block of loopback ports so concurrently-running tests don't collide.
fn topology(base_port: u16) -> Topology {
    Topology {
        router: "ROUTER".to_string(),
        nodes: vec![
            NodeBinding { vip: "ROUTER".to_string(), mac: [2, 0, 0, 0, 0, 0], port: base_port },
            NodeBinding { vip: "SERVER".to_string(), mac: [2, 0, 0, 0, 0, 1], port: base_port + 1 },
            NodeBinding { vip: "HOST_A".to_string(), mac: [2, 0, 0, 0, 0, 2], port: base_port + 2 },
            NodeBinding { vip: "HOST_B".to_string(), mac: [2, 0, 0, 0, 0, 3], port: base_port + 3 },
        ],
    }
}

async fn bring_up(
    topology: &Topology,
    profile: ChannelProfile,
) -> (std::sync::Arc<Multiplexer>, std::sync::Arc<Multiplexer>, Shutdown) {
    Node::bind_router(topology, profile).await.unwrap();

    let shutdown = Shutdown::new();
    let retry = RetryPolicy::unbounded(retransmit_timeout(&profile));

    let a = Node::bind(topology, &Vip::new("HOST_A"), profile).await.unwrap();
    let b = Node::bind(topology, &Vip::new("HOST_B"), profile).await.unwrap();
    let mux_a = Multiplexer::spawn(a.host, retry, shutdown.clone());
    let mux_b = Multiplexer::spawn(b.host, retry, shutdown.clone());
    (mux_a, mux_b, shutdown)
}

#[tokio::test]
async fn s1_lossless_text_exchange() {
    let topo = topology(21000);
    let (mux_a, mux_b, _shutdown) = bring_up(&topo, ChannelProfile::RELIABLE).await;

    let local_a = Port::new(10000).unwrap();
    let local_b = Port::new(10002).unwrap();

    let accept_b = {
        let mux_b = mux_b.clone();
        tokio::spawn(async move { mux_b.accept(local_b).await.unwrap() })
    };
    let conn_a = mux_a.connect(Vip::new("HOST_B"), local_b, local_a).await.unwrap();
    let conn_b = accept_b.await.unwrap();

    let payload = br#"{"type":"text","sender":"HOST_A","recipient":"HOST_B","timestamp":0,"content":"hi"}"#;
    conn_a.send(payload).await.unwrap();

    let received = conn_b.receive().await.unwrap().unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn s2_fragmentation() {
    let topo = topology(21010);
    let (mux_a, mux_b, _shutdown) = bring_up(&topo, ChannelProfile::RELIABLE).await;

    let local_a = Port::new(10000).unwrap();
    let local_b = Port::new(10002).unwrap();

    let accept_b = {
        let mux_b = mux_b.clone();
        tokio::spawn(async move { mux_b.accept(local_b).await.unwrap() })
    };
    let conn_a = mux_a.connect(Vip::new("HOST_B"), local_b, local_a).await.unwrap();
    let conn_b = accept_b.await.unwrap();

    let payload = vec![b'x'; 10_000];
    let sender = {
        let payload = payload.clone();
        tokio::spawn(async move { conn_a.send(&payload).await.unwrap() })
    };

    let received = conn_b.receive().await.unwrap().unwrap();
    sender.await.unwrap();
    assert_eq!(received.len(), 10_000);
    assert_eq!(received, payload);
}

#[tokio::test]
async fn s3_channel_drops_half_of_segments() {
    let topo = topology(21020);
    let profile = ChannelProfile::lossy(0.5);
    let (mux_a, mux_b, _shutdown) = bring_up(&topo, profile).await;

    let local_a = Port::new(10000).unwrap();
    let local_b = Port::new(10002).unwrap();

    let accept_b = {
        let mux_b = mux_b.clone();
        tokio::spawn(async move { mux_b.accept(local_b).await.unwrap() })
    };
    let conn_a = mux_a.connect(Vip::new("HOST_B"), local_b, local_a).await.unwrap();
    let conn_b = accept_b.await.unwrap();

    let payload = b"hi despite the noise".to_vec();
    let sender = {
        let payload = payload.clone();
        tokio::spawn(async move { conn_a.send(&payload).await.unwrap() })
    };

    let received = tokio::time::timeout(Duration::from_secs(30), conn_b.receive())
        .await
        .expect("message should eventually arrive despite loss")
        .unwrap()
        .unwrap();
    sender.await.unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn s5_graceful_shutdown() {
    let topo = topology(21030);
    let (mux_a, mux_b, _shutdown) = bring_up(&topo, ChannelProfile::RELIABLE).await;

    let local_a = Port::new(10000).unwrap();
    let local_b = Port::new(10002).unwrap();

    let accept_b = {
        let mux_b = mux_b.clone();
        tokio::spawn(async move { mux_b.accept(local_b).await.unwrap() })
    };
    let conn_a = mux_a.connect(Vip::new("HOST_B"), local_b, local_a).await.unwrap();
    let conn_b = accept_b.await.unwrap();

    let closer = tokio::spawn(async move { conn_a.close().await.unwrap() });
    conn_b.close().await.unwrap();
    closer.await.unwrap();
}

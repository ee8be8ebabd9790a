//! Integration tests for the TCP server and client bootstrap.

use peerlink_core::{net, MethodTable, Payload, PeerOptions, PeerServer};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

fn api() -> Arc<MethodTable> {
    Arc::new(
        MethodTable::builder()
            .method("add", |a: i64, b: i64| a + b)
            .method("multiply", |a: f64, b: f64| a * b)
            .build(),
    )
}

#[tokio::test]
async fn test_clients_call_server_over_tcp() {
    let handle = PeerServer::start("127.0.0.1:0", api(), PeerOptions::default())
        .await
        .unwrap();

    let first = net::connect(handle.addr(), Arc::new(MethodTable::empty()), PeerOptions::default())
        .await
        .unwrap();
    let second = net::connect(handle.addr(), Arc::new(MethodTable::empty()), PeerOptions::default())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        first.send_sync_request("add", vec![json!(40), json!(2)], false),
        second.send_sync_request("multiply", vec![json!(2.5), json!(2.0)], false),
    );
    assert_eq!(a.unwrap(), Payload::Result(json!(42)));
    assert_eq!(b.unwrap(), Payload::Result(json!(5.0)));
    assert_eq!(handle.peers().len(), 2);
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let handle = PeerServer::start("127.0.0.1:0", api(), PeerOptions::default())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut clients = Vec::new();
    for name in ["left", "right"] {
        let tx = tx.clone();
        let methods = Arc::new(
            MethodTable::builder()
                .method("tick", move |n: i64| {
                    let _ = tx.send((name, n));
                })
                .build(),
        );
        clients.push(
            net::connect(handle.addr(), methods, PeerOptions::default())
                .await
                .unwrap(),
        );
    }
    drop(tx);

    while handle.peers().len() < 2 {
        tokio::task::yield_now().await;
    }

    let delivered = handle.broadcast_notification("tick", vec![json!(9)]).await;
    assert_eq!(delivered, 2);

    let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    seen.sort();
    assert_eq!(seen, vec![("left", 9), ("right", 9)]);
}

#[tokio::test]
async fn test_server_shutdown_disconnects_clients() {
    let mut handle = PeerServer::start("127.0.0.1:0", api(), PeerOptions::default())
        .await
        .unwrap();
    let client = net::connect(handle.addr(), Arc::new(MethodTable::empty()), PeerOptions::default())
        .await
        .unwrap();

    // Round trip once so the server has registered the connection.
    client
        .send_sync_request("add", vec![json!(1), json!(1)], false)
        .await
        .unwrap();

    handle.shutdown();
    client.closed().await;
    assert!(!client.is_running());
}

//! TCP listener that turns every accepted connection into a [`Peer`].
//!
//! Each connection gets its own reader task (owned by the peer). The server
//! keeps the live peers in a [`PeerSet`] keyed by remote address and drops
//! them from the set as soon as their reader stops.

use crate::config::{PeerConfig, PeerOptions};
use crate::error::Result;
use crate::fanout::PeerSet;
use crate::methods::MethodTable;
use crate::peer::Peer;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Handle to a running server. Dropping shuts it down.
pub struct PeerServerHandle {
    addr: SocketAddr,
    peers: Arc<PeerSet>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PeerServerHandle {
    /// Address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Peers currently connected.
    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    /// Send a notification to every connected peer.
    pub async fn broadcast_notification(&self, method: &str, params: Vec<Value>) -> usize {
        self.peers.broadcast_notification(method, params).await
    }

    /// Stop accepting connections and stop every connected peer.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        for peer in self.peers.snapshot() {
            peer.shutdown();
        }
    }
}

impl Drop for PeerServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for PeerServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerServerHandle")
            .field("addr", &self.addr)
            .field("peers", &self.peers.len())
            .finish()
    }
}

/// Accepts connections and serves `methods` on each of them.
pub struct PeerServer;

impl PeerServer {
    /// Bind `addr` and start the accept loop in the background.
    pub async fn start<A: ToSocketAddrs>(
        addr: A,
        methods: Arc<MethodTable>,
        options: PeerOptions,
    ) -> Result<PeerServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!("Peer server listening on {}", addr);

        let peers = Arc::new(PeerSet::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            methods,
            options,
            peers.clone(),
            shutdown_rx,
        ));

        Ok(PeerServerHandle {
            addr,
            peers,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        methods: Arc<MethodTable>,
        options: PeerOptions,
        peers: Arc<PeerSet>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Peer server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, remote)) => {
                            if peers.len() >= PeerConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    remote,
                                    PeerConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            info!("Client connected from {}", remote);
                            let peer = Peer::from_tcp(stream, methods.clone(), options.clone());
                            if !peers.add(remote, peer.clone()) {
                                peer.shutdown();
                                continue;
                            }

                            let peers = peers.clone();
                            tokio::spawn(async move {
                                peer.closed().await;
                                peers.remove(remote);
                                debug!("Client {} removed", remote);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        for peer in peers.snapshot() {
            peer.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    fn methods() -> Arc<MethodTable> {
        Arc::new(
            MethodTable::builder()
                .method("add", |a: i64, b: i64| a + b)
                .build(),
        )
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = PeerServer::start("127.0.0.1:0", methods(), PeerOptions::default())
            .await
            .unwrap();

        assert!(handle.addr().port() > 0);
        assert_eq!(handle.addr().ip(), std::net::Ipv4Addr::LOCALHOST);
        assert!(handle.peers().is_empty());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_answers_raw_client() {
        let handle = PeerServer::start("127.0.0.1:0", methods(), PeerOptions::default())
            .await
            .unwrap();

        let stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"add\",\"params\":[2,3],\"id\":7}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply, json!({"jsonrpc": "2.0", "result": 5, "id": 7}));
        assert_eq!(handle.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnected_client_is_removed() {
        let handle = PeerServer::start("127.0.0.1:0", methods(), PeerOptions::default())
            .await
            .unwrap();

        let stream = TcpStream::connect(handle.addr()).await.unwrap();
        let local = stream.local_addr().unwrap();
        while handle.peers().get_by_addr(local).is_none() {
            tokio::task::yield_now().await;
        }

        let peer = handle.peers().get_by_addr(local).unwrap();
        drop(stream);
        peer.closed().await;
        while handle.peers().contains(local) {
            tokio::task::yield_now().await;
        }
        assert!(handle.peers().is_empty());
    }
}

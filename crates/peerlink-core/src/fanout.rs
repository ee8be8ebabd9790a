//! Server-side collection of connected peers.

use crate::peer::Peer;
use futures::future::join_all;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Insertion-ordered set of peers keyed by remote address.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: RwLock<Vec<(SocketAddr, Peer)>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<(SocketAddr, Peer)>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<(SocketAddr, Peer)>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `peer` under `addr`. Returns `false` if that address is already present.
    pub fn add(&self, addr: SocketAddr, peer: Peer) -> bool {
        let mut peers = self.write();
        if peers.iter().any(|(known, _)| *known == addr) {
            debug!("Peer {} already registered", addr);
            return false;
        }
        peers.push((addr, peer));
        true
    }

    pub fn remove(&self, addr: SocketAddr) -> Option<Peer> {
        let mut peers = self.write();
        let index = peers.iter().position(|(known, _)| *known == addr)?;
        Some(peers.remove(index).1)
    }

    pub fn get(&self, index: usize) -> Option<Peer> {
        self.read().get(index).map(|(_, peer)| peer.clone())
    }

    pub fn get_by_addr(&self, addr: SocketAddr) -> Option<Peer> {
        self.read()
            .iter()
            .find(|(known, _)| *known == addr)
            .map(|(_, peer)| peer.clone())
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.read().iter().any(|(known, _)| *known == addr)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Current peers in insertion order.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.read().iter().map(|(_, peer)| peer.clone()).collect()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.read().iter().map(|(addr, _)| *addr).collect()
    }

    /// Notify every current peer. A failing peer does not stop the others.
    ///
    /// Returns how many peers accepted the notification.
    pub async fn broadcast_notification(&self, method: &str, params: Vec<Value>) -> usize {
        let targets: Vec<(SocketAddr, Peer)> = self.read().clone();
        let sends = targets.iter().map(|(addr, peer)| {
            let params = params.clone();
            async move {
                match peer.send_notification(method, params).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Broadcast of {} to {} failed: {}", method, addr, e);
                        false
                    }
                }
            }
        });

        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        debug!(
            "Broadcast {} reached {}/{} peer(s)",
            method,
            delivered,
            targets.len()
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerOptions;
    use crate::methods::MethodTable;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn duplex_peer() -> (Peer, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let peer = Peer::from_stream(local, Arc::new(MethodTable::empty()), PeerOptions::default());
        (peer, remote)
    }

    #[tokio::test]
    async fn test_add_suppresses_duplicates() {
        let set = PeerSet::new();
        let (a, _ra) = duplex_peer();
        let (b, _rb) = duplex_peer();

        assert!(set.add(addr(1000), a.clone()));
        assert!(!set.add(addr(1000), b.clone()));
        assert!(set.add(addr(1001), b));
        assert_eq!(set.len(), 2);
        assert_eq!(set.addrs(), vec![addr(1000), addr(1001)]);

        assert!(set.remove(addr(1000)).is_some());
        assert!(set.remove(addr(1000)).is_none());
        assert!(!set.contains(addr(1000)));
        assert!(set.get(0).is_some());
        assert!(set.get(1).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_skips_failed_peers() {
        let set = PeerSet::new();
        let (alive, remote) = duplex_peer();
        let (dead, _dead_remote) = duplex_peer();
        dead.shutdown();
        dead.closed().await;

        set.add(addr(2000), alive);
        set.add(addr(2001), dead);

        let delivered = set.broadcast_notification("tick", vec![json!(1)]).await;
        assert_eq!(delivered, 1);

        let mut lines = BufReader::new(remote).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let message: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(message, json!({"jsonrpc": "2.0", "method": "tick", "params": [1]}));
    }
}

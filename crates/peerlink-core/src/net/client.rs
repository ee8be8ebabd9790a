//! Outbound TCP connection setup.

use crate::config::{PeerConfig, PeerOptions};
use crate::error::{PeerError, Result};
use crate::methods::MethodTable;
use crate::peer::Peer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::info;

/// Connect to `addr` and start a peer serving `methods` on the connection.
///
/// Gives up after `PeerConfig::CONNECT_TIMEOUT`.
pub async fn connect(
    addr: SocketAddr,
    methods: Arc<MethodTable>,
    options: PeerOptions,
) -> Result<Peer> {
    let stream = tokio::time::timeout(PeerConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| PeerError::ConnectFailed {
            addr,
            message: format!("timed out after {:?}", PeerConfig::CONNECT_TIMEOUT),
        })?
        .map_err(|e| PeerError::ConnectFailed {
            addr,
            message: e.to_string(),
        })?;

    info!("Connected to {}", addr);
    Ok(Peer::from_tcp(stream, methods, options))
}

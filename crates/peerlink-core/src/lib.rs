//! Peerlink Core - Bidirectional JSON-RPC 2.0 peers over persistent streams.
//!
//! Both ends of a connection are full peers: each serves the methods of its
//! own [`MethodTable`] and can call the other side, with requests, responses
//! and notifications interleaved in either direction on the same stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use peerlink_core::{net, CallbackMethod, MethodTable, Payload, PeerOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> peerlink_core::Result<()> {
//!     let methods = Arc::new(MethodTable::empty());
//!     let peer = net::connect("127.0.0.1:4444".parse().unwrap(), methods, PeerOptions::default()).await?;
//!
//!     // Suspend until the answer arrives
//!     let product = peer.send_sync_request("multiply", vec![json!(3.0), json!(7.0)], false).await?;
//!     println!("3 * 7 = {:?}", product.result());
//!
//!     // Hand the answer to a callback instead
//!     let cb = CallbackMethod::bind(|payload: Payload| println!("{:?}", payload), vec![])?;
//!     peer.send_async_request("add", vec![json!(1), json!(2)], cb, false).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod config;
pub mod error;
pub mod fanout;
pub mod methods;
pub mod net;
pub mod peer;
pub mod pending;
pub mod protocol;

// Re-export commonly used types
pub use callback::{CallbackMethod, Payload, RemoteError};
pub use config::{PeerConfig, PeerOptions};
pub use error::{ErrorCode, PeerError, Result};
pub use fanout::PeerSet;
pub use methods::{
    DispatchError, HandlerError, Json, MethodEntry, MethodTable, MethodTableBuilder, ParamType,
};
pub use net::{PeerServer, PeerServerHandle};
pub use peer::Peer;
pub use pending::{PendingKind, PendingRegistry};
pub use protocol::{Message, RequestId};

//! TCP bootstrap around the transport-agnostic peer engine.
//!
//! - **Server**: accepts connections, one [`Peer`](crate::Peer) per socket, tracked in a `PeerSet`
//! - **Client**: connects out and returns a running peer

pub mod client;
pub mod server;

pub use client::connect;
pub use server::{PeerServer, PeerServerHandle};

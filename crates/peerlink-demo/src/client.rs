//! Demo client: one synchronous call, then two callback-driven calls.

use crate::api::client_api;
use anyhow::{Context, Result};
use peerlink_core::{net, CallbackMethod, Payload, PeerOptions};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Free-function callback for the addition.
pub fn handle_addition(payload: Payload) {
    match payload {
        Payload::Result(sum) => info!("The result of the addition is {}", sum),
        Payload::Error(err) => warn!("Remote error while adding: {}", err.message),
    }
}

/// Receiver for time callbacks; counts what it has reported.
#[derive(Debug, Default)]
pub struct TimeReporter {
    reported: AtomicUsize,
}

impl TimeReporter {
    pub fn handle_time(&self, place: String, payload: Payload) {
        match payload {
            Payload::Result(millis) => {
                self.reported.fetch_add(1, Ordering::Relaxed);
                info!("The current time in {} is {}", place, millis);
            }
            Payload::Error(err) => warn!("Remote error while asking the time: {}", err.message),
        }
    }

    pub fn reported(&self) -> usize {
        self.reported.load(Ordering::Relaxed)
    }
}

pub async fn run(addr: SocketAddr) -> Result<()> {
    let peer = net::connect(addr, Arc::new(client_api()), PeerOptions::default())
        .await
        .with_context(|| format!("connecting to {}", addr))?;

    let product = peer
        .send_sync_request("multiply", vec![json!(1.4), json!(2.0)], true)
        .await?;
    match product {
        Payload::Result(value) => info!("The result of the multiplication is {}", value),
        Payload::Error(err) => warn!("Remote error while multiplying: {}", err.message),
    }

    let add_cb = CallbackMethod::bind(handle_addition, vec![])?;
    peer.send_async_request("add", vec![json!(987), json!(1234)], add_cb, true)
        .await?;

    let reporter = Arc::new(TimeReporter::default());
    let time_cb =
        CallbackMethod::bind_method(reporter.clone(), TimeReporter::handle_time, vec![json!("Toulouse")])?;
    if !peer
        .send_async_request("gimme_the_time", vec![], time_cb, false)
        .await?
    {
        warn!("No request identifier available for gimme_the_time");
    }

    // Give the callbacks a chance to run before hanging up.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while peer.pending_requests() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    peer.shutdown();
    peer.closed().await;
    info!("Time reported {} time(s)", reporter.reported());
    Ok(())
}

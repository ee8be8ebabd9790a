//! The peer engine.
//!
//! A [`Peer`] owns one bidirectional byte stream. A single reader task pulls
//! newline-framed messages off the stream and processes each to completion:
//! requests and notifications go through the method table, responses are
//! routed to the pending-request registry. Outbound calls may be issued from
//! any number of tasks; every write goes through one per-peer mutex so frames
//! never interleave. A write that cannot finish in time stops the peer, since
//! the frame it left behind may be cut short.
//!
//! # Example
//!
//! ```rust,ignore
//! let methods = Arc::new(MethodTable::builder().method("add", |a: i64, b: i64| a + b).build());
//! let peer = Peer::from_tcp(stream, methods, PeerOptions::default());
//!
//! let payload = peer.send_sync_request("multiply", vec![json!(2.0), json!(4.0)], false).await?;
//! ```

use crate::callback::{CallbackMethod, Payload};
use crate::config::PeerOptions;
use crate::error::{ErrorCode, PeerError, Result};
use crate::methods::{DispatchError, InvokeError, MethodTable};
use crate::pending::{Delivery, PendingKind, PendingRegistry};
use crate::protocol::{
    parse_id, read_message, write_message, Message, Notification, OutboundNotification,
    OutboundRequest, OutboundResponse, Request, RequestId, Response, RpcErrorObject,
};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handle to a running peer connection. Clones share the same connection.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    label: String,
    remote_addr: Option<SocketAddr>,
    methods: Arc<MethodTable>,
    options: PeerOptions,
    pending: PendingRegistry,
    writer: Mutex<BoxWriter>,
    running: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

impl Peer {
    /// Start a peer over separate read and write halves.
    ///
    /// Spawns the reader task, so this must run inside a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, methods: Arc<MethodTable>, options: PeerOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::start(reader, Box::new(writer), None, methods, options)
    }

    /// Start a peer over a single duplex stream.
    pub fn from_stream<S>(stream: S, methods: Arc<MethodTable>, options: PeerOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::start(reader, Box::new(writer), None, methods, options)
    }

    /// Start a peer over an established TCP connection.
    pub fn from_tcp(stream: TcpStream, methods: Arc<MethodTable>, options: PeerOptions) -> Self {
        let remote_addr = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        Self::start(reader, Box::new(writer), remote_addr, methods, options)
    }

    fn start<R>(
        reader: R,
        writer: BoxWriter,
        remote_addr: Option<SocketAddr>,
        methods: Arc<MethodTable>,
        options: PeerOptions,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let label = remote_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "stream".to_string());
        let options = options.normalized();
        let (running, _) = watch::channel(true);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let peer = Peer {
            inner: Arc::new(PeerInner {
                label,
                remote_addr,
                methods,
                pending: PendingRegistry::new(options.max_pending),
                options,
                writer: Mutex::new(writer),
                running,
                shutdown,
            }),
        };

        tokio::spawn(peer.clone().read_loop(reader, shutdown_rx));
        peer
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    pub fn options(&self) -> &PeerOptions {
        &self.inner.options
    }

    pub fn methods(&self) -> &MethodTable {
        &self.inner.methods
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Wait until the reader loop has stopped.
    pub async fn closed(&self) {
        let mut rx = self.inner.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Ask the reader loop to stop. Returns immediately.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Number of outbound requests still holding an identifier.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Reclaim identifiers held longer than the asynchronous timeout.
    pub fn sweep_expired(&self) -> usize {
        let removed = self
            .inner
            .pending
            .sweep_expired(Instant::now(), self.inner.options.async_timeout);
        if removed > 0 {
            debug!("Peer {} swept {} expired request(s)", self.inner.label, removed);
        }
        removed
    }

    // Inbound

    async fn read_loop<R>(self, reader: R, mut shutdown_rx: watch::Receiver<bool>)
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let max_size = self.inner.options.max_message_size;
        info!("Peer {} started", self.inner.label);

        loop {
            let frame = tokio::select! {
                result = read_message(&mut reader, max_size) => match result {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        debug!("Peer {} closed by remote", self.inner.label);
                        break;
                    }
                    Err(e) => {
                        warn!("Peer {} read failed: {}", self.inner.label, e);
                        break;
                    }
                },
                _ = shutdown_rx.changed() => {
                    debug!("Peer {} shutting down", self.inner.label);
                    break;
                }
            };

            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            self.handle_frame(&frame).await;
        }

        self.finish().await;
    }

    async fn finish(&self) {
        self.inner.running.send_replace(false);
        let dropped = self.inner.pending.clear();
        if dropped > 0 {
            debug!(
                "Peer {} dropped {} outstanding request(s)",
                self.inner.label, dropped
            );
        }
        let close = async {
            let mut writer = self.inner.writer.lock().await;
            writer.shutdown().await
        };
        match tokio::time::timeout(self.inner.options.write_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Peer {} writer shutdown: {}", self.inner.label, e),
            Err(_) => debug!("Peer {} writer shutdown timed out", self.inner.label),
        }
        info!("Peer {} stopped", self.inner.label);
    }

    async fn handle_frame(&self, frame: &[u8]) {
        let Ok(text) = std::str::from_utf8(frame) else {
            warn!("Peer {} sent invalid UTF-8", self.inner.label);
            self.reply_error(None, RpcErrorObject::from_code(ErrorCode::ParseError))
                .await;
            return;
        };
        debug!("Peer {} <- {}", self.inner.label, text);

        match Message::parse(text) {
            Ok(Message::Request(request)) => self.handle_request(request).await,
            Ok(Message::Response(response)) => self.handle_response(response),
            Ok(Message::Notification(notification)) => self.handle_notification(notification),
            Err(failure) => {
                warn!("Peer {} sent an unparseable message: {}", self.inner.label, failure);
                self.reply_error(None, RpcErrorObject::from_code(ErrorCode::ParseError))
                    .await;
            }
        }
    }

    async fn handle_request(&self, request: Request) {
        let Some(id) = parse_id(&request.id) else {
            warn!(
                "Peer {} sent request {} with unusable id {}",
                self.inner.label, request.method, request.id
            );
            self.reply_error(None, RpcErrorObject::from_code(ErrorCode::InvalidRequest))
                .await;
            return;
        };

        let Some(args) = params_to_args(request.params) else {
            self.reply_error(Some(id), RpcErrorObject::from_code(ErrorCode::InvalidRequest))
                .await;
            return;
        };

        match self.inner.methods.call(&request.method, &args) {
            Ok(result) => {
                if let Err(e) = self.send_response(id, result).await {
                    warn!("Peer {} failed to send response {}: {}", self.inner.label, id, e);
                }
            }
            Err(err) => {
                debug!(
                    "Peer {} request {} ({}) failed: {}",
                    self.inner.label, id, request.method, err
                );
                self.reply_error(Some(id), error_object(&err)).await;
            }
        }
    }

    fn handle_notification(&self, notification: Notification) {
        let Some(args) = params_to_args(notification.params) else {
            warn!(
                "Peer {} sent notification {} with unusable params",
                self.inner.label, notification.method
            );
            return;
        };

        if let Err(err) = self.inner.methods.call(&notification.method, &args) {
            warn!(
                "Peer {} notification {} failed: {}",
                self.inner.label, notification.method, err
            );
        }
    }

    fn handle_response(&self, response: Response) {
        let Some(id) = parse_id(&response.id) else {
            debug!(
                "Peer {} sent a response with unusable id {}",
                self.inner.label, response.id
            );
            return;
        };

        match self.inner.pending.deliver(id, response.body.into()) {
            Delivery::Fulfilled | Delivery::Invoked => {}
            Delivery::NotFound => {
                debug!("Peer {} dropped response {}: not pending", self.inner.label, id);
            }
            Delivery::Duplicate => {
                debug!("Peer {} dropped duplicate response {}", self.inner.label, id);
            }
        }
    }

    async fn reply_error(&self, id: Option<RequestId>, error: RpcErrorObject) {
        if let Err(e) = self.write(&OutboundResponse::error(id, error)).await {
            warn!("Peer {} failed to send error response: {}", self.inner.label, e);
        }
    }

    // Outbound

    /// Send a request and suspend until its response or the synchronous timeout.
    ///
    /// A remote error comes back as `Ok(Payload::Error(..))`. When no result can
    /// exist the call fails with [`PeerError::Timeout`], or with
    /// [`PeerError::PoolExhausted`] if no identifier was free and `force_wait`
    /// is off. With `force_wait` on, the call blocks without bound until an
    /// identifier frees up.
    pub async fn send_sync_request(
        &self,
        method: &str,
        params: Vec<Value>,
        force_wait: bool,
    ) -> Result<Payload> {
        self.ensure_running()?;
        let (kind, rx) = PendingKind::waiting();
        let id = self.acquire_id(kind, force_wait).await?;

        // Writing the request and waiting for its response share one deadline.
        let timeout = self.inner.options.sync_timeout;
        let deadline = Instant::now() + timeout;
        let request = OutboundRequest::new(method, &params, id);
        if let Err(e) = self.write_until(&request, deadline, timeout).await {
            self.inner.pending.remove(id);
            return Err(e);
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(payload)) => {
                self.inner.pending.remove(id);
                Ok(payload)
            }
            // Sender dropped: the registry was cleared because the peer stopped.
            Ok(Err(_)) if !self.is_running() => Err(PeerError::Disconnected),
            // Swept before the sync timeout elapsed.
            Ok(Err(_)) => Err(PeerError::Timeout(timeout)),
            Err(_) => {
                self.inner.pending.remove(id);
                debug!(
                    "Peer {} request {} ({}) timed out after {:?}",
                    self.inner.label, id, method, timeout
                );
                Err(PeerError::Timeout(timeout))
            }
        }
    }

    /// Send a request whose response will be handed to `callback`.
    ///
    /// Returns `Ok(false)` when no identifier was available and `force_wait`
    /// is off; the callback is then dropped without running.
    pub async fn send_async_request(
        &self,
        method: &str,
        params: Vec<Value>,
        callback: CallbackMethod,
        force_wait: bool,
    ) -> Result<bool> {
        self.ensure_running()?;
        let id = match self
            .acquire_id(PendingKind::Callback(callback), force_wait)
            .await
        {
            Ok(id) => id,
            Err(PeerError::PoolExhausted { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        if let Err(e) = self.write(&OutboundRequest::new(method, &params, id)).await {
            self.inner.pending.remove(id);
            return Err(e);
        }
        Ok(true)
    }

    pub async fn send_notification(&self, method: &str, params: Vec<Value>) -> Result<()> {
        self.ensure_running()?;
        self.write(&OutboundNotification::new(method, &params)).await
    }

    pub async fn send_response(&self, id: RequestId, result: Value) -> Result<()> {
        self.write(&OutboundResponse::success(id, result)).await
    }

    pub async fn send_error_response(
        &self,
        code: i32,
        message: impl Into<String>,
        id: Option<RequestId>,
    ) -> Result<()> {
        self.write(&OutboundResponse::error(id, RpcErrorObject::new(code, message)))
            .await
    }

    /// Register `kind`, applying the exhaustion policy.
    async fn acquire_id(&self, kind: PendingKind, force_wait: bool) -> Result<RequestId> {
        let pending = &self.inner.pending;
        let kind = match pending.register(kind) {
            Ok(id) => return self.confirm_running(id),
            Err(kind) => kind,
        };

        self.sweep_expired();
        let mut kind = match pending.register(kind) {
            Ok(id) => return self.confirm_running(id),
            Err(kind) => kind,
        };

        if !force_wait {
            warn!(
                "Peer {} has no free request identifier (capacity {})",
                self.inner.label,
                pending.capacity()
            );
            return Err(PeerError::PoolExhausted {
                capacity: pending.capacity(),
            });
        }

        warn!(
            "Peer {} has no free request identifier, waiting for one",
            self.inner.label
        );
        loop {
            tokio::time::sleep(self.inner.options.exhaustion_retry_interval).await;
            self.ensure_running()?;
            self.sweep_expired();
            kind = match pending.register(kind) {
                Ok(id) => return self.confirm_running(id),
                Err(kind) => kind,
            };
        }
    }

    // The reader may have cleared the registry between the check and the insert.
    fn confirm_running(&self, id: RequestId) -> Result<RequestId> {
        if self.is_running() {
            Ok(id)
        } else {
            self.inner.pending.remove(id);
            Err(PeerError::Disconnected)
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(PeerError::Disconnected)
        }
    }

    async fn write<T: Serialize>(&self, message: &T) -> Result<()> {
        let timeout = self.inner.options.write_timeout;
        self.write_until(message, Instant::now() + timeout, timeout).await
    }

    /// Write one frame, giving up at `deadline`.
    ///
    /// Timing out while still queued for the writer leaves the stream intact.
    /// Timing out mid-frame does not, so the peer is stopped.
    async fn write_until<T: Serialize>(
        &self,
        message: &T,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<()> {
        let body = serde_json::to_string(message)?;
        debug!("Peer {} -> {}", self.inner.label, body);

        let Ok(mut writer) = tokio::time::timeout_at(deadline, self.inner.writer.lock()).await
        else {
            debug!("Peer {} writer still busy after {:?}", self.inner.label, timeout);
            return Err(PeerError::Timeout(timeout));
        };

        match tokio::time::timeout_at(deadline, write_message(&mut *writer, &body)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Peer {} stalled writing a frame for {:?}, stopping",
                    self.inner.label, timeout
                );
                self.shutdown();
                Err(PeerError::Timeout(timeout))
            }
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("label", &self.inner.label)
            .field("running", &self.is_running())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

/// Positional arguments from a `params` member. By-name params are refused.
fn params_to_args(params: Option<Value>) -> Option<Vec<Value>> {
    match params {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(Value::Array(items)) => Some(items),
        Some(_) => None,
    }
}

fn error_object(err: &DispatchError) -> RpcErrorObject {
    match err {
        DispatchError::Invoke(InvokeError::Failed(failure)) => RpcErrorObject {
            code: failure.code.code(),
            message: failure.message.clone(),
            data: failure.data.clone(),
        },
        DispatchError::Invoke(other) => RpcErrorObject {
            data: Some(Value::String(other.to_string())),
            ..RpcErrorObject::from_code(other.code())
        },
        DispatchError::MethodNotFound(_) => RpcErrorObject::from_code(ErrorCode::MethodNotFound),
    }
}

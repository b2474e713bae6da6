//! Connection handle and runtime loops.
//!
//! A [`Bridge`] is a cheap-clone handle over one websocket session. The
//! lifecycle after [`Bridge::connect`]:
//! 1. Resolve the target and perform the websocket handshake
//! 2. Split the stream; spawn the writer task and the inbound read loop
//! 3. Invoke `on_open` exactly once and arm the keepalive timer
//! 4. Dispatch inbound frames, strictly in arrival order, until the
//!    transport closes or [`Bridge::close`] is called
//!
//! Outbound operations are synchronous and never block on the network;
//! replies arrive through callbacks on the inbound task. There is no
//! reconnection and no retry anywhere in the engine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use futures::stream::SplitStream;
use futures::{Sink, Stream, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::envelope::{Envelope, FrameType};
use crate::error::{BridgeError, Result};
use crate::handler::registry::HandlerRegistry;
use crate::handler::BridgeHandler;
use crate::message::BridgeMessage;
use crate::replies::ReplyCorrelator;
use crate::target::{ConnectOptions, ErrorCallback, Target};
use crate::writer::{self, WriterHandle};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BridgeState {
    /// Transport established, engine not yet running.
    Connecting = 0,
    /// Fully operational.
    Open = 1,
    /// Torn down; terminal.
    Closed = 2,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BridgeState::Connecting,
            1 => BridgeState::Open,
            _ => BridgeState::Closed,
        }
    }
}

/// Handle to one bridge connection.
///
/// Clones share the same underlying session. Dropping the last user-held
/// handle tears the connection down; [`Bridge::close`] does so explicitly
/// and is idempotent.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Shared>,
}

struct Shared {
    state: AtomicU8,
    writer: WriterHandle,
    handlers: HandlerRegistry,
    replies: ReplyCorrelator,
    keepalive: parking_lot::Mutex<Option<JoinHandle<()>>>,
    on_error: Option<ErrorCallback>,
    _writer_task: JoinHandle<()>,
}

impl Shared {
    /// Single transition to `Closed`; every later call is a no-op.
    fn shutdown(&self) {
        let prev = self
            .state
            .swap(BridgeState::Closed as u8, Ordering::AcqRel);
        if prev == BridgeState::Closed as u8 {
            return;
        }
        if let Some(handle) = self.keepalive.lock().take() {
            handle.abort();
        }
        // Pending replies are dropped silently, not errored.
        self.handlers.clear();
        self.replies.clear();
        self.writer.close();
        tracing::debug!("bridge connection closed");
    }
}

impl Bridge {
    /// Connect to a bridge server.
    ///
    /// `on_open` is invoked exactly once after a successful handshake, with
    /// the engine already running; registrations made inside it are queued
    /// before `connect` returns.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use eventbus_bridge::{Bridge, ConnectOptions, message_handler};
    ///
    /// let bridge = Bridge::connect(
    ///     "ws://localhost:8765/bridge".into(),
    ///     |eb| {
    ///         eb.register_handler("test", message_handler(|msg| {
    ///             println!("got {:?}", msg.body());
    ///         }))
    ///         .unwrap();
    ///     },
    ///     ConnectOptions::new(),
    /// )
    /// .await?;
    /// ```
    pub async fn connect<F>(target: Target, on_open: F, options: ConnectOptions) -> Result<Bridge>
    where
        F: FnOnce(&Bridge),
    {
        let endpoint = target.resolve(&options)?;
        let config = WebSocketConfig::default()
            .max_message_size(Some(options.max_frame_size))
            .max_frame_size(Some(options.max_frame_size));
        let (ws, _response) =
            connect_async_with_config(endpoint.url(), Some(config), false).await?;
        let bridge = Bridge::attach(ws, options);
        on_open(&bridge);
        Ok(bridge)
    }

    /// Run the engine over an already-established websocket-like stream.
    ///
    /// [`Bridge::connect`] is `resolve + handshake + attach`; call this
    /// directly when the transport comes from somewhere else (a proxy, a
    /// custom dialer, an in-memory pipe in tests).
    pub fn attach<S>(stream: S, options: ConnectOptions) -> Bridge
    where
        S: Stream<Item = std::result::Result<WsMessage, WsError>>
            + Sink<WsMessage, Error = WsError>
            + Send
            + Unpin
            + 'static,
    {
        let (sink, stream) = stream.split();
        let (writer, writer_task) = writer::spawn_writer_task(sink, options.max_frame_size);

        let inner = Arc::new(Shared {
            state: AtomicU8::new(BridgeState::Connecting as u8),
            writer: writer.clone(),
            handlers: HandlerRegistry::new(writer),
            replies: ReplyCorrelator::new(),
            keepalive: parking_lot::Mutex::new(None),
            on_error: options.on_error.clone(),
            _writer_task: writer_task,
        });
        inner.state.store(BridgeState::Open as u8, Ordering::Release);

        tokio::spawn(read_loop(stream, Arc::downgrade(&inner)));

        let keepalive = tokio::spawn(keepalive_loop(
            Arc::downgrade(&inner),
            options.ping_interval,
        ));
        *inner.keepalive.lock() = Some(keepalive);

        Bridge { inner }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == BridgeState::Open
    }

    /// Send a point-to-point message.
    pub fn send(&self, address: &str, body: impl Into<Value>) -> Result<&Self> {
        self.send_message(FrameType::Send, address, body.into(), None)
    }

    /// Send a point-to-point message and await one reply.
    ///
    /// The reply mapping is registered before the frame is handed to the
    /// writer, so a reply can never race ahead of it. `handler` fires at
    /// most once; with no timeout imposed, a reply that never arrives keeps
    /// its mapping until the connection closes.
    pub fn send_with_reply(
        &self,
        address: &str,
        body: impl Into<Value>,
        handler: Arc<dyn BridgeHandler>,
    ) -> Result<&Self> {
        self.send_message(FrameType::Send, address, body.into(), Some(handler))
    }

    /// Broadcast a message to every subscriber of an address.
    pub fn publish(&self, address: &str, body: impl Into<Value>) -> Result<&Self> {
        self.send_message(FrameType::Publish, address, body.into(), None)
    }

    /// Broadcast and await one reply.
    pub fn publish_with_reply(
        &self,
        address: &str,
        body: impl Into<Value>,
        handler: Arc<dyn BridgeHandler>,
    ) -> Result<&Self> {
        self.send_message(FrameType::Publish, address, body.into(), Some(handler))
    }

    /// Subscribe a handler to an address.
    ///
    /// The first handler for an address emits one `register` frame to the
    /// peer; further handlers on the same address are local-only. Keep the
    /// `Arc` to unregister later.
    pub fn register_handler(
        &self,
        address: &str,
        handler: Arc<dyn BridgeHandler>,
    ) -> Result<&Self> {
        self.ensure_open()?;
        self.inner.handlers.register(address, handler)?;
        Ok(self)
    }

    /// Remove one registration of `handler` from an address.
    ///
    /// Removing the last handler for an address emits one `unregister`
    /// frame to the peer.
    pub fn unregister_handler(
        &self,
        address: &str,
        handler: &Arc<dyn BridgeHandler>,
    ) -> Result<&Self> {
        self.ensure_open()?;
        self.inner.handlers.unregister(address, handler)?;
        Ok(self)
    }

    /// Send an explicit keepalive frame.
    pub fn ping(&self) -> Result<&Self> {
        self.ensure_open()?;
        self.inner.writer.frame(&Envelope::ping())?;
        Ok(self)
    }

    /// Close the connection. Idempotent.
    ///
    /// Cancels the keepalive timer, clears the handler registry and every
    /// pending reply (their callbacks are never invoked), and sends a
    /// websocket close frame.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// Number of handlers registered under an address.
    pub fn handlers_at(&self, address: &str) -> usize {
        self.inner.handlers.count(address)
    }

    /// Number of replies still awaited.
    pub fn pending_replies(&self) -> usize {
        self.inner.replies.len()
    }

    fn send_message(
        &self,
        frame_type: FrameType,
        address: &str,
        body: Value,
        reply_handler: Option<Arc<dyn BridgeHandler>>,
    ) -> Result<&Self> {
        self.ensure_open()?;
        let token = reply_handler.map(|handler| self.inner.replies.insert(handler));
        let envelope = Envelope::message(frame_type, address, body, token.clone());
        if let Err(err) = self.inner.writer.frame(&envelope) {
            // The frame never left; drop the orphan mapping.
            if let Some(token) = token {
                self.inner.replies.take(&token);
            }
            return Err(err);
        }
        Ok(self)
    }

    /// A frame write against a closed connection is a programming error;
    /// fail fast instead of queueing.
    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BridgeError::Closed)
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state())
            .field("pending_replies", &self.pending_replies())
            .finish()
    }
}

/// Inbound loop: the single execution context all dispatch happens on.
///
/// Holds only a weak reference so that dropping the last user handle ends
/// the loop (the writer channel closes with it, which closes the socket).
async fn read_loop<S>(mut stream: SplitStream<S>, shared: Weak<Shared>)
where
    S: Stream<Item = std::result::Result<WsMessage, WsError>> + Send + 'static,
{
    while let Some(item) = stream.next().await {
        let Some(inner) = shared.upgrade() else {
            return;
        };
        match item {
            Ok(WsMessage::Text(text)) => match Envelope::from_json(&text) {
                Ok(envelope) => dispatch(Bridge { inner }, envelope),
                Err(err) => tracing::warn!("discarding unparseable frame: {err}"),
            },
            Ok(WsMessage::Close(_)) => break,
            // Binary and control frames are not part of the bridge protocol.
            Ok(_) => {}
            Err(err) => {
                tracing::debug!("transport error, stopping read loop: {err}");
                break;
            }
        }
    }
    if let Some(inner) = shared.upgrade() {
        inner.shutdown();
    }
}

/// Route one parsed frame.
///
/// Subscription handlers and the reply correlator share the address
/// namespace, so both are checked for every routable frame and both may
/// fire for the same one. Handlers run synchronously, here, in wire order.
fn dispatch(bridge: Bridge, envelope: Envelope) {
    if envelope.is_err() {
        match &bridge.inner.on_error {
            Some(callback) => callback(&envelope),
            None => tracing::warn!(frame = ?envelope, "error frame from bridge peer"),
        }
        return;
    }
    let Some(address) = envelope.address else {
        tracing::debug!(frame = ?envelope, "frame without address discarded");
        return;
    };
    let body = envelope.body.unwrap_or(Value::Null);

    // Snapshot, not the live list: a handler may unregister itself or a
    // sibling without affecting this pass.
    for handler in bridge.inner.handlers.snapshot(&address) {
        let message = BridgeMessage::new(
            address.clone(),
            envelope.reply_address.clone(),
            body.clone(),
            bridge.clone(),
            Some(handler.clone()),
        );
        handler.invoke(message);
    }

    if let Some(handler) = bridge.inner.replies.take(&address) {
        let message = BridgeMessage::new(
            address,
            envelope.reply_address,
            body,
            bridge.clone(),
            None,
        );
        handler.invoke(message);
    }
}

/// Periodic keepalive. The first tick fires immediately (the initial ping);
/// a failed write means the connection is already gone, so the task exits
/// rather than reporting an error. `close` aborts it exactly once.
async fn keepalive_loop(shared: Weak<Shared>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let Some(inner) = shared.upgrade() else {
            return;
        };
        if inner.writer.frame(&Envelope::ping()).is_err() {
            return;
        }
    }
}

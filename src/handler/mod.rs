//! Handler module - address-bound callbacks and their registry.
//!
//! Provides:
//! - [`BridgeHandler`] - the single entry point the dispatcher invokes
//! - [`message_handler`] / [`event_handler`] - the two constructible variants
//!
//! A handler never owns the connection; the message it receives carries a
//! cheap [`Bridge`] handle for replying or self-unregistration.
//!
//! # Example
//!
//! ```ignore
//! use eventbus_bridge::{event_handler, message_handler};
//!
//! let plain = message_handler(|msg| {
//!     println!("got {:?} on {}", msg.body(), msg.address());
//! });
//!
//! let with_bridge = event_handler(|msg, bridge| {
//!     bridge.send("audit", "seen one").ok();
//!     msg.reply("ack").ok();
//! });
//! ```

pub(crate) mod registry;

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::message::BridgeMessage;

/// An address-bound callback, invoked once per matching inbound frame.
///
/// Invocation is synchronous on the connection's inbound task; frames are
/// dispatched strictly in arrival order, so a slow handler delays everything
/// behind it.
pub trait BridgeHandler: Send + Sync + 'static {
    /// Deliver one message to this handler.
    fn invoke(&self, message: BridgeMessage);
}

/// Handler variant that only sees the message.
struct MessageFn<F>(F);

impl<F> BridgeHandler for MessageFn<F>
where
    F: Fn(BridgeMessage) + Send + Sync + 'static,
{
    fn invoke(&self, message: BridgeMessage) {
        (self.0)(message);
    }
}

/// Handler variant that also receives the bridge handle.
struct EventFn<F>(F);

impl<F> BridgeHandler for EventFn<F>
where
    F: Fn(BridgeMessage, Bridge) + Send + Sync + 'static,
{
    fn invoke(&self, message: BridgeMessage) {
        let bridge = message.bridge().clone();
        (self.0)(message, bridge);
    }
}

/// Wrap a closure that takes just the message.
///
/// The returned `Arc` doubles as the registration identity: keep a clone to
/// unregister the handler later.
pub fn message_handler<F>(f: F) -> Arc<dyn BridgeHandler>
where
    F: Fn(BridgeMessage) + Send + Sync + 'static,
{
    Arc::new(MessageFn(f))
}

/// Wrap a closure that takes the message and the bridge handle.
pub fn event_handler<F>(f: F) -> Arc<dyn BridgeHandler>
where
    F: Fn(BridgeMessage, Bridge) + Send + Sync + 'static,
{
    Arc::new(EventFn(f))
}
